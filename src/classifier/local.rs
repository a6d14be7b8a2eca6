//! On-device zero-shot backend.
//!
//! Runs a BERT-family sentence encoder with candle. Each candidate label is
//! turned into a hypothesis sentence ("This email is Spam."), and candidates
//! are scored by cosine similarity between the mean-pooled text embedding
//! and the hypothesis embedding, softmaxed into probability-like scores.
//!
//! Model files are resolved from the local hub cache only; nothing is
//! downloaded at startup. Run `warm-cache` beforehand.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Cache, Repo, RepoType};
use tokenizers::{Tokenizer, TruncationParams};

use super::{ScoredLabel, ZeroShotClassifier, sort_ranking};
use crate::config::{ClassifierConfig, render_hypothesis};
use crate::error::{ClassifierError, StartupError};

/// Files a model repository must provide.
pub const MODEL_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

/// Multiplier applied to cosine similarities before the softmax.
///
/// Raw cosines of sentence embeddings sit in a narrow band, so an
/// unscaled softmax would be nearly uniform.
const SIMILARITY_SCALE: f32 = 20.0;

/// Paths to a resolved model on disk.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Locate the model without touching the network.
    ///
    /// `model_id` may be a directory holding the files directly; otherwise
    /// it is looked up in the hub cache at the configured revision.
    pub fn resolve(config: &ClassifierConfig) -> Result<Self, StartupError> {
        let dir = Path::new(&config.model_id);
        if dir.is_dir() {
            let find = |file: &str| {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(StartupError::ModelNotFound {
                        model_id: config.model_id.clone(),
                        file: file.to_string(),
                    })
                }
            };
            return Ok(Self {
                config: find(MODEL_FILES[0])?,
                tokenizer: find(MODEL_FILES[1])?,
                weights: find(MODEL_FILES[2])?,
            });
        }

        let cache = match &config.cache_dir {
            Some(path) => Cache::new(path.clone()),
            None => Cache::default(),
        };
        let repo = cache.repo(Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));
        let find = |file: &str| {
            repo.get(file).ok_or_else(|| StartupError::ModelNotFound {
                model_id: config.model_id.clone(),
                file: file.to_string(),
            })
        };

        Ok(Self {
            config: find(MODEL_FILES[0])?,
            tokenizer: find(MODEL_FILES[1])?,
            weights: find(MODEL_FILES[2])?,
        })
    }
}

/// Turns text into a fixed-size embedding.
trait TextEncoder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifierError>;
}

/// Loaded encoder weights plus tokenizer.
struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl BertEncoder {
    fn load(files: &ModelFiles, max_seq_length: usize) -> Result<Self, StartupError> {
        let device = Device::cuda_if_available(0).map_err(|e| load_error(&files.weights, e))?;

        let raw_config =
            std::fs::read_to_string(&files.config).map_err(|e| load_error(&files.config, e))?;
        let bert_config: BertConfig =
            serde_json::from_str(&raw_config).map_err(|e| load_error(&files.config, e))?;

        let mut tokenizer =
            Tokenizer::from_file(&files.tokenizer).map_err(|e| load_error(&files.tokenizer, e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_seq_length,
                ..Default::default()
            }))
            .map_err(|e| load_error(&files.tokenizer, e))?;
        tokenizer.with_padding(None);

        // SAFETY: the weights file lives in the model cache and is not
        // modified while the process holds the mapping.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(std::slice::from_ref(&files.weights), DTYPE, &device)
        }
        .map_err(|e| load_error(&files.weights, e))?;
        let model = BertModel::load(vb, &bert_config).map_err(|e| load_error(&files.weights, e))?;

        tracing::debug!(device = ?device, "Encoder weights loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn forward(&self, ids: &[u32], mask: &[u32]) -> candle_core::Result<Vec<f32>> {
        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;
        let attention_mask = Tensor::new(mask, &self.device)?.unsqueeze(0)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Single unpadded sequence: mean over all tokens.
        let (_batch, n_tokens, _hidden) = hidden.dims3()?;
        let pooled = (hidden.sum(1)? / n_tokens as f64)?;
        pooled.squeeze(0)?.to_vec1::<f32>()
    }
}

impl TextEncoder for BertEncoder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifierError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ClassifierError::Inference(format!("tokenization failed: {e}")))?;
        self.forward(encoding.get_ids(), encoding.get_attention_mask())
            .map_err(|e| ClassifierError::Inference(e.to_string()))
    }
}

fn load_error(path: &Path, err: impl std::fmt::Display) -> StartupError {
    StartupError::ModelLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Zero-shot classifier backed by a local sentence encoder.
///
/// The encoder is guarded by a mutex and driven from the blocking pool, so
/// concurrent `rank` calls queue up instead of racing on the model.
pub struct LocalClassifier {
    encoder: Arc<Mutex<dyn TextEncoder + Send>>,
    model_id: String,
    hypothesis_template: String,
}

impl std::fmt::Debug for LocalClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalClassifier")
            .field("model_id", &self.model_id)
            .field("hypothesis_template", &self.hypothesis_template)
            .finish_non_exhaustive()
    }
}

impl LocalClassifier {
    /// Resolve and load the model. Blocking and expensive; call once.
    pub fn load(config: &ClassifierConfig) -> Result<Self, StartupError> {
        let files = ModelFiles::resolve(config)?;
        tracing::info!(
            model = %config.model_id,
            weights = %files.weights.display(),
            "Loading local zero-shot model"
        );
        let encoder = BertEncoder::load(&files, config.max_seq_length)?;

        Ok(Self::with_encoder(encoder, config))
    }

    fn with_encoder(
        encoder: impl TextEncoder + Send + 'static,
        config: &ClassifierConfig,
    ) -> Self {
        Self {
            encoder: Arc::new(Mutex::new(encoder)),
            model_id: config.model_id.clone(),
            hypothesis_template: config.hypothesis_template.clone(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl ZeroShotClassifier for LocalClassifier {
    fn name(&self) -> &str {
        "local"
    }

    async fn rank(
        &self,
        text: &str,
        candidates: &[String],
    ) -> Result<Vec<ScoredLabel>, ClassifierError> {
        let encoder = Arc::clone(&self.encoder);
        let text = text.to_string();
        let candidates = candidates.to_vec();
        let template = self.hypothesis_template.clone();

        tokio::task::spawn_blocking(move || {
            let encoder = encoder
                .lock()
                .map_err(|_| ClassifierError::Worker("model lock poisoned".into()))?;
            score_candidates(&*encoder, &text, &candidates, &template)
        })
        .await
        .map_err(|e| ClassifierError::Worker(e.to_string()))?
    }
}

/// Rank candidates by how well their hypothesis matches `text`.
fn score_candidates<E: TextEncoder + ?Sized>(
    encoder: &E,
    text: &str,
    candidates: &[String],
    template: &str,
) -> Result<Vec<ScoredLabel>, ClassifierError> {
    let text_embedding = encoder.embed(text)?;

    let similarities = candidates
        .iter()
        .map(|label| {
            let hypothesis = encoder.embed(&render_hypothesis(template, label))?;
            Ok(cosine_similarity(&text_embedding, &hypothesis))
        })
        .collect::<Result<Vec<f32>, ClassifierError>>()?;

    let scores = scaled_softmax(&similarities, SIMILARITY_SCALE);
    let mut ranking: Vec<ScoredLabel> = candidates
        .iter()
        .zip(scores)
        .map(|(label, score)| ScoredLabel::new(label.clone(), score))
        .collect();
    sort_ranking(&mut ranking);
    Ok(ranking)
}

/// Cosine similarity in `[-1, 1]`; 0 for mismatched or zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn scaled_softmax(values: &[f32], scale: f32) -> Vec<f32> {
    let max = values
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| ((v - max) * scale).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Embeds text as keyword counts over a tiny vocabulary.
    struct KeywordEncoder;

    const VOCAB: [&str; 4] = ["meeting", "spam", "office", "interested"];

    impl TextEncoder for KeywordEncoder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifierError> {
            let lower = text.to_lowercase();
            Ok(VOCAB
                .iter()
                .map(|word| lower.matches(word).count() as f32)
                .collect())
        }
    }

    struct BrokenEncoder;

    impl TextEncoder for BrokenEncoder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, ClassifierError> {
            Err(ClassifierError::Inference("device lost".into()))
        }
    }

    /// Keyword encoder that counts calls made while another is in flight.
    struct ExclusiveEncoder {
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
    }

    impl TextEncoder for ExclusiveEncoder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, ClassifierError> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            let embedding = KeywordEncoder.embed(text);
            self.busy.store(false, Ordering::SeqCst);
            embedding
        }
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn cosine_similarity_identical() {
        let similarity = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn softmax_sums_to_one_and_keeps_order() {
        let scores = scaled_softmax(&[0.1, 0.5, 0.3], SIMILARITY_SCALE);
        let total: f32 = scores.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(scores[1] > scores[2] && scores[2] > scores[0]);
    }

    #[test]
    fn best_matching_hypothesis_ranks_first() {
        let candidates = labels(&["Interested", "Meeting Booked", "Spam", "Out of Office"]);
        let ranking = score_candidates(
            &KeywordEncoder,
            "Meeting confirmed, see you at the meeting",
            &candidates,
            "This email is {}.",
        )
        .unwrap();

        assert_eq!(ranking.len(), 4);
        assert_eq!(ranking[0].label, "Meeting Booked");
        assert!(ranking.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn ties_keep_candidate_order() {
        let candidates = labels(&["Spam", "Interested", "Out of Office"]);
        let ranking =
            score_candidates(&KeywordEncoder, "nothing relevant", &candidates, "{}").unwrap();
        let order: Vec<&str> = ranking.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(order, vec!["Spam", "Interested", "Out of Office"]);
    }

    #[test]
    fn encoder_failure_propagates() {
        let err = score_candidates(&BrokenEncoder, "hi", &labels(&["Spam"]), "{}").unwrap_err();
        assert!(err.to_string().contains("device lost"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ranks_are_serialized_and_independent() {
        let overlaps = Arc::new(AtomicUsize::new(0));
        let encoder = ExclusiveEncoder {
            busy: Arc::new(AtomicBool::new(false)),
            overlaps: Arc::clone(&overlaps),
        };
        let classifier = LocalClassifier::with_encoder(encoder, &ClassifierConfig::default());
        let candidates = labels(&["Meeting Booked", "Spam", "Out of Office", "Interested"]);

        let cases: Vec<(String, &str)> = (0..16)
            .map(|i| {
                let (word, label) = [
                    ("meeting", "Meeting Booked"),
                    ("spam", "Spam"),
                    ("office", "Out of Office"),
                    ("interested", "Interested"),
                ][i % 4];
                (format!("#{i}: {word} {word}"), label)
            })
            .collect();

        let calls = cases
            .iter()
            .map(|(text, _)| classifier.rank(text, &candidates));
        let rankings = futures::future::join_all(calls).await;

        for ((text, expected), ranking) in cases.iter().zip(rankings) {
            let ranking = ranking.unwrap();
            assert_eq!(ranking[0].label, *expected, "text {text}");
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_cache_entry_is_model_not_found() {
        let cache = tempfile::tempdir().unwrap();
        let config = ClassifierConfig {
            model_id: "example-org/not-downloaded".to_string(),
            cache_dir: Some(cache.path().to_path_buf()),
            ..ClassifierConfig::default()
        };

        match LocalClassifier::load(&config).unwrap_err() {
            StartupError::ModelNotFound { model_id, file } => {
                assert_eq!(model_id, "example-org/not-downloaded");
                assert_eq!(file, "config.json");
            }
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn model_directory_missing_tokenizer_is_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        let config = ClassifierConfig {
            model_id: dir.path().to_string_lossy().into_owned(),
            ..ClassifierConfig::default()
        };

        match ModelFiles::resolve(&config).unwrap_err() {
            StartupError::ModelNotFound { file, .. } => assert_eq!(file, "tokenizer.json"),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_model_config_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        for (file, contents) in [
            ("config.json", "not json"),
            ("tokenizer.json", "{}"),
            ("model.safetensors", "x"),
        ] {
            std::fs::write(dir.path().join(file), contents).unwrap();
        }
        let config = ClassifierConfig {
            model_id: dir.path().to_string_lossy().into_owned(),
            ..ClassifierConfig::default()
        };

        match LocalClassifier::load(&config).unwrap_err() {
            StartupError::ModelLoad { path, .. } => assert!(path.ends_with("config.json")),
            other => panic!("expected ModelLoad, got {other:?}"),
        }
    }
}
