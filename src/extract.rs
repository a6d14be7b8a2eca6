//! Plain-text body extraction from raw MIME email.
//!
//! Policy:
//! - no header block: the whole input is the body
//! - not multipart: return the decoded body, whatever its content type
//! - multipart or attached message: walk every part depth-first in
//!   document order and return the first `text/plain` part
//! - container without any `text/plain` part: return an empty string

use std::borrow::Cow;

use mail_parser::{Message, MessageParser, MessagePart, MessagePartId, MimeHeaders, PartType};

use crate::error::{MISSING_RAW, ServiceError};

/// Extract the plain-text body of a raw MIME email.
///
/// An empty `raw` is rejected before any parsing. Content is returned
/// transfer-decoded and charset-decoded.
pub fn extract_plain_text(raw: &str) -> Result<String, ServiceError> {
    if raw.is_empty() {
        return Err(ServiceError::validation(MISSING_RAW));
    }
    if let Some(body) = headerless_body(raw) {
        return Ok(body.to_string());
    }

    // Headers with nothing after them.
    let Some(message) = MessageParser::default().parse(raw.as_bytes()) else {
        return Ok(String::new());
    };

    let root = message
        .parts
        .first()
        .ok_or_else(|| ServiceError::processing("MIME message has no body"))?;

    if !is_container(root) {
        return Ok(decoded_text(root).into_owned());
    }

    let text = Walk::new(&message)
        .find(|part| is_text_plain(part))
        .map(|part| decoded_text(part).into_owned())
        .unwrap_or_default();
    Ok(text)
}

/// The body of an input that does not open with a header block.
///
/// The header block ends at the first line that is not a header field, so
/// an input whose first line is blank or not a header is all body.
fn headerless_body(raw: &str) -> Option<&str> {
    let (first, rest) = raw.split_once('\n').unwrap_or((raw, ""));
    let first = first.strip_suffix('\r').unwrap_or(first);
    if first.is_empty() {
        Some(rest)
    } else if is_header_line(first) {
        None
    } else {
        Some(raw)
    }
}

/// A field (`name:` with a printable, space-free name), a folded
/// continuation, or an mbox `From ` line.
fn is_header_line(line: &str) -> bool {
    if line.starts_with([' ', '\t']) || line.starts_with("From ") {
        return true;
    }
    line.split_once(':')
        .is_some_and(|(name, _)| name.bytes().all(|b| b.is_ascii_graphic()))
}

fn is_container(part: &MessagePart<'_>) -> bool {
    matches!(part.body, PartType::Multipart(_) | PartType::Message(_))
}

/// A part without a Content-Type header defaults to `text/plain`.
fn is_text_plain(part: &MessagePart<'_>) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .is_some_and(|sub| sub.eq_ignore_ascii_case("plain"))
        }
        None => matches!(part.body, PartType::Text(_)),
    }
}

fn decoded_text<'a>(part: &'a MessagePart<'_>) -> Cow<'a, str> {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => Cow::Borrowed(text.as_ref()),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => String::from_utf8_lossy(bytes),
        PartType::Message(inner) => String::from_utf8_lossy(inner.raw_message()),
        PartType::Multipart(_) => Cow::Borrowed(""),
    }
}

/// Depth-first, document-order walk over every part of a message,
/// descending into multipart containers and attached messages.
///
/// The walk is lazy and single-pass: parts are produced on demand and the
/// iterator cannot be rewound.
pub struct Walk<'a, 'x> {
    stack: Vec<(&'a Message<'x>, MessagePartId)>,
}

impl<'a, 'x> Walk<'a, 'x> {
    pub fn new(message: &'a Message<'x>) -> Self {
        Self {
            stack: vec![(message, 0)],
        }
    }
}

impl<'a, 'x> Iterator for Walk<'a, 'x> {
    type Item = &'a MessagePart<'x>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (message, id) = self.stack.pop()?;
            let Some(part) = message.parts.get(id as usize) else {
                continue;
            };

            match &part.body {
                PartType::Multipart(children) => {
                    self.stack
                        .extend(children.iter().rev().map(|child| (message, *child)));
                }
                PartType::Message(inner) => self.stack.push((inner, 0)),
                _ => {}
            }
            return Some(part);
        }
    }
}
