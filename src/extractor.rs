//! Structured content extraction from full provider messages
//!
//! A message body is a tree of MIME-like parts. The wire payload is first
//! converted into a tagged [`PartNode`] tree, then folded into bodies and
//! attachment descriptors. Header handling is case-insensitive and optional
//! fields stay optional; the persistence layer owns defaulting.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::client::FullMessage;
use crate::models::{AttachmentDescriptor, ExtractedContent};
use google_gmail1::api::MessagePart;

/// Tagged view of one node in a message part tree
#[derive(Debug, Clone)]
pub enum PartNode {
    /// A content-bearing part: body text, HTML, or an attachment
    Leaf {
        part_id: String,
        mime_type: String,
        filename: String,
        data: Option<Vec<u8>>,
        attachment_id: Option<String>,
        size: u64,
    },
    /// A multipart wrapper; only its children carry content
    Container { parts: Vec<PartNode> },
}

impl PartNode {
    /// Build the tree from a wire part.
    ///
    /// A part with children is a container regardless of its own declared
    /// MIME type; a part without children is a leaf, which also covers the
    /// degenerate single-part message.
    pub fn from_part(part: &MessagePart) -> Self {
        if let Some(parts) = &part.parts {
            if !parts.is_empty() {
                return PartNode::Container {
                    parts: parts.iter().map(Self::from_part).collect(),
                };
            }
        }

        let body = part.body.as_ref();
        PartNode::Leaf {
            part_id: part.part_id.clone().unwrap_or_default(),
            mime_type: part.mime_type.clone().unwrap_or_default(),
            filename: part.filename.clone().unwrap_or_default(),
            data: body.and_then(|b| b.data.clone()),
            attachment_id: body.and_then(|b| b.attachment_id.clone()),
            size: body.and_then(|b| b.size).unwrap_or(0).max(0) as u64,
        }
    }
}

#[derive(Debug, Default)]
struct BodyAccumulator {
    body_text: Option<String>,
    body_html: Option<String>,
    attachments: Vec<AttachmentDescriptor>,
}

/// Depth-first fold over the part tree.
///
/// A non-empty filename classifies a leaf as an attachment regardless of its
/// MIME type. Duplicate text parts of the same type resolve last-writer-wins.
fn fold_parts(node: &PartNode, acc: &mut BodyAccumulator) {
    match node {
        PartNode::Container { parts } => {
            for part in parts {
                fold_parts(part, acc);
            }
        }
        PartNode::Leaf {
            part_id,
            mime_type,
            filename,
            data,
            attachment_id,
            size,
        } => {
            if !filename.is_empty() {
                acc.attachments.push(AttachmentDescriptor {
                    filename: filename.clone(),
                    mime_type: if mime_type.is_empty() {
                        "application/octet-stream".to_string()
                    } else {
                        mime_type.clone()
                    },
                    size: *size,
                    attachment_id: attachment_id.clone(),
                    part_id: part_id.clone(),
                    inline_data: data.clone(),
                });
            } else if mime_type.starts_with("text/plain") {
                if let Some(bytes) = data {
                    acc.body_text = Some(decode_text(bytes));
                }
            } else if mime_type.starts_with("text/html") {
                if let Some(bytes) = data {
                    acc.body_html = Some(decode_text(bytes));
                }
            }
        }
    }
}

/// Extract structured content from a full message.
///
/// Never fails: every missing or malformed field resolves to an absent
/// value here, and to its documented default at the persistence boundary.
pub fn extract(message: &FullMessage) -> ExtractedContent {
    let headers = message
        .payload
        .as_ref()
        .map(headers_map)
        .unwrap_or_default();

    let subject = non_empty(headers.get("subject"));
    let sender = non_empty(headers.get("from"));
    let recipients = headers
        .get("to")
        .map(|v| split_addresses(v))
        .unwrap_or_default();
    let cc_recipients = headers
        .get("cc")
        .map(|v| split_addresses(v))
        .unwrap_or_default();

    // Date header first, provider receipt timestamp as fallback
    let received_at = headers
        .get("date")
        .and_then(|d| parse_date(d))
        .or_else(|| {
            message
                .internal_date
                .and_then(DateTime::<Utc>::from_timestamp_millis)
        });

    let snippet = message
        .snippet
        .as_deref()
        .map(decode_html_entities)
        .unwrap_or_default();

    let labels = message.label_ids.clone().unwrap_or_default();
    let is_read = !labels.iter().any(|l| l == "UNREAD");

    let mut acc = BodyAccumulator::default();
    if let Some(payload) = &message.payload {
        fold_parts(&PartNode::from_part(payload), &mut acc);
    }

    ExtractedContent {
        subject,
        sender,
        recipients,
        cc_recipients,
        received_at,
        snippet,
        body_text: acc.body_text,
        body_html: acc.body_html,
        labels,
        is_read,
        attachments: acc.attachments,
    }
}

/// Collect headers into a map keyed by lowercased name
fn headers_map(payload: &MessagePart) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    if let Some(header_list) = &payload.headers {
        for header in header_list {
            if let (Some(name), Some(value)) = (&header.name, &header.value) {
                headers.insert(name.to_lowercase(), value.clone());
            }
        }
    }

    headers
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a To/Cc header into individual addresses
fn split_addresses(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect()
}

/// Parse a Date header value
fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

/// Decoded textual part content; declared charset is UTF-8
fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decode the HTML entities the provider leaves in snippets
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}
