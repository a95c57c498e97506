//! Plain data structures for the transport boundary. Full MIME/SMTP handling
//! is out of scope (`spec.md` §1 Non-goals); these structs carry only the
//! fields the rest of the crate reads or writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub received_at: DateTime<Utc>,
    /// Parsed `protocol.json` attachment content, if the message carried one.
    /// MIME decoding itself is the transport's job; this is the one
    /// structured field the engine layer needs out of the attachment.
    #[serde(default)]
    pub protocol_attachment: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

impl OutboundEmail {
    pub fn new(to: Vec<String>, subject: impl Into<String>, body_text: impl Into<String>) -> Self {
        OutboundEmail {
            to,
            subject: subject.into(),
            body_text: body_text.into(),
            in_reply_to: None,
            references: Vec::new(),
        }
    }

    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.in_reply_to = Some(message_id.into());
        self
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }
}
