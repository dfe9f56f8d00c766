//! Conversation event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Which side of the conversation produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Sender::User),
            "ai" => Ok(Sender::Ai),
            other => Err(Error::InvalidInput(format!("unknown sender '{}'", other))),
        }
    }
}

/// One message exchanged in a monitored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Caller-supplied reference; assigned at ingestion when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    /// Opaque conversation identifier
    pub session_id: String,
    /// Message author
    pub sender: Sender,
    /// Raw message text
    pub text: String,
    /// When the message was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(session_id: impl Into<String>, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            event_id: None,
            session_id: session_id.into(),
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Reject events the pipeline cannot process.
    ///
    /// This is the only failure surfaced synchronously to callers.
    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(Error::InvalidInput("session_id must not be empty".to_string()));
        }
        if self.text.trim().is_empty() {
            return Err(Error::InvalidInput("text must not be empty".to_string()));
        }
        Ok(())
    }
}
