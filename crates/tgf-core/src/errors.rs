use std::time::Duration;

use crate::download::Stage;

/// Core error type.
///
/// Adapter crates map their SDK-specific failures into this type so the request
/// handler can treat every backend the same way.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failure of a single `/download` request.
///
/// Never propagated past the request handler: it is rendered into the status
/// message via [`RequestError::user_message`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("requester is not authorized")]
    Unauthorized,

    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    #[error("message {message_id} not found")]
    MessageNotFound { message_id: i32 },

    #[error("message {message_id} has no media")]
    NoMedia { message_id: i32 },

    #[error("admission ceiling reached")]
    Busy,

    #[error("{stage:?} failed: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: Error,
    },

    #[error("{stage:?} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
}

impl RequestError {
    pub fn transport(stage: Stage, source: Error) -> Self {
        Self::Transport { stage, source }
    }

    /// Text shown to the requester.
    pub fn user_message(&self) -> String {
        match self {
            Self::Usage(msg) => msg.clone(),
            Self::Unauthorized => {
                "You are not authorized to use this bot. Contact admin.".to_string()
            }
            Self::TargetNotFound { .. } => {
                "Could not resolve the target. Try @username or numeric chat id (-100...)."
                    .to_string()
            }
            Self::MessageNotFound { .. } => "Message not found.".to_string(),
            Self::NoMedia { .. } => "Message has no media to download.".to_string(),
            Self::Busy => "Server busy. Try again later.".to_string(),
            Self::Transport { stage, source } => {
                let detail = match source {
                    Error::Transport(s) | Error::External(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{} failed: {detail}", stage.action())
            }
            Self::Timeout { stage, .. } => format!("Timed out while {}.", stage.activity()),
        }
    }
}
