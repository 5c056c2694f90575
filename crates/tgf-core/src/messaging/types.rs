use crate::domain::{ChatId, MessageId, UserId};

/// A slash command as received by either deployment shape.
#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    /// The message carrying the command, if the status reply should thread to it.
    pub message_id: Option<MessageId>,
    pub name: String,
    pub args: String,
}

impl Command {
    /// Split raw message text into a command. Returns `None` for non-commands.
    ///
    /// Telegram may send `/cmd@botname arg1 ...`.
    pub fn parse(text: &str) -> Option<(String, String)> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next().unwrap_or("").trim();
        let rest = parts.next().unwrap_or("").trim().to_string();

        let name = first
            .trim_start_matches('/')
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if name.is_empty() {
            return None;
        }

        Some((name, rest))
    }
}

/// Outgoing "chat action" shown while a file is on its way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    UploadDocument,
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub supports_chat_actions: bool,
    /// Longest text the transport accepts, in characters.
    pub max_message_len: usize,
}
