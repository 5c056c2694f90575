use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use tracing::debug;

use tgf_core::{
    domain::{ChatId, MessageId, UserId},
    messaging::types::Command,
    security::AccessPolicy,
};

use crate::router::AppState;

const HELP_TEXT: &str = "Send /download <target> <message_id>\n\
Examples:\n\
/download @channelname 23\n\
/download -1001234567890 23\n\
/download https://t.me/c/3234242982/20\n\n\
Note: Only content the backing account is allowed to view can be fetched.";

const STATUS_DENIED: &str = "You are not authorized to check status.";

/// `/status` is for allow-listed users only; public mode does not open it.
fn may_view_status(policy: Option<&AccessPolicy>, user_id: Option<UserId>) -> bool {
    policy.is_some_and(|p| p.is_admin(user_id))
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

struct StatusReport<'a> {
    allowed_users: &'a [i64],
    public_mode: bool,
    max_concurrent: usize,
    in_flight: usize,
    started_at: DateTime<Utc>,
}

impl StatusReport<'_> {
    fn render(&self, now: DateTime<Utc>) -> String {
        let users = self
            .allowed_users
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let uptime = (now - self.started_at).num_seconds();
        format!(
            "Service running.\n\
Allowed users: [{users}]\n\
Public mode: {}\n\
Max concurrent: {}\n\
In flight: {}/{}\n\
Uptime: {}",
            self.public_mode,
            self.max_concurrent,
            self.in_flight,
            self.max_concurrent,
            format_duration(uptime)
        )
    }
}

fn command_from(msg: &Message) -> Option<Command> {
    let (name, args) = Command::parse(msg.text()?)?;
    let user = msg.from();
    Some(Command {
        chat_id: ChatId(msg.chat.id.0),
        user_id: user.map(|u| UserId(u.id.0 as i64)),
        username: user.and_then(|u| u.username.clone()),
        message_id: Some(MessageId(msg.id.0)),
        name,
        args,
    })
}

async fn reply(state: &AppState, cmd: &Command, text: &str) {
    let _ = state
        .messenger
        .send_text(cmd.chat_id, text, cmd.message_id)
        .await;
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(cmd) = command_from(&msg) else {
        return Ok(());
    };

    match cmd.name.as_str() {
        "start" | "help" => reply(&state, &cmd, HELP_TEXT).await,

        "status" => {
            if may_view_status(state.service.access_policy(), cmd.user_id) {
                let report = StatusReport {
                    allowed_users: &state.cfg.allowed_users,
                    public_mode: state.cfg.public_mode,
                    max_concurrent: state.service.admission().capacity(),
                    in_flight: state.service.admission().in_flight(),
                    started_at: state.started_at,
                };
                reply(&state, &cmd, &report.render(Utc::now())).await;
            } else {
                reply(&state, &cmd, STATUS_DENIED).await;
            }
        }

        "download" => {
            // Long transfers must not hold up the dispatcher.
            let service = Arc::clone(&state.service);
            tokio::spawn(async move {
                let _ = service.handle(&cmd).await;
            });
        }

        other => debug!(command = other, "ignoring unknown command"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_uptime() {
        assert_eq!(format_duration(-5), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3 * 3600 + 2 * 60 + 1), "3h 2m 1s");
    }

    #[test]
    fn status_report_lists_limits_and_load() {
        let started_at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2026-01-01T01:00:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let report = StatusReport {
            allowed_users: &[11, 22],
            public_mode: false,
            max_concurrent: 2,
            in_flight: 1,
            started_at,
        };
        assert_eq!(
            report.render(now),
            "Service running.\nAllowed users: [11, 22]\nPublic mode: false\n\
Max concurrent: 2\nIn flight: 1/2\nUptime: 1h 0m 30s"
        );
    }

    #[test]
    fn status_needs_the_allow_list_even_in_public_mode() {
        let policy = AccessPolicy::new(vec![5], true);
        assert!(may_view_status(Some(&policy), Some(UserId(5))));
        assert!(!may_view_status(Some(&policy), Some(UserId(6))));
        assert!(!may_view_status(Some(&policy), None));
        assert!(!may_view_status(None, Some(UserId(5))));
    }

    #[test]
    fn help_mentions_every_target_form() {
        assert!(HELP_TEXT.contains("@channelname"));
        assert!(HELP_TEXT.contains("-100"));
        assert!(HELP_TEXT.contains("t.me/c/"));
    }
}
