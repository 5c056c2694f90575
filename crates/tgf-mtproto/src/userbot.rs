//! Update loop of the userbot shape.
//!
//! The user account watches its own updates for `/download` commands, in any
//! chat and in either direction, and runs each one as its own task.

use std::sync::Arc;

use grammers_client::{
    client::updates::UpdateStream, session::defs::PeerRef, types::Message, Update,
};
use tracing::{debug, info, warn};

use tgf_core::{
    domain::{ChatId, MessageId},
    download::DownloadService,
    messaging::types::Command,
    Result,
};

use crate::{transport, MtprotoSession};

/// Turn an incoming or outgoing message into a `/download` command.
fn download_command(msg: &Message) -> Option<Command> {
    let (name, args) = Command::parse(msg.text())?;
    if name != "download" {
        return None;
    }
    Some(Command {
        chat_id: ChatId(msg.peer_id().bot_api_dialog_id()),
        user_id: None,
        username: None,
        message_id: Some(MessageId(msg.id())),
        name,
        args,
    })
}

/// Serve `/download` until Ctrl-C or the update stream fails.
pub async fn run(
    session: Arc<MtprotoSession>,
    service: Arc<DownloadService<MtprotoSession>>,
    mut updates: UpdateStream,
) -> Result<()> {
    info!(
        capacity = service.admission().capacity(),
        mode = ?service.admission().mode(),
        "userbot listening for /download"
    );

    loop {
        let update = tokio::select! {
            update = updates.next() => update.map_err(|e| transport("updates", e))?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
        };

        let Update::NewMessage(msg) = update else {
            continue;
        };
        let Some(cmd) = download_command(&msg) else {
            continue;
        };
        if let Ok(peer) = msg.peer() {
            session.peers().remember(PeerRef::from(peer));
        }
        debug!(chat_id = cmd.chat_id.0, outgoing = msg.outgoing(), "download command received");

        let service = Arc::clone(&service);
        tokio::spawn(async move {
            // Failures are already reported in the chat.
            let _ = service.handle(&cmd).await;
        });
    }

    if let Err(e) = session.save().await {
        warn!(error = %e, "failed to persist session");
    }
    Ok(())
}

/// Keep the bridge's user session update queue drained.
///
/// Peers seen on the way are cached for later lookups.
pub async fn discard_updates(session: Arc<MtprotoSession>, mut updates: UpdateStream) {
    loop {
        match updates.next().await {
            Ok(Update::NewMessage(msg)) => {
                if let Ok(peer) = msg.peer() {
                    session.peers().remember(PeerRef::from(peer));
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "user session update stream ended");
                return;
            }
        }
    }
}
