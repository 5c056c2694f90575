//! MTProto user session adapter (grammers).
//!
//! One authorized user session is both the [`MediaSource`] the request handler
//! fetches from and, in the userbot shape, the messenger that answers the
//! requester.

pub mod peers;
pub mod userbot;

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use grammers_client::{
    client::updates::UpdateStream,
    session::{defs::PeerRef, storages::TlSession},
    types::{Media, Peer},
    Client, InputMessage, UpdatesConfiguration,
};
use grammers_mtsender::SenderPool;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use tgf_core::{
    config::Config,
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities},
    },
    progress::ProgressReporter,
    source::{FetchedMessage, LookupKey, MediaHandle, MediaKind, MediaSource},
    Result,
};

use crate::peers::{channel_peer_ref, peer_ref_for_dialog, PeerCache};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn transport(call: &str, e: impl Display) -> Error {
    Error::Transport(format!("{call}: {e}"))
}

/// A connected, authorized user session.
pub struct MtprotoSession {
    client: Client,
    session: Arc<TlSession>,
    session_path: PathBuf,
    peers: PeerCache,
}

impl MtprotoSession {
    /// Load the session file, start the sender pool and check authorization.
    ///
    /// Interactive login is out of scope: the session file must already hold
    /// an authorized user.
    pub async fn connect(cfg: &Config) -> Result<(Arc<Self>, UpdateStream)> {
        let session = match tokio::fs::read(&cfg.session_path).await {
            Ok(bytes) => TlSession::load(&bytes).map_err(|e| {
                Error::Config(format!(
                    "session file {} is unreadable: {e}",
                    cfg.session_path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Config(format!(
                    "session file {} not found; log in with this account first",
                    cfg.session_path.display()
                )));
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let session = Arc::new(session);

        let pool = SenderPool::new(Arc::clone(&session), cfg.api_id);
        let client = Client::new(&pool);
        let SenderPool { runner, updates, .. } = pool;
        tokio::spawn(runner.run());

        let authorized = tokio::time::timeout(CONNECT_TIMEOUT, client.is_authorized())
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "is_authorized timed out after {}s",
                    CONNECT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| transport("is_authorized", e))?;
        if !authorized {
            return Err(Error::Config(format!(
                "session {} is not authorized",
                cfg.session_path.display()
            )));
        }
        match client.get_me().await {
            Ok(user) => {
                let account = Peer::User(user);
                info!(
                    account = %describe_account(
                        account.username(),
                        account.name(),
                        account.id().bot_api_dialog_id()
                    ),
                    "logged in as"
                );
            }
            Err(e) => warn!(error = %e, "get_me failed"),
        }

        // Only commands sent after startup are handled.
        let updates = client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );

        let me = Arc::new(Self {
            client,
            session,
            session_path: cfg.session_path.clone(),
            peers: PeerCache::default(),
        });
        me.save().await?;
        info!(session = %cfg.session_path.display(), "mtproto session connected");
        Ok((me, updates))
    }

    /// Persist the session (auth keys, DC, peer hashes) back to disk.
    pub async fn save(&self) -> Result<()> {
        tokio::fs::write(&self.session_path, self.session.save()).await?;
        Ok(())
    }

    pub fn peers(&self) -> &PeerCache {
        &self.peers
    }

    fn peer_for(&self, chat_id: ChatId) -> Result<PeerRef> {
        self.peers
            .get(chat_id.0)
            .ok_or_else(|| Error::InvalidInput(format!("no peer for chat {}", chat_id.0)))
    }
}

/// `@user (Name, id 42)` style label for the account behind the session.
fn describe_account(username: Option<&str>, name: Option<&str>, id: i64) -> String {
    let name = name.filter(|n| !n.trim().is_empty());
    match (username, name) {
        (Some(u), Some(n)) => format!("@{u} ({n}, id {id})"),
        (Some(u), None) => format!("@{u} (id {id})"),
        (None, Some(n)) => format!("{n} (id {id})"),
        (None, None) => format!("id {id}"),
    }
}

/// Username part of a textual reference, if it can be one.
fn username_of(raw: &str) -> Option<&str> {
    let name = raw.trim().trim_start_matches('@');
    let mut chars = name.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(name)
}

/// A message attachment as returned by grammers.
#[derive(Clone, Debug)]
pub struct MtprotoMedia(pub Media);

impl MediaHandle for MtprotoMedia {
    fn kind(&self) -> MediaKind {
        match &self.0 {
            Media::Photo(_) => MediaKind::Photo,
            Media::Document(_) => MediaKind::Document,
            _ => MediaKind::Other,
        }
    }

    fn file_name(&self) -> Option<String> {
        match &self.0 {
            Media::Document(d) => Some(d.name())
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            _ => None,
        }
    }

    fn size(&self) -> Option<u64> {
        match &self.0 {
            Media::Document(d) => u64::try_from(d.size()).ok().filter(|s| *s > 0),
            _ => None,
        }
    }

    fn extension(&self) -> Option<String> {
        match &self.0 {
            Media::Photo(_) => Some("jpg".to_string()),
            Media::Document(d) => Path::new(d.name())
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| !e.is_empty())
                .map(str::to_lowercase)
                .or_else(|| {
                    d.mime_type()
                        .and_then(mime_extension)
                        .map(str::to_string)
                }),
            _ => None,
        }
    }
}

fn mime_extension(mime: &str) -> Option<&'static str> {
    let ext = match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/mp4" => "m4a",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/x-tgsticker" => "tgs",
        _ => return None,
    };
    Some(ext)
}

#[async_trait]
impl MediaSource for MtprotoSession {
    type Entity = PeerRef;
    type Media = MtprotoMedia;

    async fn lookup(&self, key: &LookupKey) -> Result<Option<PeerRef>> {
        let peer = match key {
            LookupKey::Text(raw) => {
                let Some(username) = username_of(raw) else {
                    return Ok(None);
                };
                self.client
                    .resolve_username(username)
                    .await
                    .map_err(|e| transport("resolve_username", e))?
            }
            LookupKey::Id(dialog_id) => {
                let Some(peer_ref) = peer_ref_for_dialog(*dialog_id) else {
                    return Ok(None);
                };
                Some(
                    self.client
                        .resolve_peer(peer_ref)
                        .await
                        .map_err(|e| transport("resolve_peer", e))?,
                )
            }
        };

        Ok(peer.map(|peer| {
            let peer_ref = PeerRef::from(&peer);
            self.peers.remember(peer_ref.clone());
            peer_ref
        }))
    }

    fn channel_peer(&self, bare_id: i64) -> PeerRef {
        channel_peer_ref(bare_id)
    }

    async fn fetch_message(
        &self,
        entity: &PeerRef,
        message_id: i32,
    ) -> Result<Option<FetchedMessage<MtprotoMedia>>> {
        let mut msgs = self
            .client
            .get_messages_by_id(entity.clone(), &[message_id])
            .await
            .map_err(|e| transport("get_messages_by_id", e))?;
        Ok(msgs.pop().flatten().map(|msg| FetchedMessage {
            media: msg.media().map(MtprotoMedia),
        }))
    }

    async fn download_media(
        &self,
        media: &MtprotoMedia,
        dest: &Path,
        mut progress: ProgressReporter,
    ) -> Result<Option<PathBuf>> {
        let total = media.size();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut download = self.client.iter_download(&media.0);

        let mut received: u64 = 0;
        while let Some(chunk) = download
            .next()
            .await
            .map_err(|e| transport("download", e))?
        {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.report(received, total);
        }
        file.flush().await?;

        debug!(bytes = received, dest = %dest.display(), "download finished");
        if received == 0 {
            return Ok(None);
        }
        Ok(Some(dest.to_path_buf()))
    }
}

#[async_trait]
impl MessagingPort for MtprotoSession {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            supports_chat_actions: false,
            max_message_len: 4096,
        }
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef> {
        let peer = self.peer_for(chat_id)?;
        let msg = self
            .client
            .send_message(
                peer,
                InputMessage::new()
                    .text(text)
                    .reply_to(reply_to.map(|m| m.0)),
            )
            .await
            .map_err(|e| transport("send_message", e))?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id()),
        })
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        let peer = self.peer_for(msg.chat_id)?;
        self.client
            .edit_message(peer, msg.message_id.0, InputMessage::new().text(text))
            .await
            .map_err(|e| transport("edit_message", e))?;
        Ok(())
    }

    async fn send_file(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<MessageRef> {
        let peer = self.peer_for(chat_id)?;
        let uploaded = self
            .client
            .upload_file(path)
            .await
            .map_err(|e| transport("upload_file", e))?;
        let msg = self
            .client
            .send_message(peer, InputMessage::new().text(caption).file(uploaded))
            .await
            .map_err(|e| transport("send_message", e))?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id()),
        })
    }

    async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_label_uses_what_the_profile_has() {
        assert_eq!(
            describe_account(Some("alice"), Some("Alice B"), 42),
            "@alice (Alice B, id 42)"
        );
        assert_eq!(describe_account(Some("alice"), Some(" "), 42), "@alice (id 42)");
        assert_eq!(describe_account(None, Some("Alice"), 7), "Alice (id 7)");
        assert_eq!(describe_account(None, None, 7), "id 7");
    }

    #[test]
    fn only_username_shaped_text_is_looked_up() {
        assert_eq!(username_of("@news"), Some("news"));
        assert_eq!(username_of("Some_Channel42"), Some("Some_Channel42"));
        assert_eq!(username_of("-1001234567890"), None);
        assert_eq!(username_of("3234242982"), None);
        assert_eq!(username_of("+15551234"), None);
        assert_eq!(username_of("@"), None);
        assert_eq!(username_of("bad name"), None);
    }

    #[test]
    fn mime_fallback_covers_common_media() {
        assert_eq!(mime_extension("video/mp4"), Some("mp4"));
        assert_eq!(mime_extension("image/jpeg"), Some("jpg"));
        assert_eq!(mime_extension("application/octet-stream"), None);
    }
}
