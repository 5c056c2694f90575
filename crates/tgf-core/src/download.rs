//! `/download` request handling.
//!
//! One request runs through
//! `Received -> Parsed -> Resolving -> Resolved -> Admitted -> FetchingMessage ->
//! HasMedia -> Downloading -> Uploading -> Done`, stopping at the first failure.
//! Every failure is rendered into the request's status message; nothing escapes
//! to the caller except the [`RequestError`] value itself.

use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    admission::{AdmissionController, AdmissionMode},
    config::{Config, Shape},
    domain::{ChatId, MessageId, MessageRef},
    errors::{Error, RequestError},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
        types::{ChatAction, Command},
    },
    progress::ProgressReporter,
    security::AccessPolicy,
    source::{MediaHandle, MediaSource},
    target::{Candidate, TargetResolver, TargetSpec},
    utils::{remove_staging_file, staging_path, truncate_text},
    Result,
};

pub const USAGE: &str = "Usage: /download <target> <message_id>\n\
Examples:\n\
/download @channelname 23\n\
/download -1001234567890 23\n\
/download https://t.me/c/3234242982/20";

/// Request lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Parsed,
    Resolving,
    Resolved,
    Admitted,
    FetchingMessage,
    HasMedia,
    Downloading,
    Uploading,
    Done,
}

impl Stage {
    /// Noun form for "<action> failed" messages.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Received | Self::Parsed => "Request",
            Self::Resolving | Self::Resolved => "Resolve",
            Self::Admitted => "Admission",
            Self::FetchingMessage | Self::HasMedia => "Fetch",
            Self::Downloading => "Download",
            Self::Uploading | Self::Done => "Upload",
        }
    }

    /// Gerund form for "timed out while <activity>" messages.
    pub fn activity(&self) -> &'static str {
        match self {
            Self::Received | Self::Parsed => "reading the request",
            Self::Resolving | Self::Resolved => "resolving the target",
            Self::Admitted => "waiting for a slot",
            Self::FetchingMessage | Self::HasMedia => "fetching the message",
            Self::Downloading => "downloading",
            Self::Uploading | Self::Done => "uploading",
        }
    }
}

/// A parsed `/download` command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Chat reference to resolve (deep links already reduced).
    pub target: String,
    pub message_id: i32,
    pub requester: ChatId,
}

impl DownloadRequest {
    /// Parse `<target> [message_id]`. A deep link's message id overrides a
    /// separately supplied one; otherwise the second argument is required.
    pub fn parse(args: &str, requester: ChatId) -> std::result::Result<Self, RequestError> {
        let mut parts = args.split_whitespace();
        let Some(raw_target) = parts.next() else {
            return Err(RequestError::Usage(USAGE.to_string()));
        };
        let explicit_id = parts.next();

        let spec = TargetSpec::parse(raw_target);
        if spec.chat_ref.is_empty() {
            return Err(RequestError::Usage(USAGE.to_string()));
        }

        let message_id = match (spec.link_message_id, explicit_id) {
            (Some(id), _) => id,
            (None, Some(raw)) => parse_message_id(raw)?,
            (None, None) => return Err(RequestError::Usage(USAGE.to_string())),
        };

        Ok(Self {
            target: spec.chat_ref,
            message_id,
            requester,
        })
    }

    pub fn caption(&self) -> String {
        format!(
            "Downloaded from {} message {}",
            self.target, self.message_id
        )
    }
}

fn parse_message_id(raw: &str) -> std::result::Result<i32, RequestError> {
    match raw.trim().parse::<i32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(RequestError::Usage(
            "Invalid message id. It must be a positive integer.".to_string(),
        )),
    }
}

/// Tunables of the request handler.
#[derive(Clone, Debug)]
pub struct DownloadSettings {
    pub staging_dir: PathBuf,
    pub progress_step: u8,
    /// Bound on each SDK stage after admission. `None` waits forever.
    pub stage_timeout: Option<Duration>,
}

impl DownloadSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            staging_dir: cfg.download_dir.clone(),
            progress_step: cfg.progress_step,
            stage_timeout: cfg.transfer_timeout,
        }
    }
}

/// A file delivered to the requester.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub file_name: String,
    pub caption: String,
    pub resolved_via: Candidate,
}

/// The single status message of a request, edited in place.
struct StatusMessage<'a> {
    messenger: &'a dyn MessagingPort,
    chat_id: ChatId,
    reply_to: Option<MessageId>,
    current: Option<MessageRef>,
}

impl<'a> StatusMessage<'a> {
    fn new(messenger: &'a dyn MessagingPort, chat_id: ChatId, reply_to: Option<MessageId>) -> Self {
        Self {
            messenger,
            chat_id,
            reply_to,
            current: None,
        }
    }

    async fn set(&mut self, text: &str) {
        let caps = self.messenger.capabilities();
        let text = &truncate_text(text, caps.max_message_len);
        if let Some(msg) = self.current {
            if caps.supports_edit {
                if let Err(e) = self.messenger.edit_text(msg, text).await {
                    warn!(chat_id = self.chat_id.0, error = %e, "status edit failed");
                }
                return;
            }
        }

        match self
            .messenger
            .send_text(self.chat_id, text, self.reply_to)
            .await
        {
            Ok(msg) => self.current = Some(msg),
            Err(e) => warn!(chat_id = self.chat_id.0, error = %e, "status send failed"),
        }
    }
}

/// Orchestrates `/download` requests against one backing session.
pub struct DownloadService<S: MediaSource> {
    source: Arc<S>,
    messenger: Arc<dyn MessagingPort>,
    admission: AdmissionController,
    access: Option<AccessPolicy>,
    settings: DownloadSettings,
}

impl<S: MediaSource> DownloadService<S> {
    pub fn new(
        source: Arc<S>,
        messenger: Arc<dyn MessagingPort>,
        admission: AdmissionController,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            source,
            messenger,
            admission,
            access: None,
            settings,
        }
    }

    /// Wire a service the way a deployment shape runs it: outbound calls
    /// throttled per chat, and the access gate in front of the bridge.
    pub fn from_config(cfg: &Config, source: Arc<S>, messenger: Arc<dyn MessagingPort>) -> Self {
        let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
            messenger,
            ThrottleConfig::with_per_chat(cfg.status_edit_interval),
        ));
        let service = Self::new(
            source,
            messenger,
            AdmissionController::new(cfg.max_concurrent, cfg.admission_mode),
            DownloadSettings::from_config(cfg),
        );
        match cfg.shape {
            Shape::Bridge => service.with_access_policy(AccessPolicy::new(
                cfg.allowed_users.clone(),
                cfg.public_mode,
            )),
            Shape::Userbot => service,
        }
    }

    /// Require requesters to pass `policy` (bridge shape).
    pub fn with_access_policy(mut self, policy: AccessPolicy) -> Self {
        self.access = Some(policy);
        self
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn access_policy(&self) -> Option<&AccessPolicy> {
        self.access.as_ref()
    }

    /// The (throttled) messenger status updates go through.
    pub fn messenger(&self) -> Arc<dyn MessagingPort> {
        Arc::clone(&self.messenger)
    }

    /// Handle one `/download` command end to end.
    pub async fn handle(&self, cmd: &Command) -> std::result::Result<Delivery, RequestError> {
        debug!(chat_id = cmd.chat_id.0, stage = ?Stage::Received, "download command");

        if let Some(policy) = &self.access {
            if !policy.allows(cmd.user_id) {
                info!(
                    user_id = cmd.user_id.map(|u| u.0),
                    username = cmd.username.as_deref().unwrap_or("unknown"),
                    "unauthorized download request"
                );
                return Err(self.reject(cmd, RequestError::Unauthorized).await);
            }
        }

        let req = match DownloadRequest::parse(&cmd.args, cmd.chat_id) {
            Ok(req) => req,
            Err(e) => return Err(self.reject(cmd, e).await),
        };
        debug!(chat_ref = %req.target, message_id = req.message_id, stage = ?Stage::Parsed, "request parsed");

        let mut status = StatusMessage::new(self.messenger.as_ref(), cmd.chat_id, cmd.message_id);
        match self.run(&req, &mut status).await {
            Ok(delivery) => {
                info!(
                    chat_id = req.requester.0,
                    chat_ref = %req.target,
                    message_id = req.message_id,
                    file = %delivery.file_name,
                    "download delivered"
                );
                Ok(delivery)
            }
            Err(e) => {
                info!(
                    chat_id = req.requester.0,
                    chat_ref = %req.target,
                    message_id = req.message_id,
                    error = %e,
                    "download failed"
                );
                status.set(&e.user_message()).await;
                Err(e)
            }
        }
    }

    /// Reply with `err` without creating a status message.
    async fn reject(&self, cmd: &Command, err: RequestError) -> RequestError {
        if let Err(e) = self
            .messenger
            .send_text(cmd.chat_id, &err.user_message(), cmd.message_id)
            .await
        {
            warn!(chat_id = cmd.chat_id.0, error = %e, "failed to send rejection");
        }
        err
    }

    async fn run(
        &self,
        req: &DownloadRequest,
        status: &mut StatusMessage<'_>,
    ) -> std::result::Result<Delivery, RequestError> {
        status.set("Resolving target...").await;
        let resolved = TargetResolver::new(self.source.as_ref())
            .resolve(&req.target)
            .await
            .ok_or_else(|| RequestError::TargetNotFound {
                target: req.target.clone(),
            })?;
        debug!(chat_ref = %req.target, via = ?resolved.via, stage = ?Stage::Resolved, "target resolved");

        if self.admission.mode() == AdmissionMode::Queue && self.admission.is_saturated() {
            status.set("Waiting for a free download slot...").await;
        }
        let slot = self
            .admission
            .acquire()
            .await
            .map_err(|_| RequestError::Busy)?;
        debug!(in_flight = self.admission.in_flight(), stage = ?Stage::Admitted, "slot acquired");

        let result = self.fetch_and_deliver(req, &resolved.entity, status).await;
        slot.release();

        result.map(|(file_name, caption)| Delivery {
            file_name,
            caption,
            resolved_via: resolved.via,
        })
    }

    async fn fetch_and_deliver(
        &self,
        req: &DownloadRequest,
        entity: &S::Entity,
        status: &mut StatusMessage<'_>,
    ) -> std::result::Result<(String, String), RequestError> {
        status.set("Fetching message...").await;
        let message = self
            .stage(
                Stage::FetchingMessage,
                self.source.fetch_message(entity, req.message_id),
            )
            .await?
            .ok_or(RequestError::MessageNotFound {
                message_id: req.message_id,
            })?;
        let media = message.media.ok_or(RequestError::NoMedia {
            message_id: req.message_id,
        })?;
        debug!(kind = ?media.kind(), size = ?media.size(), stage = ?Stage::HasMedia, "message has media");

        let staging_dir = &self.settings.staging_dir;
        let dest = staging_path(
            staging_dir,
            &req.target,
            req.message_id,
            media.file_name().as_deref(),
            media.extension().as_deref(),
        );
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RequestError::transport(Stage::Downloading, Error::Io(e)))?;
        }

        status.set("Starting download...").await;
        let downloaded = self.download_with_progress(&media, &dest, status).await;
        let path = match downloaded {
            Ok(Some(path)) => path,
            Ok(None) => {
                remove_staging_file(&dest, staging_dir).await;
                return Err(RequestError::transport(
                    Stage::Downloading,
                    Error::External("no path returned".to_string()),
                ));
            }
            Err(e) => {
                remove_staging_file(&dest, staging_dir).await;
                return Err(e);
            }
        };

        status.set("Uploading...").await;
        if self.messenger.capabilities().supports_chat_actions {
            let _ = self
                .messenger
                .send_chat_action(req.requester, ChatAction::UploadDocument)
                .await;
        }
        let caption = req.caption();
        let uploaded = self
            .stage(
                Stage::Uploading,
                self.messenger.send_file(req.requester, &path, &caption),
            )
            .await;

        remove_staging_file(&path, staging_dir).await;
        if path != dest {
            remove_staging_file(&dest, staging_dir).await;
        }
        uploaded?;

        status.set("Done. File sent.").await;
        debug!(stage = ?Stage::Done, "request complete");

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok((file_name, caption))
    }

    /// Run the download while draining progress updates into the status message.
    async fn download_with_progress(
        &self,
        media: &S::Media,
        dest: &std::path::Path,
        status: &mut StatusMessage<'_>,
    ) -> std::result::Result<Option<PathBuf>, RequestError> {
        let (reporter, mut updates) = ProgressReporter::channel(self.settings.progress_step);

        let download = self.stage(
            Stage::Downloading,
            self.source.download_media(media, dest, reporter),
        );
        let drain = async {
            // Ends once the reporter is dropped with the finished download.
            while updates.changed().await.is_ok() {
                let latest = *updates.borrow_and_update();
                if let Some(update) = latest {
                    status.set(&update.status_line()).await;
                }
            }
        };

        let (downloaded, ()) = tokio::join!(download, drain);
        downloaded
    }

    async fn stage<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, RequestError> {
        let res = match self.settings.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| RequestError::Timeout {
                    stage,
                    after: limit,
                })?,
            None => fut.await,
        };
        res.map_err(|e| {
            warn!(stage = ?stage, error = %e, "sdk call failed");
            RequestError::transport(stage, e)
        })
    }
}
