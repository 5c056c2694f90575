//! Target parsing and resolution.
//!
//! A target may be `@username`, a bare username, a signed numeric chat id, or a
//! `t.me` deep link optionally carrying a message id. The same numeric id can
//! name different peers depending on the addressing scheme, so resolution walks
//! a fixed, ordered list of interpretations and returns the first one the
//! session accepts.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::source::{LookupKey, MediaSource};

/// Offset between a channel's bare id and its Bot API dialog id (`-100<id>`).
pub const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

fn deep_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:https?://)?(?:www\.)?t(?:elegram)?\.me/(?:[cs]/)?([^/\s?#]+)((?:/\d+)*)/?(?:[?#]\S*)?$",
        )
        .expect("deep link regex")
    })
}

/// A parsed target reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetSpec {
    /// The chat reference to resolve (deep links reduced to their chat segment).
    pub chat_ref: String,
    /// Message id embedded in a deep link, if any.
    pub link_message_id: Option<i32>,
}

impl TargetSpec {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(caps) = deep_link_re().captures(raw) {
            if let Some(chat) = caps.get(1) {
                // Topic links carry `/<topic>/<msg>`; the message is the last segment.
                let link_message_id = caps
                    .get(2)
                    .and_then(|m| m.as_str().rsplit('/').next())
                    .and_then(|id| id.parse::<i32>().ok())
                    .filter(|id| *id > 0);
                return Self {
                    chat_ref: chat.as_str().to_string(),
                    link_message_id,
                };
            }
        }
        Self {
            chat_ref: raw.to_string(),
            link_message_id: None,
        }
    }
}

/// One way of interpreting a chat reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Candidate {
    Lookup(LookupKey),
    /// Local channel peer built from a bare id; never fails.
    ChannelPeer(i64),
}

/// Interpretations of `chat_ref`, in the order they must be tried.
pub fn candidates(chat_ref: &str) -> Vec<Candidate> {
    let mut out = vec![Candidate::Lookup(LookupKey::Text(chat_ref.to_string()))];

    if let Ok(n) = chat_ref.parse::<i64>() {
        out.push(Candidate::Lookup(LookupKey::Id(n)));
        if n > 0 {
            if let Some(dialog_id) = CHANNEL_ID_OFFSET.checked_add(n).map(|v| -v) {
                out.push(Candidate::Lookup(LookupKey::Id(dialog_id)));
            }
        }
    }

    if !chat_ref.is_empty() && chat_ref.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = chat_ref.parse::<i64>() {
            out.push(Candidate::ChannelPeer(n));
        }
    }

    out
}

/// How a target was resolved.
#[derive(Clone, Debug)]
pub struct Resolved<E> {
    pub entity: E,
    pub via: Candidate,
}

/// Outcome of a single candidate attempt.
enum Attempt<E> {
    Found(E),
    NotFound,
}

async fn attempt<S: MediaSource>(source: &S, candidate: &Candidate) -> Attempt<S::Entity> {
    match candidate {
        Candidate::ChannelPeer(id) => Attempt::Found(source.channel_peer(*id)),
        Candidate::Lookup(key) => match source.lookup(key).await {
            Ok(Some(entity)) => Attempt::Found(entity),
            Ok(None) => Attempt::NotFound,
            Err(e) => {
                debug!(?key, error = %e, "lookup failed; trying next candidate");
                Attempt::NotFound
            }
        },
    }
}

/// Resolves chat references against a [`MediaSource`].
pub struct TargetResolver<'a, S> {
    source: &'a S,
}

impl<'a, S: MediaSource> TargetResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Resolve a raw target (deep links included); `None` when every
    /// interpretation was rejected.
    pub async fn resolve(&self, raw: &str) -> Option<Resolved<S::Entity>> {
        let spec = TargetSpec::parse(raw);
        for candidate in candidates(&spec.chat_ref) {
            if let Attempt::Found(entity) = attempt(self.source, &candidate).await {
                debug!(chat_ref = %spec.chat_ref, via = ?candidate, "target resolved");
                return Some(Resolved {
                    entity,
                    via: candidate,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        progress::ProgressReporter,
        source::{FetchedMessage, MediaHandle, MediaKind},
        Error, Result,
    };
    use async_trait::async_trait;
    use std::{
        path::{Path, PathBuf},
        sync::Mutex,
    };

    struct NoMedia;

    impl MediaHandle for NoMedia {
        fn kind(&self) -> MediaKind {
            MediaKind::Other
        }
        fn file_name(&self) -> Option<String> {
            None
        }
        fn size(&self) -> Option<u64> {
            None
        }
    }

    /// Accepts the listed keys; errors on keys in `failing`.
    #[derive(Default)]
    struct Directory {
        accept: Vec<(LookupKey, &'static str)>,
        failing: Vec<LookupKey>,
        calls: Mutex<Vec<LookupKey>>,
    }

    #[async_trait]
    impl MediaSource for Directory {
        type Entity = String;
        type Media = NoMedia;

        async fn lookup(&self, key: &LookupKey) -> Result<Option<String>> {
            self.calls.lock().unwrap().push(key.clone());
            if self.failing.contains(key) {
                return Err(Error::Transport("USERNAME_INVALID".into()));
            }
            Ok(self
                .accept
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, name)| name.to_string()))
        }

        fn channel_peer(&self, bare_id: i64) -> String {
            format!("peer:{bare_id}")
        }

        async fn fetch_message(
            &self,
            _entity: &String,
            _message_id: i32,
        ) -> Result<Option<FetchedMessage<NoMedia>>> {
            Ok(None)
        }

        async fn download_media(
            &self,
            _media: &NoMedia,
            _dest: &Path,
            _progress: ProgressReporter,
        ) -> Result<Option<PathBuf>> {
            Ok(None)
        }
    }

    fn text(s: &str) -> LookupKey {
        LookupKey::Text(s.to_string())
    }

    #[test]
    fn parses_private_channel_links() {
        let spec = TargetSpec::parse("https://t.me/c/3234242982/20");
        assert_eq!(spec.chat_ref, "3234242982");
        assert_eq!(spec.link_message_id, Some(20));

        let spec = TargetSpec::parse("t.me/c/3234242982");
        assert_eq!(spec.chat_ref, "3234242982");
        assert_eq!(spec.link_message_id, None);
    }

    #[test]
    fn parses_public_links_and_plain_refs() {
        let spec = TargetSpec::parse("https://t.me/durov/123");
        assert_eq!(spec.chat_ref, "durov");
        assert_eq!(spec.link_message_id, Some(123));

        let spec = TargetSpec::parse("https://telegram.me/news/");
        assert_eq!(spec.chat_ref, "news");
        assert_eq!(spec.link_message_id, None);

        assert_eq!(TargetSpec::parse(" @news ").chat_ref, "@news");
        assert_eq!(TargetSpec::parse("-1001234567890").chat_ref, "-1001234567890");
    }

    #[test]
    fn preview_and_topic_links() {
        let spec = TargetSpec::parse("https://t.me/s/durov/123");
        assert_eq!(spec.chat_ref, "durov");
        assert_eq!(spec.link_message_id, Some(123));

        let spec = TargetSpec::parse("t.me/c/123/45/67");
        assert_eq!(spec.chat_ref, "123");
        assert_eq!(spec.link_message_id, Some(67));

        let spec = TargetSpec::parse("https://t.me/durov/123?single");
        assert_eq!(spec.link_message_id, Some(123));
    }

    #[test]
    fn other_hosts_are_not_deep_links() {
        let spec = TargetSpec::parse("https://start.me/x/5");
        assert_eq!(spec.chat_ref, "https://start.me/x/5");
        assert_eq!(spec.link_message_id, None);

        let spec = TargetSpec::parse("https://evil.com/t.me/x/5");
        assert_eq!(spec.link_message_id, None);
    }

    #[test]
    fn numeric_candidates_follow_fixed_order() {
        assert_eq!(
            candidates("3234242982"),
            vec![
                Candidate::Lookup(text("3234242982")),
                Candidate::Lookup(LookupKey::Id(3234242982)),
                Candidate::Lookup(LookupKey::Id(-1003234242982)),
                Candidate::ChannelPeer(3234242982),
            ]
        );
    }

    #[test]
    fn signed_and_textual_candidates() {
        assert_eq!(
            candidates("-1001234567890"),
            vec![
                Candidate::Lookup(text("-1001234567890")),
                Candidate::Lookup(LookupKey::Id(-1001234567890)),
            ]
        );
        assert_eq!(candidates("@news"), vec![Candidate::Lookup(text("@news"))]);
    }

    #[tokio::test]
    async fn username_resolves_directly() {
        let dir = Directory {
            accept: vec![(text("@news"), "news")],
            ..Default::default()
        };
        let got = TargetResolver::new(&dir).resolve("@news").await.unwrap();
        assert_eq!(got.entity, "news");
        assert_eq!(dir.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_accepted_interpretation_wins() {
        // Both the raw id and the channel form exist; the raw id is tried first.
        let dir = Directory {
            accept: vec![
                (LookupKey::Id(-1003234242982), "channel"),
                (LookupKey::Id(3234242982), "user"),
            ],
            ..Default::default()
        };
        let got = TargetResolver::new(&dir).resolve("3234242982").await.unwrap();
        assert_eq!(got.entity, "user");
        assert_eq!(got.via, Candidate::Lookup(LookupKey::Id(3234242982)));
    }

    #[tokio::test]
    async fn lookup_errors_fall_through_to_channel_form() {
        let dir = Directory {
            accept: vec![(LookupKey::Id(-1003234242982), "channel")],
            failing: vec![text("3234242982"), LookupKey::Id(3234242982)],
            ..Default::default()
        };
        let got = TargetResolver::new(&dir)
            .resolve("https://t.me/c/3234242982/20")
            .await
            .unwrap();
        assert_eq!(got.entity, "channel");
        assert_eq!(
            *dir.calls.lock().unwrap(),
            vec![
                text("3234242982"),
                LookupKey::Id(3234242982),
                LookupKey::Id(-1003234242982)
            ]
        );
    }

    #[tokio::test]
    async fn unknown_numeric_falls_back_to_channel_peer() {
        let dir = Directory::default();
        let got = TargetResolver::new(&dir).resolve("777").await.unwrap();
        assert_eq!(got.entity, "peer:777");
        assert_eq!(got.via, Candidate::ChannelPeer(777));
        assert_eq!(dir.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn exhausted_candidates_is_not_found() {
        let dir = Directory {
            failing: vec![text("@ghost")],
            ..Default::default()
        };
        assert!(TargetResolver::new(&dir).resolve("@ghost").await.is_none());
        assert!(TargetResolver::new(&dir).resolve("-42").await.is_none());
    }
}
