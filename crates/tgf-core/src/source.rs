//! Port over the backing user session that can see and download media.

use std::{fmt::Debug, path::{Path, PathBuf}};

use async_trait::async_trait;

use crate::{progress::ProgressReporter, Result};

/// One interpretation of a target reference, handed to [`MediaSource::lookup`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupKey {
    /// The reference as typed (username with or without `@`).
    Text(String),
    /// A numeric peer id in Bot API dialog form.
    Id(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Document,
    Other,
}

/// Minimal view of a media attachment, enough to name the staging file.
pub trait MediaHandle: Send + Sync {
    fn kind(&self) -> MediaKind;

    /// Original file name, when the attachment carries one.
    fn file_name(&self) -> Option<String>;

    /// Size in bytes, when known up front.
    fn size(&self) -> Option<u64>;

    /// Preferred staging file extension (without the dot).
    fn extension(&self) -> Option<String> {
        if let Some(name) = self.file_name() {
            if let Some(ext) = Path::new(&name).extension().and_then(|e| e.to_str()) {
                if !ext.is_empty() {
                    return Some(ext.to_lowercase());
                }
            }
        }
        match self.kind() {
            MediaKind::Photo => Some("jpg".to_string()),
            _ => None,
        }
    }
}

/// A fetched message, reduced to what the handler needs.
#[derive(Clone, Debug)]
pub struct FetchedMessage<M> {
    pub media: Option<M>,
}

/// The external client SDK, seen from the request handler.
///
/// `Ok(None)` means "looked, not there"; `Err` means the call itself failed.
#[async_trait]
pub trait MediaSource: Send + Sync {
    type Entity: Clone + Debug + Send + Sync;
    type Media: MediaHandle;

    /// Generic entity lookup.
    async fn lookup(&self, key: &LookupKey) -> Result<Option<Self::Entity>>;

    /// Build a channel peer reference directly from a bare channel id, without
    /// consulting the entity cache or the network.
    fn channel_peer(&self, bare_id: i64) -> Self::Entity;

    async fn fetch_message(
        &self,
        entity: &Self::Entity,
        message_id: i32,
    ) -> Result<Option<FetchedMessage<Self::Media>>>;

    /// Stream `media` into `dest`, reporting progress as bytes arrive.
    ///
    /// Returns the written path, or `None` if the SDK produced nothing.
    async fn download_media(
        &self,
        media: &Self::Media,
        dest: &Path,
        progress: ProgressReporter,
    ) -> Result<Option<PathBuf>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(MediaKind, Option<&'static str>);

    impl MediaHandle for Fixed {
        fn kind(&self) -> MediaKind {
            self.0
        }
        fn file_name(&self) -> Option<String> {
            self.1.map(str::to_string)
        }
        fn size(&self) -> Option<u64> {
            None
        }
    }

    #[test]
    fn extension_prefers_file_name() {
        assert_eq!(
            Fixed(MediaKind::Document, Some("Report.PDF")).extension().as_deref(),
            Some("pdf")
        );
        assert_eq!(Fixed(MediaKind::Photo, None).extension().as_deref(), Some("jpg"));
        assert_eq!(Fixed(MediaKind::Document, Some("README")).extension(), None);
    }
}
