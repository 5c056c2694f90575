//! Bot API dialog ids <-> MTProto peer references.

use std::{collections::HashMap, sync::Mutex};

use grammers_client::session::defs::{PeerAuth, PeerId, PeerRef};
use tgf_core::target::CHANNEL_ID_OFFSET;

/// Which MTProto peer kind a Bot API dialog id denotes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DialogKind {
    User(i64),
    Chat(i64),
    Channel(i64),
}

/// Split a Bot API dialog id into kind and bare id.
///
/// Positive ids are users, `-(10^12 + n)` is channel `n`, any other negative id
/// is a basic group.
pub fn classify_dialog_id(dialog_id: i64) -> Option<DialogKind> {
    match dialog_id {
        0 => None,
        id if id > 0 => Some(DialogKind::User(id)),
        id if id <= -(CHANNEL_ID_OFFSET + 1) => Some(DialogKind::Channel(-id - CHANNEL_ID_OFFSET)),
        id => Some(DialogKind::Chat(-id)),
    }
}

/// Peer reference with ambient authority (`access_hash = 0`).
///
/// Works for peers the session has already seen; the server rejects the rest.
pub fn peer_ref_for_dialog(dialog_id: i64) -> Option<PeerRef> {
    let id = match classify_dialog_id(dialog_id)? {
        DialogKind::User(bare) => PeerId::user(bare),
        DialogKind::Chat(bare) => PeerId::chat(bare),
        DialogKind::Channel(bare) => PeerId::channel(bare),
    };
    Some(PeerRef {
        id,
        auth: PeerAuth::default(),
    })
}

pub fn channel_peer_ref(bare_id: i64) -> PeerRef {
    PeerRef {
        id: PeerId::channel(bare_id),
        auth: PeerAuth::default(),
    }
}

/// Peers learned from incoming updates and lookups, keyed by dialog id.
///
/// Replies and status edits go through here so they carry a real access hash.
#[derive(Default)]
pub struct PeerCache {
    inner: Mutex<HashMap<i64, PeerRef>>,
}

impl PeerCache {
    pub fn remember(&self, peer: PeerRef) {
        let key = peer.id.bot_api_dialog_id();
        if let Ok(mut guard) = self.inner.lock() {
            guard.insert(key, peer);
        }
    }

    /// Cached reference, falling back to ambient authority.
    pub fn get(&self, dialog_id: i64) -> Option<PeerRef> {
        let cached = self
            .inner
            .lock()
            .ok()
            .and_then(|guard| guard.get(&dialog_id).cloned());
        cached.or_else(|| peer_ref_for_dialog(dialog_id))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
