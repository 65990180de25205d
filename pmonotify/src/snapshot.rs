//! Immutable display state published by a producer.
//!
//! A [`Snapshot`] is a value: it is built once with a [`SnapshotBuilder`],
//! never mutated, cheap to clone and compared structurally. A content hash is
//! computed at construction and used as a fast inequality check before the
//! full field comparison.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::action::{ActionKind, ActionSource, MediaAction};

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv_hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= *byte as u64;
        *hash = hash.wrapping_mul(FNV_PRIME);
    }
}

fn fnv_hash_str(hash: &mut u64, value: &str) {
    fnv_hash_bytes(hash, &(value.len() as u64).to_le_bytes());
    fnv_hash_bytes(hash, value.as_bytes());
}

/// Distinguishes concurrently existing producers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionInstanceId(pub String);

impl SessionInstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionInstanceId(id.into())
    }

    pub fn generate() -> Self {
        SessionInstanceId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl TrackMetadata {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
        }
    }
}

/// Playback clock as reported by the producer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionState {
    pub duration: Duration,
    pub position: Duration,
    pub playback_rate: f64,
    /// Producer time at which `position` was sampled.
    pub updated_at: Duration,
}

impl PositionState {
    pub fn new(duration: Duration, position: Duration, playback_rate: f64, updated_at: Duration) -> Self {
        Self {
            duration,
            position,
            playback_rate,
            updated_at,
        }
    }

    /// Extrapolates the position at `now`, clamped to `[0, duration]`.
    pub fn estimated_position(&self, now: Duration) -> Duration {
        if now <= self.updated_at || self.playback_rate == 0.0 {
            return self.position.min(self.duration);
        }
        let elapsed = (now - self.updated_at).as_secs_f64() * self.playback_rate;
        let estimate = self.position.as_secs_f64() + elapsed;
        if !estimate.is_finite() {
            return self.position.min(self.duration);
        }
        let clamped = estimate.clamp(0.0, self.duration.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }

    fn hash_into(&self, hash: &mut u64) {
        fnv_hash_bytes(hash, &self.duration.as_nanos().to_le_bytes());
        fnv_hash_bytes(hash, &self.position.as_nanos().to_le_bytes());
        // -0.0 and 0.0 compare equal, so they must hash the same
        fnv_hash_bytes(hash, &(self.playback_rate + 0.0).to_bits().to_le_bytes());
        fnv_hash_bytes(hash, &self.updated_at.as_nanos().to_le_bytes());
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct IconData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Shared immutable image.
///
/// Two references are equal when they point at the same image or when the
/// images have the same dimensions and pixels.
#[derive(Clone, Debug)]
pub struct IconRef(Arc<IconData>);

impl IconRef {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        IconRef(Arc::new(IconData {
            width,
            height,
            pixels,
        }))
    }

    pub fn data(&self) -> &IconData {
        &self.0
    }

    fn hash_into(&self, hash: &mut u64) {
        fnv_hash_bytes(hash, &self.0.width.to_le_bytes());
        fnv_hash_bytes(hash, &self.0.height.to_le_bytes());
        fnv_hash_bytes(hash, &self.0.pixels);
    }
}

impl PartialEq for IconRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

/// Receives the actions the user triggers on the displayed state.
pub trait ActionListener: Send + Sync {
    fn on_action(&self, action: MediaAction, source: ActionSource);
}

impl<F> ActionListener for F
where
    F: Fn(MediaAction, ActionSource) + Send + Sync,
{
    fn on_action(&self, action: MediaAction, source: ActionSource) {
        self(action, source)
    }
}

/// Shared listener handle, compared by identity.
#[derive(Clone)]
pub struct ListenerRef(Arc<dyn ActionListener>);

impl ListenerRef {
    pub fn new(listener: impl ActionListener + 'static) -> Self {
        ListenerRef(Arc::new(listener))
    }

    pub fn notify(&self, action: MediaAction, source: ActionSource) {
        self.0.on_action(action, source);
    }
}

impl PartialEq for ListenerRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ListenerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ListenerRef(..)")
    }
}

#[derive(Debug)]
struct SnapshotData {
    session_id: SessionInstanceId,
    is_paused: bool,
    supported_actions: BTreeSet<ActionKind>,
    metadata: TrackMetadata,
    position: Option<PositionState>,
    icons: Vec<IconRef>,
    listener: Option<ListenerRef>,
    swipe_dismissible: bool,
    content_hash: u64,
}

impl SnapshotData {
    fn compute_hash(&self) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        fnv_hash_str(&mut hash, self.session_id.as_str());
        fnv_hash_bytes(&mut hash, &[self.is_paused as u8, self.swipe_dismissible as u8]);
        for action in &self.supported_actions {
            fnv_hash_bytes(&mut hash, &[*action as u8]);
        }
        fnv_hash_str(&mut hash, &self.metadata.title);
        fnv_hash_str(&mut hash, &self.metadata.artist);
        fnv_hash_str(&mut hash, &self.metadata.album);
        match &self.position {
            Some(position) => {
                fnv_hash_bytes(&mut hash, &[1]);
                position.hash_into(&mut hash);
            }
            None => fnv_hash_bytes(&mut hash, &[0]),
        }
        fnv_hash_bytes(&mut hash, &(self.icons.len() as u64).to_le_bytes());
        for icon in &self.icons {
            icon.hash_into(&mut hash);
        }
        hash
    }
}

/// One desired display state.
#[derive(Clone)]
pub struct Snapshot(Arc<SnapshotData>);

impl Snapshot {
    pub fn builder(session_id: SessionInstanceId) -> SnapshotBuilder {
        SnapshotBuilder::new(session_id)
    }

    /// Starts a builder pre-filled with this snapshot's fields.
    pub fn to_builder(&self) -> SnapshotBuilder {
        let data = &self.0;
        SnapshotBuilder {
            session_id: data.session_id.clone(),
            is_paused: data.is_paused,
            supported_actions: data.supported_actions.clone(),
            metadata: data.metadata.clone(),
            position: data.position,
            icons: data.icons.clone(),
            listener: data.listener.clone(),
            swipe_dismissible: data.swipe_dismissible,
        }
    }

    pub fn session_id(&self) -> &SessionInstanceId {
        &self.0.session_id
    }

    pub fn is_paused(&self) -> bool {
        self.0.is_paused
    }

    pub fn supported_actions(&self) -> &BTreeSet<ActionKind> {
        &self.0.supported_actions
    }

    pub fn supports(&self, action: ActionKind) -> bool {
        self.0.supported_actions.contains(&action)
    }

    pub fn metadata(&self) -> &TrackMetadata {
        &self.0.metadata
    }

    pub fn position(&self) -> Option<&PositionState> {
        self.0.position.as_ref()
    }

    pub fn icons(&self) -> &[IconRef] {
        &self.0.icons
    }

    pub fn listener(&self) -> Option<&ListenerRef> {
        self.0.listener.as_ref()
    }

    pub fn swipe_dismissible(&self) -> bool {
        self.0.swipe_dismissible
    }

    pub fn content_hash(&self) -> u64 {
        self.0.content_hash
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        let (a, b) = (&*self.0, &*other.0);
        a.content_hash == b.content_hash
            && a.session_id == b.session_id
            && a.is_paused == b.is_paused
            && a.swipe_dismissible == b.swipe_dismissible
            && a.supported_actions == b.supported_actions
            && a.metadata == b.metadata
            && a.position == b.position
            && a.icons == b.icons
            && a.listener == b.listener
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("session_id", &self.0.session_id)
            .field("is_paused", &self.0.is_paused)
            .field("supported_actions", &self.0.supported_actions)
            .field("title", &self.0.metadata.title)
            .field("swipe_dismissible", &self.0.swipe_dismissible)
            .field("content_hash", &format_args!("{:016x}", self.0.content_hash))
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotBuilder {
    session_id: SessionInstanceId,
    is_paused: bool,
    supported_actions: BTreeSet<ActionKind>,
    metadata: TrackMetadata,
    position: Option<PositionState>,
    icons: Vec<IconRef>,
    listener: Option<ListenerRef>,
    swipe_dismissible: bool,
}

impl SnapshotBuilder {
    pub fn new(session_id: SessionInstanceId) -> Self {
        Self {
            session_id,
            is_paused: false,
            supported_actions: BTreeSet::new(),
            metadata: TrackMetadata::default(),
            position: None,
            icons: Vec::new(),
            listener: None,
            swipe_dismissible: false,
        }
    }

    pub fn paused(mut self, is_paused: bool) -> Self {
        self.is_paused = is_paused;
        self
    }

    pub fn action(mut self, action: ActionKind) -> Self {
        self.supported_actions.insert(action);
        self
    }

    /// Replaces the supported action set.
    pub fn actions(mut self, actions: impl IntoIterator<Item = ActionKind>) -> Self {
        self.supported_actions = actions.into_iter().collect();
        self
    }

    pub fn metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn position(mut self, position: Option<PositionState>) -> Self {
        self.position = position;
        self
    }

    pub fn icon(mut self, icon: IconRef) -> Self {
        self.icons.push(icon);
        self
    }

    pub fn listener(mut self, listener: ListenerRef) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn swipe_dismissible(mut self, dismissible: bool) -> Self {
        self.swipe_dismissible = dismissible;
        self
    }

    pub fn build(self) -> Snapshot {
        let mut data = SnapshotData {
            session_id: self.session_id,
            is_paused: self.is_paused,
            supported_actions: self.supported_actions,
            metadata: self.metadata,
            position: self.position,
            icons: self.icons,
            listener: self.listener,
            swipe_dismissible: self.swipe_dismissible,
            content_hash: 0,
        };
        data.content_hash = data.compute_hash();
        Snapshot(Arc::new(data))
    }
}
