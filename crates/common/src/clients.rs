use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Lifecycle of a connected consumer. The only transition is `Open -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
}

/// Liveness flag for one channel.
#[derive(Debug)]
pub struct ChannelStatus {
    open: AtomicBool,
}

impl ChannelStatus {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
        }
    }

    /// Moves the channel to `Closed`. Returns `true` only for the call that
    /// performed the transition.
    pub fn close(&self) -> bool {
        self.open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn state(&self) -> ChannelState {
        if self.open.load(Ordering::Acquire) {
            ChannelState::Open
        } else {
            ChannelState::Closed
        }
    }
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything the broadcaster keeps in its active set.
pub trait Channel {
    fn id(&self) -> ClientId;
}

/// The set of live channels owned by a broadcaster.
///
/// The accept path inserts and the broadcast path removes; both go through
/// the same mutex. Iteration happens over [`ClientSet::snapshot`] so the lock
/// is never held while writing to a socket.
pub struct ClientSet<C> {
    inner: Arc<Mutex<Vec<Arc<C>>>>,
    next_id: Arc<AtomicU64>,
}

impl<C> Clone for ClientSet<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<C: Channel> ClientSet<C> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, channel: Arc<C>) {
        self.inner.lock().push(channel);
    }

    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.inner.lock().clone()
    }

    /// Removes the given channels and hands back the ones that were present.
    pub fn remove(&self, ids: &[ClientId]) -> Vec<Arc<C>> {
        if ids.is_empty() {
            return Vec::new();
        }
        let mut clients = self.inner.lock();
        let mut removed = Vec::with_capacity(ids.len());
        clients.retain(|c| {
            if ids.contains(&c.id()) {
                removed.push(Arc::clone(c));
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn drain(&self) -> Vec<Arc<C>> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.inner.lock().iter().any(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<C: Channel> Default for ClientSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: Vec<ClientId>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped.len()
    }
}
