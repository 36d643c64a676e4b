//! Generation-stamped slots for cross-runtime handles.
//!
//! Each [`SlotKind`] owns a process-wide monotone counter. A host thread
//! leases one value per kind on first use and gives it back when the thread
//! exits. Handles minted by the guest remember the value they were minted
//! under; before a handle is used the bridge compares that value with the
//! current thread's lease. A mismatch means the handle belongs to a dead
//! generation (a hot restart renewed the lease) or to another thread, and
//! it must not be touched.
//!
//! Values start at 1. Zero is never leased and marks a cleared stamp.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

/// The three independent slot categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Filter factories, one per configuration load.
    Factory,
    /// Per-route configuration overlays.
    RouteOverlay,
    /// Per-request filter instances.
    Instance,
}

impl SlotKind {
    /// The process-wide slot for this kind.
    #[must_use]
    pub fn slot(self) -> &'static EpochSlot {
        match self {
            Self::Factory => &FACTORY_SLOT,
            Self::RouteOverlay => &ROUTE_OVERLAY_SLOT,
            Self::Instance => &INSTANCE_SLOT,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Factory => 0,
            Self::RouteOverlay => 1,
            Self::Instance => 2,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Factory => "factory",
            Self::RouteOverlay => "route_overlay",
            Self::Instance => "instance",
        }
    }
}

/// A leased slot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Epoch {
    kind: SlotKind,
    value: u64,
}

impl Epoch {
    /// Rebuild an epoch from a stored raw value.
    #[must_use]
    pub fn from_raw(kind: SlotKind, value: u64) -> Self {
        Self { kind, value }
    }

    /// The slot kind this epoch was leased from.
    #[must_use]
    pub fn kind(self) -> SlotKind {
        self.kind
    }

    /// The raw counter value. Never zero for a leased epoch.
    #[must_use]
    pub fn value(self) -> u64 {
        self.value
    }

    /// Whether this is still the calling thread's lease for its kind.
    #[must_use]
    pub fn is_current(self) -> bool {
        self.kind.slot().is_current(self)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.value)
    }
}

/// A process-wide counter for one [`SlotKind`].
#[derive(Debug)]
pub struct EpochSlot {
    kind: SlotKind,
    next: AtomicU64,
    live: AtomicU64,
}

static FACTORY_SLOT: EpochSlot = EpochSlot::new(SlotKind::Factory);
static ROUTE_OVERLAY_SLOT: EpochSlot = EpochSlot::new(SlotKind::RouteOverlay);
static INSTANCE_SLOT: EpochSlot = EpochSlot::new(SlotKind::Instance);

/// A thread's lease on one slot; released when dropped.
struct Lease(Epoch);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.kind.slot().release(self.0);
    }
}

thread_local! {
    static LEASES: RefCell<[Option<Lease>; 3]> = const { RefCell::new([None, None, None]) };
}

impl EpochSlot {
    const fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            next: AtomicU64::new(1),
            live: AtomicU64::new(0),
        }
    }

    /// The kind this slot serves.
    #[must_use]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    /// Take a fresh value from the counter. Values are never handed out
    /// twice.
    #[must_use]
    pub fn acquire(&self) -> Epoch {
        let value = self.next.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
        trace!(slot = self.kind.as_str(), epoch = value, "acquired epoch");
        Epoch {
            kind: self.kind,
            value,
        }
    }

    /// Give a value back. Released values are not reused.
    pub fn release(&self, epoch: Epoch) {
        assert_eq!(
            epoch.kind, self.kind,
            "released {epoch} into the {} slot",
            self.kind.as_str()
        );
        self.live.fetch_sub(1, Ordering::AcqRel);
        trace!(slot = self.kind.as_str(), epoch = epoch.value, "released epoch");
    }

    /// Number of leases acquired and not yet released.
    #[must_use]
    pub fn live_leases(&self) -> u64 {
        self.live.load(Ordering::Acquire)
    }

    /// The calling thread's lease, acquired on first use.
    ///
    /// # Panics
    ///
    /// Panics if called while the thread's locals are being destroyed.
    #[must_use]
    pub fn current(&self) -> Epoch {
        LEASES.with(|leases| {
            let mut leases = leases.borrow_mut();
            let entry = &mut leases[self.kind.index()];
            if let Some(lease) = entry.as_ref() {
                return lease.0;
            }
            let epoch = self.acquire();
            *entry = Some(Lease(epoch));
            epoch
        })
    }

    /// Replace the calling thread's lease with a fresh value, releasing the
    /// old one. Called when the host reloads this category on the thread;
    /// every handle stamped with the old value becomes stale.
    pub fn renew(&self) -> Epoch {
        let epoch = self.acquire();
        let previous = LEASES.with(|leases| {
            leases.borrow_mut()[self.kind.index()].replace(Lease(epoch))
        });
        debug!(
            slot = self.kind.as_str(),
            epoch = epoch.value,
            previous = previous.as_ref().map(|lease| lease.0.value),
            "renewed epoch lease"
        );
        drop(previous);
        epoch
    }

    /// Whether `epoch` is the calling thread's current lease.
    ///
    /// Returns `false` when the thread has no lease yet or its locals are
    /// already gone.
    #[must_use]
    pub fn is_current(&self, epoch: Epoch) -> bool {
        if epoch.kind != self.kind {
            return false;
        }
        LEASES
            .try_with(|leases| {
                leases.borrow()[self.kind.index()]
                    .as_ref()
                    .is_some_and(|lease| lease.0 == epoch)
            })
            .unwrap_or(false)
    }
}
