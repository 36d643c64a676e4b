//! Prelude module - commonly used types for convenient import.
//!
//! Use `use tether_bridge::prelude::*;` to import all essential types.

// Errors
pub use crate::{BridgeError, BridgeResult};

// Lifecycle
pub use crate::{Epoch, EpochSlot, SlotKind};
pub use crate::{FactorySettings, FactoryTag, FilterFactory, FilterInstance, LifecycleState};
pub use crate::RouteOverlay;

// Guest seams
pub use crate::{ConfigProxy, Deliverable, FilterProxy};

// Host collaborators
pub use crate::host::{
    BufferInstance, DecoderFilterCallbacks, Dispatcher, EncoderFilterCallbacks, HeaderMap, Route,
    SecretProvider, Span, StatsScope, StreamFilterCallbacks,
};
