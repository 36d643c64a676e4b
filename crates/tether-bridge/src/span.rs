//! Spans the guest opens and finishes by numeric id.
//!
//! The guest cannot hold host spans directly, so the registry owns them and
//! hands out ids. Two ids are reserved: [`DECODER_SPAN`] and
//! [`ENCODER_SPAN`] name the stream's ambient spans and resolve through the
//! current callback bindings instead of the table. Unknown ids resolve to a
//! [`NoopSpan`], so a late or duplicate `finish` is harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::host::{DecoderFilterCallbacks, EncoderFilterCallbacks, Span};

/// Id of the decoder's ambient span.
pub const DECODER_SPAN: i64 = -1;

/// Id of the encoder's ambient span.
pub const ENCODER_SPAN: i64 = 0;

/// A span that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSpan;

impl Span for NoopSpan {
    fn spawn_child(&self, _name: &str, _start: DateTime<Utc>) -> Arc<dyn Span> {
        Arc::new(NoopSpan)
    }

    fn set_tag(&self, _key: &str, _value: &str) {}

    fn log(&self, _timestamp: DateTime<Utc>, _event: &str) {}

    fn finish(&self) {}
}

#[derive(Default)]
struct Bindings {
    decoder: Option<Arc<dyn DecoderFilterCallbacks>>,
    encoder: Option<Arc<dyn EncoderFilterCallbacks>>,
}

/// Per-instance table of guest-owned child spans.
///
/// Ids are positive, assigned in order, and never reused within one
/// registry. The table lock is never held while calling into a span.
pub struct SpanRegistry {
    spans: Mutex<HashMap<i64, Arc<dyn Span>>>,
    next_id: AtomicI64,
    bindings: RwLock<Bindings>,
}

impl Default for SpanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpanRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanRegistry")
            .field("open", &self.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SpanRegistry {
    /// Create an empty registry with no bindings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spans: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            bindings: RwLock::new(Bindings::default()),
        }
    }

    /// Bind the decoder callbacks behind [`DECODER_SPAN`].
    pub fn set_decoder_callbacks(&self, callbacks: Arc<dyn DecoderFilterCallbacks>) {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .decoder = Some(callbacks);
    }

    /// Bind the encoder callbacks behind [`ENCODER_SPAN`].
    pub fn set_encoder_callbacks(&self, callbacks: Arc<dyn EncoderFilterCallbacks>) {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .encoder = Some(callbacks);
    }

    /// Drop both bindings. Sentinel ids resolve to no-op spans afterwards.
    pub fn clear_bindings(&self) {
        *self.bindings.write().unwrap_or_else(PoisonError::into_inner) = Bindings::default();
    }

    /// Resolve `id` to a span. Absent ids yield a [`NoopSpan`].
    #[must_use]
    pub fn get(&self, id: i64) -> Arc<dyn Span> {
        let found = match id {
            DECODER_SPAN => {
                let decoder = self
                    .bindings
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .decoder
                    .clone();
                decoder.map(|callbacks| callbacks.active_span())
            },
            ENCODER_SPAN => {
                let encoder = self
                    .bindings
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .encoder
                    .clone();
                encoder.map(|callbacks| callbacks.active_span())
            },
            _ => self
                .spans
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
                .cloned(),
        };
        found.unwrap_or_else(|| Arc::new(NoopSpan))
    }

    /// Open a child of `parent_id` called `name` and return its id.
    ///
    /// The child starts at the decoder dispatcher's clock, or the system
    /// clock if no decoder is bound.
    pub fn spawn_child(&self, parent_id: i64, name: &str) -> i64 {
        let parent = self.get(parent_id);
        let decoder = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .decoder
            .clone();
        let start = decoder.map_or_else(Utc::now, |callbacks| callbacks.dispatcher().now());

        let child = parent.spawn_child(name, start);
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, child);
        debug!(span_id = id, parent_id, span = name, "spawned child span");
        id
    }

    /// Finish the span `id` and forget it.
    ///
    /// Sentinel ids are ignored: the ambient spans belong to the host.
    pub fn finish(&self, id: i64) {
        if id == DECODER_SPAN || id == ENCODER_SPAN {
            debug!(span_id = id, "ignoring finish on ambient span");
            return;
        }
        let removed = self
            .spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(span) => span.finish(),
            None => debug!(span_id = id, "finish on unknown span"),
        }
    }

    /// Number of open child spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no child spans are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
