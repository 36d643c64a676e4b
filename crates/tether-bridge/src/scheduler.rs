//! Posting guest callbacks onto the dispatcher.
//!
//! The scheduler only knows that a target can take delivery of a post tag.
//! It does not depend on the proxy or on the filter instance, which keeps
//! the filter -> scheduler -> filter loop out of the type graph.

use std::sync::Arc;

use tracing::trace;

use crate::host::Dispatcher;

/// Something that accepts a posted callback on its dispatcher thread.
pub trait Deliverable: Send + Sync + 'static {
    /// Called on the dispatcher thread with the tag given to [`schedule`].
    fn deliver(&self, post_tag: u64);
}

/// Queue delivery of `post_tag` to `target` on `dispatcher`.
///
/// `target` stays alive until the dispatcher has run the callback.
pub fn schedule(dispatcher: &dyn Dispatcher, target: Arc<dyn Deliverable>, post_tag: u64) {
    trace!(post_tag, "scheduling post");
    dispatcher.post(Box::new(move || target.deliver(post_tag)));
}
