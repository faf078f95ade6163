// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution contexts that continuations can be marshaled onto.
//!
//! The promise core never runs threads of its own. When a chaining call asks for its
//! continuation to run somewhere specific, the core posts a job to an
//! [`ExecutionContext`] chosen by a [`Dispatch`] value.
//!
//! # Examples
//!
//! ```
//! use some_promise::{Deferred, Dispatch, ExecutionContext, Priority};
//! use std::sync::{Arc, Mutex};
//!
//! /// Queues jobs until the owner drains them, like a UI thread would.
//! #[derive(Default)]
//! struct Queue(Mutex<Vec<Box<dyn FnOnce() + Send>>>);
//!
//! impl std::fmt::Debug for Queue {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("Queue")
//!     }
//! }
//!
//! impl ExecutionContext for Queue {
//!     fn post(&self, _priority: Priority, job: Box<dyn FnOnce() + Send>) {
//!         self.0.lock().unwrap().push(job);
//!     }
//! }
//!
//! let queue = Arc::new(Queue::default());
//! let deferred = Deferred::<u8>::new();
//! let marshaled = deferred
//!     .promise()
//!     .on(Dispatch::Explicit(queue.clone()))
//!     .unwrap();
//! deferred.resolve(1).unwrap();
//! assert_eq!(queue.0.lock().unwrap().len(), 1);
//! # marshaled.forget().unwrap();
//! ```

use crate::{Error, Priority};
use std::fmt::Debug;
use std::sync::Arc;

/// Something that can run a job "somewhere else".
///
/// Implementations decide where: a UI thread, a thread pool, an event loop.
/// `post` must not run the job inline on the calling thread's stack unless the
/// context is explicitly synchronous.
pub trait ExecutionContext: Send + Sync + Debug {
    /// Schedules `job` to run on this context.
    ///
    /// `priority` is advisory.
    fn post(&self, priority: Priority, job: Box<dyn FnOnce() + Send>);
}

/// Where a continuation should run.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub enum Dispatch {
    /// Run on whichever thread settles the source promise.
    #[default]
    Synchronous,
    /// Run on the configured foreground context.
    ///
    /// Fails with [`Error::NoForegroundContext`] if none is configured.
    Foreground,
    /// Run on the configured background context, or on the last resort context.
    Background,
    /// Run on the given context.
    Explicit(Arc<dyn ExecutionContext>),
}

impl Dispatch {
    /// Resolves this choice against the current configuration.
    ///
    /// Returns `None` for [`Dispatch::Synchronous`].
    pub(crate) fn resolve(&self) -> Result<Option<Arc<dyn ExecutionContext>>, Error> {
        match self {
            Dispatch::Synchronous => Ok(None),
            Dispatch::Foreground => crate::config::config()
                .foreground_context()
                .cloned()
                .map(Some)
                .ok_or(Error::NoForegroundContext),
            Dispatch::Background => Ok(Some(background_context())),
            Dispatch::Explicit(context) => Ok(Some(context.clone())),
        }
    }
}

/// The configured background context, falling back to [`crate::LastResortContext`].
pub fn background_context() -> Arc<dyn ExecutionContext> {
    match crate::config::config().background_context() {
        Some(context) => context.clone(),
        None => Arc::new(crate::last_resort::LastResortContext::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::Dispatch;

    #[test]
    fn synchronous_needs_no_context() {
        assert!(Dispatch::Synchronous.resolve().unwrap().is_none());
        assert!(Dispatch::Background.resolve().unwrap().is_some());
    }
}
