// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook points for causality tracing.
//!
//! The library does not capture stack traces itself. Instead it calls a
//! [`TraceHook`] at the moments a tracer would care about, filtered by the
//! configured [`TraceLevel`].
//!
//! # Examples
//!
//! ```
//! use some_promise::trace::{TraceHook, TraceLevel};
//! use some_promise::{ConfigBuilder, Rejection};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct PrintRejections;
//!
//! impl TraceHook for PrintRejections {
//!     fn rejected(&self, rejection: &Rejection) {
//!         eprintln!("traced: {rejection}");
//!     }
//! }
//!
//! let config = ConfigBuilder::new()
//!     .trace_level(TraceLevel::Rejections)
//!     .trace_hook(Arc::new(PrintRejections))
//!     .build();
//! assert_eq!(config.trace_level(), TraceLevel::Rejections);
//! ```

use crate::Rejection;
use std::fmt::Debug;

/// How much diagnostic work the tracing layer performs.
///
/// # Non-exhaustive
///
/// Always include a catch-all pattern when matching.
#[non_exhaustive]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub enum TraceLevel {
    /// No hooks are called.
    #[default]
    None,
    /// Only [`TraceHook::rejected`] is called.
    Rejections,
    /// Every hook is called.
    All,
}

/// Receives tracing events from the promise core.
///
/// Both methods default to doing nothing, so implementors only override what they need.
/// Hooks run inline on whichever thread triggered the event and must not block.
pub trait TraceHook: Send + Sync + Debug {
    /// A promise node was created or taken from the pool.
    fn node_created(&self, _type_name: &'static str, _depth: u16) {}

    /// A promise node was rejected.
    fn rejected(&self, _rejection: &Rejection) {}
}

pub(crate) fn node_created<T>(depth: u16) {
    let config = crate::config::config();
    if config.trace_level() >= TraceLevel::All {
        if let Some(hook) = config.trace_hook() {
            hook.node_created(std::any::type_name::<T>(), depth);
        }
    }
}

pub(crate) fn rejected(rejection: &Rejection) {
    let config = crate::config::config();
    if config.trace_level() >= TraceLevel::Rejections {
        if let Some(hook) = config.trace_hook() {
            hook.rejected(rejection);
        }
    }
}
