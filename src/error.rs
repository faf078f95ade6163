// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contract violations reported synchronously at the call site.
//!
//! Data-level failures (rejections, cancelation) never appear here; they travel
//! through the promise chain as [`crate::Outcome`] values.

/// Errors returned by the non-`try_` promise and deferred operations.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The handle's generation id does not match its node.
    ///
    /// The promise was already consumed, the deferred was already settled, or the
    /// node was recycled for another promise.
    #[error("the handle is no longer valid: it was already consumed or its node was recycled")]
    InvalidHandle,
    /// A combinator was given no promises.
    #[error("a combinator requires at least one promise")]
    EmptyArgument,
    /// Progress must lie within `[0, 1]`.
    #[error("progress must be between 0 and 1 (inclusive), got {0}")]
    ProgressOutOfRange(f32),
    /// [`crate::Dispatch::Foreground`] was requested but no foreground context is configured.
    #[error("no foreground execution context is configured")]
    NoForegroundContext,
    /// The chain grew past the depth that progress tracking can represent.
    #[error("promise chain exceeded the maximum depth of {}", u16::MAX)]
    DepthOverflow,
    /// A callback returned the very promise it was supposed to settle.
    #[error("a callback returned the promise it was settling")]
    CircularAdoption,
}
