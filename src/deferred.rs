// SPDX-License-Identifier: MIT OR Apache-2.0

//! The producer side of a promise.
//!
//! A [`Deferred`] is the right to settle one promise. It is a separate handle from
//! the [`Promise`] it controls and is validated by its own generation, so a consumer
//! can never settle a promise and a producer can never read one.
//!
//! Exactly one of [`Deferred::resolve`], [`Deferred::reject`] and [`Deferred::cancel`]
//! succeeds per deferred, even when several threads (or a [`CancelationToken`]) race.
//! The `try_` variants report the loss of that race with `false`; the others return
//! [`Error::InvalidHandle`].

use crate::cancel::CancelationToken;
use crate::node::Node;
use crate::outcome::{Outcome, Reason, Rejection};
use crate::{Error, Promise};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Settles a [`Promise`] from the outside.
pub struct Deferred<T> {
    node: Arc<Node<T>>,
    promise_id: u16,
    deferred_id: u16,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            node: self.node.clone(),
            promise_id: self.promise_id,
            deferred_id: self.deferred_id,
        }
    }
}

impl<T: Send + 'static> Deferred<T> {
    pub fn new() -> Self {
        let (node, promise_id, deferred_id) = Node::pending(0);
        Deferred {
            node,
            promise_id,
            deferred_id,
        }
    }

    /**
    Creates a deferred that is canceled when `token` is.

    Whichever of the token and the producer gets there first settles the promise;
    the other's attempt fails. The token's callback is unregistered once the
    deferred settles.
    */
    pub fn with_token(token: &CancelationToken) -> Self {
        let deferred = Self::new();
        if token.can_be_canceled() {
            let canceler = deferred.clone();
            if let Some(registration) = token.register(move || {
                canceler.try_cancel();
            }) {
                if let Some(registration) =
                    deferred.node.hold_registration(deferred.deferred_id, registration)
                {
                    //settled while we were registering
                    registration.unregister();
                }
            }
        }
        deferred
    }

    /// The promise this deferred settles.
    ///
    /// Every call returns a copy of the same handle, so only one of them may be consumed.
    pub fn promise(&self) -> Promise<T> {
        Promise::from_node(self.node.clone(), self.promise_id, 0)
    }

    /// Returns whether this deferred can still settle its promise.
    pub fn is_valid_and_pending(&self) -> bool {
        self.node.is_pending(self.deferred_id)
    }

    fn try_settle(&self, outcome: Outcome<T>) -> bool {
        self.node.settle_deferred(self.deferred_id, outcome)
    }

    fn settle(&self, outcome: Outcome<T>) -> Result<(), Error> {
        if self.try_settle(outcome) {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    pub fn resolve(&self, value: T) -> Result<(), Error> {
        self.settle(Outcome::Resolved(value))
    }

    /// Resolves the promise, returning `false` if it was already settled.
    pub fn try_resolve(&self, value: T) -> bool {
        self.try_settle(Outcome::Resolved(value))
    }

    pub fn reject<E: Reason>(&self, reason: E) -> Result<(), Error> {
        self.settle(Outcome::Rejected(Rejection::new(reason)))
    }

    pub fn try_reject<E: Reason>(&self, reason: E) -> bool {
        self.try_settle(Outcome::Rejected(Rejection::new(reason)))
    }

    pub fn cancel(&self) -> Result<(), Error> {
        self.settle(Outcome::Canceled)
    }

    pub fn try_cancel(&self) -> bool {
        self.try_settle(Outcome::Canceled)
    }

    /**
    Reports how far the operation has come, from `0.0` to `1.0`.

    # Errors

    [`Error::ProgressOutOfRange`] if `progress` is outside `[0, 1]` or NaN, checked
    before anything else. [`Error::InvalidHandle`] if the promise already settled.
    */
    pub fn report_progress(&self, progress: f32) -> Result<(), Error> {
        check_progress(progress)?;
        if self.node.report_progress(self.deferred_id, progress) {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    /// Like [`Deferred::report_progress`], but returns `false` once the promise settled.
    ///
    /// Out-of-range values are still an error.
    pub fn try_report_progress(&self, progress: f32) -> Result<bool, Error> {
        check_progress(progress)?;
        Ok(self.node.report_progress(self.deferred_id, progress))
    }
}

fn check_progress(progress: f32) -> Result<(), Error> {
    if (0.0..=1.0).contains(&progress) {
        Ok(())
    } else {
        Err(Error::ProgressOutOfRange(progress))
    }
}

impl<T: Send + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Debug for Deferred<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("deferred_id", &self.deferred_id)
            .field("pending", &self.is_valid_and_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Deferred;
    use crate::cancel::CancelationSource;
    use crate::outcome::State;
    use crate::Error;
    use futures::executor::block_on;
    use std::sync::{Arc, Barrier};

    #[test]
    fn settles_exactly_once() {
        let deferred = Deferred::<u8>::new();
        let promise = deferred.promise();
        assert!(deferred.is_valid_and_pending());
        deferred.resolve(1).unwrap();
        assert!(!deferred.is_valid_and_pending());
        assert_eq!(deferred.reject("late"), Err(Error::InvalidHandle));
        assert!(!deferred.try_cancel());
        assert_eq!(block_on(promise.into_future()).unwrap().resolved(), Some(1));
    }

    #[test]
    fn progress_range_is_checked_first() {
        let deferred = Deferred::<u8>::new();
        assert_eq!(
            deferred.report_progress(1.5),
            Err(Error::ProgressOutOfRange(1.5))
        );
        assert!(deferred.report_progress(f32::NAN).is_err());
        deferred.report_progress(0.3).unwrap();
        deferred.cancel().unwrap();
        assert_eq!(deferred.try_report_progress(0.5), Ok(false));
        assert_eq!(deferred.report_progress(0.5), Err(Error::InvalidHandle));
        assert_eq!(
            deferred.try_report_progress(-0.1),
            Err(Error::ProgressOutOfRange(-0.1))
        );
        deferred.promise().forget().unwrap();
    }

    #[test]
    fn concurrent_settlement_has_one_winner() {
        for _ in 0..50 {
            let deferred = Deferred::<usize>::new();
            let promise = deferred.promise();
            let barrier = Arc::new(Barrier::new(4));
            let threads: Vec<_> = (0..4)
                .map(|i| {
                    let deferred = deferred.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        match i % 3 {
                            0 => deferred.try_resolve(i),
                            1 => deferred.try_reject(i),
                            _ => deferred.try_cancel(),
                        }
                    })
                })
                .collect();
            let winners = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
            assert_ne!(
                block_on(promise.into_future()).unwrap().state(),
                State::Pending
            );
        }
    }

    #[test]
    fn token_cancels() {
        let source = CancelationSource::new();
        let deferred = Deferred::<u8>::with_token(&source.token());
        let promise = deferred.promise();
        source.cancel();
        assert!(!deferred.is_valid_and_pending());
        assert_eq!(
            block_on(promise.into_future()).unwrap().state(),
            State::Canceled
        );
    }

    #[test]
    fn settling_unregisters_token() {
        let source = CancelationSource::new();
        let deferred = Deferred::<u8>::with_token(&source.token());
        let promise = deferred.promise();
        deferred.resolve(4).unwrap();
        source.cancel();
        assert_eq!(block_on(promise.into_future()).unwrap().resolved(), Some(4));
    }

    #[test]
    fn already_canceled_token() {
        let source = CancelationSource::new();
        source.cancel();
        let deferred = Deferred::<u8>::with_token(&source.token());
        assert!(!deferred.try_resolve(1));
        assert_eq!(
            block_on(deferred.promise().into_future()).unwrap().state(),
            State::Canceled
        );
    }
}
