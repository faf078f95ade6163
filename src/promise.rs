// SPDX-License-Identifier: MIT OR Apache-2.0

//! The consumer-side promise handle.
//!
//! A [`Promise`] is a small value: a reference to a pooled node plus the node
//! generation it was issued for. Every operation checks that generation first, so a
//! handle that outlived its node (because another copy consumed it, or because the
//! node was recycled for an unrelated promise) fails with [`Error::InvalidHandle`]
//! instead of touching someone else's data.
//!
//! A promise that was resolved up front carries its value inline and has no node at all.
//!
//! # Consumption
//!
//! Every chaining call consumes the handle. Copies made with [`Clone`] share that
//! consumption: once one copy has been chained, forgotten or awaited, the others are
//! stale. Call [`Promise::preserve`] to get a handle that can be consumed any number
//! of times.
//!
//! # Examples
//!
//! ```
//! use some_promise::Deferred;
//!
//! let deferred = Deferred::<u32>::new();
//! let doubled = deferred
//!     .promise()
//!     .then(|v| v * 2)
//!     .unwrap()
//!     .catch(|_rejection| 0)
//!     .unwrap();
//! deferred.resolve(21).unwrap();
//! let outcome = futures::executor::block_on(doubled.into_future()).unwrap();
//! assert_eq!(outcome.resolved(), Some(42));
//! ```

mod awaiter;
mod continuation;

pub use awaiter::Awaiter;

use crate::Error;
use crate::context::Dispatch;
use crate::node::{Node, Waiter};
use crate::outcome::{Outcome, Reason, Rejection};
use continuation::{Continuation, Forward, Next, ProgressListener};
use std::fmt::{Debug, Formatter};
use std::future::IntoFuture;
use std::sync::Arc;

pub(crate) enum Repr<T> {
    /// Resolved up front; there is no node.
    Resolved(T),
    Node {
        node: Arc<Node<T>>,
        id: u16,
        depth: u16,
    },
}

/// The eventual result of an asynchronous operation.
#[must_use = "a promise that is never consumed or forgotten leaves its outcome unobserved"]
pub struct Promise<T> {
    pub(crate) repr: Repr<T>,
}

impl<T: Clone> Clone for Promise<T> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Resolved(value) => Repr::Resolved(value.clone()),
            Repr::Node { node, id, depth } => Repr::Node {
                node: node.clone(),
                id: *id,
                depth: *depth,
            },
        };
        Promise { repr }
    }
}

/// The depth of a node chained onto one at `depth`.
pub(crate) fn next_depth(depth: u16) -> Result<u16, Error> {
    if crate::config::config().progress() {
        depth.checked_add(1).ok_or(Error::DepthOverflow)
    } else {
        Ok(depth.saturating_add(1))
    }
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn from_node(node: Arc<Node<T>>, id: u16, depth: u16) -> Self {
        Promise {
            repr: Repr::Node { node, id, depth },
        }
    }

    /// A promise that is already resolved with `value`.
    ///
    /// No node is allocated.
    pub fn resolved(value: T) -> Self {
        Promise {
            repr: Repr::Resolved(value),
        }
    }

    /// A promise that is already rejected with `reason`.
    pub fn rejected<E: Reason>(reason: E) -> Self {
        Self::from_outcome(Outcome::Rejected(Rejection::new(reason)))
    }

    /// A promise that is already canceled.
    pub fn canceled() -> Self {
        Self::from_outcome(Outcome::Canceled)
    }

    /// A promise that is already settled with `outcome`.
    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        Self::settled_at(outcome, 0)
    }

    pub(crate) fn settled_at(outcome: Outcome<T>, depth: u16) -> Self {
        match outcome {
            Outcome::Resolved(value) => Self::resolved(value),
            outcome => {
                let (node, id) = Node::settled(outcome, depth);
                Self::from_node(node, id, depth)
            }
        }
    }

    /// Returns whether this handle can still be used.
    pub fn is_valid(&self) -> bool {
        match &self.repr {
            Repr::Resolved(_) => true,
            Repr::Node { node, id, .. } => node.is_valid(*id),
        }
    }

    /// The position of this promise in its chain.
    pub fn depth(&self) -> u16 {
        match &self.repr {
            Repr::Resolved(_) => 0,
            Repr::Node { depth, .. } => *depth,
        }
    }

    /// The node and generation consuming this handle uses up.
    ///
    /// `None` when consuming it leaves it valid: inline values and preserved handles.
    pub(crate) fn consumption_key(&self) -> Option<(*const (), u16)> {
        match &self.repr {
            Repr::Node { node, id, .. } if !node.is_preserved() => {
                Some((Arc::as_ptr(node) as *const (), *id))
            }
            _ => None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    /// Attaches the continuation primitive every chaining call is built from.
    fn chain<U, F>(self, reaction: F) -> Result<Promise<U>, Error>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>) -> Next<U> + Send + 'static,
    {
        match self.repr {
            Repr::Resolved(value) => {
                let depth = next_depth(0)?;
                Ok(continuation::run(reaction, Outcome::Resolved(value)).into_promise(depth))
            }
            Repr::Node { node, id, depth } => {
                if !node.is_valid(id) {
                    return Err(Error::InvalidHandle);
                }
                let depth = next_depth(depth)?;
                let (target, target_id, deferred_id) = Node::<U>::pending(depth);
                let waiter =
                    Continuation::<T, U, F>::bind(target.clone(), deferred_id, depth, reaction);
                node.attach(id, waiter)?;
                Ok(Promise::from_node(target, target_id, depth))
            }
        }
    }

    /// Runs `f` with the value once this promise resolves.
    ///
    /// Rejection and cancelation skip `f` and pass straight to the returned promise.
    pub fn then<U, F>(self, f: F) -> Result<Promise<U>, Error>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain(move |outcome| Next::Settle(outcome.map(f)))
    }

    /// Like [`Promise::then`], but `f` decides how the returned promise settles.
    pub fn then_outcome<U, F>(self, f: F) -> Result<Promise<U>, Error>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        self.chain(move |outcome| match outcome {
            Outcome::Resolved(value) => Next::Settle(f(value)),
            Outcome::Rejected(rejection) => Next::Settle(Outcome::Rejected(rejection)),
            Outcome::Canceled => Next::Settle(Outcome::Canceled),
        })
    }

    /// Like [`Promise::then`], but the returned promise follows the promise `f` returns.
    pub fn then_promise<U, F>(self, f: F) -> Result<Promise<U>, Error>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.chain(move |outcome| match outcome {
            Outcome::Resolved(value) => Next::Adopt(f(value)),
            Outcome::Rejected(rejection) => Next::Settle(Outcome::Rejected(rejection)),
            Outcome::Canceled => Next::Settle(Outcome::Canceled),
        })
    }

    /// Recovers from a rejection.
    ///
    /// Resolution and cancelation pass through untouched.
    pub fn catch<F>(self, f: F) -> Result<Promise<T>, Error>
    where
        F: FnOnce(Rejection) -> T + Send + 'static,
    {
        self.chain(move |outcome| match outcome {
            Outcome::Rejected(rejection) => Next::Settle(Outcome::Resolved(f(rejection))),
            outcome => Next::Settle(outcome),
        })
    }

    /// Recovers from cancelation.
    ///
    /// Cancelation skips every other kind of callback; this is the only way to stop it.
    pub fn catch_cancelation<F>(self, f: F) -> Result<Promise<T>, Error>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.chain(move |outcome| match outcome {
            Outcome::Canceled => Next::Settle(Outcome::Resolved(f())),
            outcome => Next::Settle(outcome),
        })
    }

    /// Runs `f` with the outcome, whatever it is.
    pub fn continue_with<U, F>(self, f: F) -> Result<Promise<U>, Error>
    where
        U: Send + 'static,
        F: FnOnce(Outcome<T>) -> U + Send + 'static,
    {
        self.chain(move |outcome| Next::Settle(Outcome::Resolved(f(outcome))))
    }

    /// Runs `f` once this promise settles, passing the outcome on unchanged.
    ///
    /// If `f` panics, the returned promise is rejected instead.
    pub fn finally<F>(self, f: F) -> Result<Promise<T>, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.chain(move |outcome| {
            f();
            Next::Settle(outcome)
        })
    }

    /// Settles the returned promise on the context chosen by `dispatch`.
    ///
    /// Callbacks chained onto the returned promise run there too.
    /// [`Dispatch::Synchronous`] returns this promise unchanged.
    pub fn on(self, dispatch: Dispatch) -> Result<Promise<T>, Error> {
        let Some(context) = dispatch.resolve()? else {
            return Ok(self);
        };
        self.validate()?;
        let depth = next_depth(self.depth())?;
        let (target, target_id, deferred_id) = Node::<T>::pending(depth);
        let forward = Forward::marshal(target.clone(), deferred_id, context);
        match self.repr {
            Repr::Resolved(value) => forward.settled(Outcome::Resolved(value)),
            Repr::Node { node, id, .. } => node.attach(id, forward)?,
        }
        Ok(Promise::from_node(target, target_id, depth))
    }

    /// Calls `listener` with this promise's progress, normalized to `[0, 1]`.
    ///
    /// The listener sees `1.0` when the promise resolves. It runs on whichever thread
    /// reports progress; a panic inside it is reported as an uncaught rejection.
    pub fn progress<F>(self, listener: F) -> Result<Promise<T>, Error>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        match self.repr {
            Repr::Resolved(value) => {
                ProgressListener::<T, F>::notify(&listener, 1.0);
                Ok(Promise::resolved(value))
            }
            Repr::Node { node, id, depth } => {
                if !node.is_valid(id) {
                    return Err(Error::InvalidHandle);
                }
                let (target, target_id, deferred_id) = Node::<T>::pending(depth);
                let waiter = ProgressListener::new(target.clone(), deferred_id, depth, listener);
                node.attach(id, Arc::new(waiter))?;
                Ok(Promise::from_node(target, target_id, depth))
            }
        }
    }

    /// Gives up on this promise without observing its outcome.
    ///
    /// The node is recycled once it settles. A rejection that nobody observed is
    /// reported to the uncaught rejection handler.
    pub fn forget(self) -> Result<(), Error> {
        match self.repr {
            Repr::Resolved(_) => Ok(()),
            Repr::Node { node, id, .. } => node.forget(id),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /**
    Returns a handle that can be consumed any number of times.

    Each consumer receives a clone of the outcome, in the order they were attached.
    The node is recycled only after the preserved handle is [forgotten](Promise::forget),
    so forget it once no more consumers will be added.
    */
    pub fn preserve(self) -> Result<Promise<T>, Error> {
        match self.repr {
            Repr::Resolved(value) => Ok(Promise::resolved(value)),
            Repr::Node { node, id, depth } => {
                let id = node.preserve(id, T::clone)?;
                Ok(Promise::from_node(node, id, depth))
            }
        }
    }
}

impl<T: Send + 'static> IntoFuture for Promise<T> {
    type Output = Result<Outcome<T>, Error>;
    type IntoFuture = Awaiter<T>;

    fn into_future(self) -> Self::IntoFuture {
        Awaiter::new(self)
    }
}

impl<T: Send + 'static> Debug for Promise<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::Resolved(_) => f.debug_struct("Promise").field("resolved", &true).finish(),
            Repr::Node { node, id, depth } => f
                .debug_struct("Promise")
                .field("id", id)
                .field("depth", depth)
                .field("valid", &node.is_valid(*id))
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Promise;
    use crate::outcome::{Outcome, Panicked, State};
    use crate::{Deferred, Error};
    use futures::executor::block_on;
    use std::sync::{Arc, Mutex};

    #[test]
    #[cfg(not(feature = "validation"))]
    fn stale_handle_after_recycle() {
        use super::Repr;

        //no other test pools this type, so the next deferred gets the recycled node
        #[derive(Debug, Clone, PartialEq)]
        struct Recycled(u32);

        let deferred = Deferred::<Recycled>::new();
        let promise = deferred.promise();
        let copy = promise.clone();
        let stale_deferred = deferred.clone();
        let Repr::Node { node: old, .. } = &promise.repr else {
            unreachable!("a deferred's promise has a node");
        };
        let old = old.clone();

        deferred.resolve(Recycled(1)).unwrap();
        assert_eq!(
            block_on(promise.into_future()).unwrap().resolved(),
            Some(Recycled(1))
        );

        let reused = Deferred::<Recycled>::new();
        let live = reused.promise();
        let Repr::Node { node: new, .. } = &live.repr else {
            unreachable!("a deferred's promise has a node");
        };
        assert!(Arc::ptr_eq(&old, new));
        assert!(live.is_valid());

        assert!(!copy.is_valid());
        assert_eq!(copy.clone().then(|m| m.0).err(), Some(Error::InvalidHandle));
        assert_eq!(copy.forget(), Err(Error::InvalidHandle));
        assert_eq!(stale_deferred.resolve(Recycled(9)), Err(Error::InvalidHandle));
        assert!(!stale_deferred.try_resolve(Recycled(9)));
        assert!(!stale_deferred.try_cancel());
        assert!(!stale_deferred.is_valid_and_pending());

        //the live promise on the reused node is untouched
        assert!(reused.is_valid_and_pending());
        reused.resolve(Recycled(2)).unwrap();
        assert_eq!(block_on(live.into_future()).unwrap().resolved(), Some(Recycled(2)));
    }

    #[test]
    fn inline_failure_lands_one_level_deeper() {
        let failed = Promise::resolved(1u8)
            .then_outcome(|_| Outcome::<u8>::Canceled)
            .unwrap();
        assert_eq!(failed.depth(), 1);
        assert_eq!(block_on(failed.into_future()).unwrap().state(), State::Canceled);
    }

    #[test]
    fn copies_share_consumption() {
        let deferred = Deferred::<u8>::new();
        let promise = deferred.promise();
        let copy = promise.clone();
        promise.forget().unwrap();
        assert!(!copy.is_valid());
        assert!(deferred.try_resolve(1));
    }

    #[test]
    fn rejection_skips_then() {
        let ran = Arc::new(Mutex::new(false));
        let r = ran.clone();
        let promise = Promise::<u8>::rejected("nope")
            .then(move |v| {
                *r.lock().unwrap() = true;
                v
            })
            .unwrap()
            .catch(|rejection| {
                assert_eq!(rejection.downcast_ref::<&str>(), Some(&"nope"));
                9
            })
            .unwrap();
        assert_eq!(block_on(promise.into_future()).unwrap().resolved(), Some(9));
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn cancelation_skips_catch() {
        let promise = Promise::<u8>::canceled()
            .catch(|_| 1)
            .unwrap()
            .then(|v| v + 1)
            .unwrap();
        let caught = promise.catch_cancelation(|| 5).unwrap();
        assert_eq!(block_on(caught.into_future()).unwrap().resolved(), Some(5));
    }

    #[test]
    fn panics_reject_next() {
        let deferred = Deferred::<u8>::new();
        let next = deferred
            .promise()
            .then(|_| -> u8 { panic!("bad callback") })
            .unwrap();
        deferred.resolve(0).unwrap();
        let outcome = block_on(next.into_future()).unwrap();
        let rejection = outcome.rejection().expect("rejected");
        assert_eq!(
            rejection.downcast_ref::<Panicked>(),
            Some(&Panicked("bad callback".into()))
        );
    }

    #[test]
    fn cancel_signal_cancels_next() {
        let next = Promise::resolved(3u8)
            .then(|_| -> u8 { crate::cancel() })
            .unwrap();
        assert_eq!(block_on(next.into_future()).unwrap().state(), State::Canceled);
    }

    #[test]
    fn then_promise_adopts() {
        let inner = Deferred::<String>::new();
        let inner_promise = inner.promise();
        let outer = Promise::resolved(2u8)
            .then_promise(move |_| inner_promise)
            .unwrap();
        assert!(outer.is_valid());
        inner.resolve("adopted".to_string()).unwrap();
        assert_eq!(
            block_on(outer.into_future()).unwrap().resolved().as_deref(),
            Some("adopted")
        );
    }

    #[test]
    fn then_promise_with_stale_handle_rejects() {
        let deferred = Deferred::<u8>::new();
        let stale = deferred.promise();
        stale.clone().forget().unwrap();
        let outer = Promise::resolved(())
            .then_promise(move |_| stale)
            .unwrap();
        let outcome = block_on(outer.into_future()).unwrap();
        assert_eq!(
            outcome.rejection().and_then(|r| r.downcast_ref::<Error>()),
            Some(&Error::InvalidHandle)
        );
    }

    #[test]
    fn continue_with_sees_every_outcome() {
        let next = Promise::<u8>::canceled()
            .continue_with(|outcome| outcome.state())
            .unwrap();
        assert_eq!(block_on(next.into_future()).unwrap().resolved(), Some(State::Canceled));
    }

    #[test]
    fn finally_passes_outcome() {
        let ran = Arc::new(Mutex::new(0));
        let r = ran.clone();
        let next = Promise::resolved(4u8)
            .finally(move || *r.lock().unwrap() += 1)
            .unwrap();
        assert_eq!(block_on(next.into_future()).unwrap().resolved(), Some(4));
        assert_eq!(*ran.lock().unwrap(), 1);
    }

    #[test]
    fn preserved_promise_has_many_consumers() {
        let deferred = Deferred::<u32>::new();
        let preserved = deferred.promise().preserve().unwrap();
        let a = preserved.clone().then(|v| v + 1).unwrap();
        let b = preserved.clone().then(|v| v + 2).unwrap();
        deferred.resolve(10).unwrap();
        let c = preserved.clone().then(|v| v + 3).unwrap();
        preserved.clone().forget().unwrap();
        assert!(!preserved.is_valid());
        assert_eq!(block_on(a.into_future()).unwrap().resolved(), Some(11));
        assert_eq!(block_on(b.into_future()).unwrap().resolved(), Some(12));
        assert_eq!(block_on(c.into_future()).unwrap().resolved(), Some(13));
    }

    #[test]
    fn depth_grows_along_chain() {
        let deferred = Deferred::<u8>::new();
        let promise = deferred.promise();
        assert_eq!(promise.depth(), 0);
        let next = promise.then(|v| v).unwrap().then(|v| v).unwrap();
        assert_eq!(next.depth(), 2);
        next.forget().unwrap();
        deferred.resolve(1).unwrap();
    }

    #[test]
    fn depth_ceiling() {
        assert_eq!(super::next_depth(u16::MAX), Err(Error::DepthOverflow));
        assert_eq!(super::next_depth(1), Ok(2));
    }

    #[test]
    fn progress_is_normalized() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let deferred = Deferred::<u8>::new();
        let watched = deferred
            .promise()
            .then(|v| v)
            .unwrap()
            .progress(move |p| s.lock().unwrap().push(p))
            .unwrap();
        deferred.report_progress(0.5).unwrap();
        deferred.resolve(1).unwrap();
        block_on(watched.into_future()).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&0.25));
        assert_eq!(seen.last(), Some(&1.0));
    }

    #[test]
    fn outcome_round_trip() {
        let promise = Promise::from_outcome(Outcome::<u8>::Canceled);
        assert!(promise.is_valid());
        assert_eq!(block_on(promise.into_future()).unwrap().state(), State::Canceled);
    }
}
