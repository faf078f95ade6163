// SPDX-License-Identifier: MIT OR Apache-2.0

//! Combinators that wait on several promises at once.
//!
//! Every combinator feeds its sources into a [`Joiner`], which owns the combined
//! promise. Pending sources are linked to it through pooled pass-throughs; sources
//! that were resolved up front report straight away without one.
//!
//! Once the combined promise has settled, sources that are still running are
//! *abandoned*: they run to completion, but what they report is dropped. Abandoned
//! sources are not canceled.
//!
//! | combinator | settles when |
//! |---|---|
//! | [`Promise::race`] | any source settles, with that source's outcome |
//! | [`Promise::first`] | any source resolves, or every source failed (with the last failure) |
//! | [`Promise::all`], [`merge2`] and friends | every source resolved, or any source failed |
//!
//! # Examples
//!
//! ```
//! use some_promise::{Deferred, Promise};
//!
//! let slow = Deferred::<&str>::new();
//! let fast = Deferred::<&str>::new();
//! let winner = Promise::race([slow.promise(), fast.promise()]).unwrap();
//! fast.resolve("fast").unwrap();
//! slow.resolve("slow").unwrap();
//! let outcome = futures::executor::block_on(winner.into_future()).unwrap();
//! assert_eq!(outcome.resolved(), Some("fast"));
//! ```

mod pass_through;

use crate::node::Node;
use crate::outcome::Outcome;
use crate::promise::Repr;
use crate::{Error, Promise};
use pass_through::PassThrough;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Stores a resolved source value, returning the combined value once it is complete.
pub(crate) type Store<S, T, R> = fn(&mut S, usize, T) -> Option<R>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Policy {
    /// Settle with the first outcome of any kind.
    Race,
    /// Settle with the first value, or the last failure.
    First,
    /// Settle once every value is in, or with the first failure.
    All,
}

struct JoinState<S> {
    values: S,
    pending: usize,
    settled: bool,
    //normalized progress per source
    progress: Vec<f32>,
}

/// Fans the outcomes of several sources into one promise.
pub(crate) struct Joiner<S, R> {
    target: Arc<Node<R>>,
    target_id: u16,
    deferred_id: u16,
    depth: u16,
    policy: Policy,
    state: Mutex<JoinState<S>>,
}

impl<S, R> Joiner<S, R>
where
    S: Send + 'static,
    R: Send + 'static,
{
    fn new(policy: Policy, depth: u16, sources: usize, values: S) -> Arc<Self> {
        let (target, target_id, deferred_id) = Node::pending(depth);
        Arc::new(Joiner {
            target,
            target_id,
            deferred_id,
            depth,
            policy,
            state: Mutex::new(JoinState {
                values,
                pending: sources,
                settled: false,
                progress: vec![0.0; sources],
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, JoinState<S>> {
        self.state.lock().expect("Mutex poisoned")
    }

    fn promise(&self) -> Promise<R> {
        Promise::from_node(self.target.clone(), self.target_id, self.depth)
    }

    /// Connects `source` to slot `index`.
    fn hook<T: Send + 'static>(
        self: &Arc<Self>,
        index: usize,
        source: Promise<T>,
        store: Store<S, T, R>,
    ) -> Result<(), Error> {
        match source.repr {
            Repr::Resolved(value) => {
                self.report(index, store, Outcome::Resolved(value));
                Ok(())
            }
            Repr::Node { node, id, depth } => {
                let pass = PassThrough::bind(self.clone(), index, depth, store);
                node.attach(id, pass)
            }
        }
    }

    pub(crate) fn report<T>(&self, index: usize, store: Store<S, T, R>, outcome: Outcome<T>) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.settled {
            //abandoned
            return;
        }
        state.pending = state.pending.saturating_sub(1);
        let last = state.pending == 0;
        let waits_for_last = self.policy == Policy::First && !last;
        let settle = match outcome {
            Outcome::Resolved(value) => {
                if let Some(progress) = state.progress.get_mut(index) {
                    *progress = 1.0;
                }
                store(&mut state.values, index, value).map(Outcome::Resolved)
            }
            Outcome::Rejected(_) | Outcome::Canceled if waits_for_last => None,
            Outcome::Rejected(rejection) => Some(Outcome::Rejected(rejection)),
            Outcome::Canceled => Some(Outcome::Canceled),
        };
        match settle {
            Some(outcome) => {
                state.settled = true;
                drop(guard);
                self.target.settle_deferred(self.deferred_id, outcome);
            }
            None => {
                let absolute = self.absolute(state);
                drop(guard);
                self.target.forward_progress(self.deferred_id, absolute);
            }
        }
    }

    pub(crate) fn progress(&self, index: usize, fraction: f32) {
        let mut state = self.lock();
        if state.settled {
            return;
        }
        if let Some(progress) = state.progress.get_mut(index) {
            *progress = fraction;
        }
        let absolute = self.absolute(&state);
        drop(state);
        self.target.forward_progress(self.deferred_id, absolute);
    }

    fn absolute(&self, state: &JoinState<S>) -> f64 {
        let fraction = match self.policy {
            Policy::Race | Policy::First => state.progress.iter().copied().fold(0.0, f32::max),
            Policy::All => {
                let sum: f32 = state.progress.iter().sum();
                sum / state.progress.len().max(1) as f32
            }
        };
        f64::from(fraction) * (f64::from(self.depth) + 1.0)
    }
}

/// Collects the sources of an iterator-based combinator, validating every one.
fn collect<T: Send + 'static>(
    promises: impl IntoIterator<Item = Promise<T>>,
) -> Result<Vec<Promise<T>>, Error> {
    let promises: Vec<_> = promises.into_iter().collect();
    if promises.is_empty() {
        return Err(Error::EmptyArgument);
    }
    for promise in &promises {
        promise.validate()?;
    }
    distinct(promises.iter().map(Promise::consumption_key))?;
    Ok(promises)
}

/// Fails if two sources are copies of the same single-consumer handle.
///
/// Only the first copy could be hooked up, so the call would fail halfway.
fn distinct(keys: impl IntoIterator<Item = Option<(*const (), u16)>>) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for key in keys.into_iter().flatten() {
        if !seen.insert(key) {
            return Err(Error::InvalidHandle);
        }
    }
    Ok(())
}

fn pass_value<T>(_: &mut (), _: usize, value: T) -> Option<T> {
    Some(value)
}

struct Gathered<T> {
    slots: Vec<Option<T>>,
    missing: usize,
}

fn gather<T>(gathered: &mut Gathered<T>, index: usize, value: T) -> Option<Vec<T>> {
    let slot = gathered.slots.get_mut(index)?;
    if slot.is_none() {
        gathered.missing -= 1;
    }
    *slot = Some(value);
    if gathered.missing > 0 {
        return None;
    }
    Some(gathered.slots.drain(..).flatten().collect())
}

impl<T: Send + 'static> Promise<T> {
    fn single(policy: Policy, promises: Vec<Promise<T>>) -> Result<Promise<T>, Error> {
        let depth = promises.iter().map(Promise::depth).min().unwrap_or(0);
        let joiner = Joiner::new(policy, depth, promises.len(), ());
        for (index, promise) in promises.into_iter().enumerate() {
            joiner.hook(index, promise, pass_value::<T>)?;
        }
        Ok(joiner.promise())
    }

    /**
    Settles like whichever source settles first.

    Losing sources are abandoned, not canceled.

    # Errors

    [`Error::EmptyArgument`] for no sources, [`Error::InvalidHandle`] if any source is
    stale or is a second copy of another source. Both are checked before any source is
    consumed.
    */
    pub fn race(promises: impl IntoIterator<Item = Promise<T>>) -> Result<Promise<T>, Error> {
        Self::single(Policy::Race, collect(promises)?)
    }

    /**
    Resolves with the first source to resolve.

    Failures are skipped until every source has failed; the combined promise then
    settles like the source that failed last.
    */
    pub fn first(promises: impl IntoIterator<Item = Promise<T>>) -> Result<Promise<T>, Error> {
        Self::single(Policy::First, collect(promises)?)
    }

    /// Resolves with every value, in source order, or fails with the first failure.
    pub fn all(
        promises: impl IntoIterator<Item = Promise<T>>,
    ) -> Result<Promise<Vec<T>>, Error> {
        let promises = collect(promises)?;
        let depth = promises.iter().map(Promise::depth).max().unwrap_or(0);
        let count = promises.len();
        let gathered = Gathered {
            slots: std::iter::repeat_with(|| None).take(count).collect(),
            missing: count,
        };
        let joiner = Joiner::new(Policy::All, depth, count, gathered);
        for (index, promise) in promises.into_iter().enumerate() {
            joiner.hook(index, promise, gather::<T>)?;
        }
        Ok(joiner.promise())
    }
}

macro_rules! merge {
    ($(#[$meta:meta])* $name:ident, $($ty:ident $var:ident $idx:tt),+) => {
        $(#[$meta])*
        pub fn $name<$($ty: Send + 'static),+>(
            $($var: Promise<$ty>),+
        ) -> Result<Promise<($($ty,)+)>, Error> {
            fn complete<$($ty),+>(values: &mut ($(Option<$ty>,)+)) -> Option<($($ty,)+)> {
                if $(values.$idx.is_some())&&+ {
                    Some(($(values.$idx.take()?,)+))
                } else {
                    None
                }
            }

            $($var.validate()?;)+
            distinct([$($var.consumption_key()),+])?;
            let depth = [$($var.depth()),+].into_iter().max().unwrap_or(0);
            let count = [$($idx),+].len();
            let joiner = Joiner::new(Policy::All, depth, count, ($(None::<$ty>,)+));
            $(
                joiner.hook($idx, $var, |values, _, value| {
                    values.$idx = Some(value);
                    complete(values)
                })?;
            )+
            Ok(joiner.promise())
        }
    };
}

merge!(
    /**
    Resolves with both values once both sources resolve.

    Fails with the first failure, abandoning the other source.

    ```
    use some_promise::{Deferred, Promise, merge2};

    let name = Deferred::<String>::new();
    let merged = merge2(Promise::resolved(7u32), name.promise()).unwrap();
    name.resolve("seven".to_string()).unwrap();
    let outcome = futures::executor::block_on(merged.into_future()).unwrap();
    assert_eq!(outcome.resolved(), Some((7, "seven".to_string())));
    ```
    */
    merge2, A a 0, B b 1
);
merge!(
    /// Resolves with all three values once every source resolves.
    merge3, A a 0, B b 1, C c 2
);
merge!(
    /// Resolves with all four values once every source resolves.
    merge4, A a 0, B b 1, C c 2, D d 3
);

#[cfg(test)]
mod tests {
    use super::{Gathered, gather};

    #[test]
    fn gather_is_positional() {
        let mut gathered = Gathered {
            slots: vec![None, None, None],
            missing: 3,
        };
        assert_eq!(gather(&mut gathered, 2, 'c'), None);
        assert_eq!(gather(&mut gathered, 0, 'a'), None);
        assert_eq!(gather(&mut gathered, 1, 'b'), Some(vec!['a', 'b', 'c']));
    }

    #[test]
    fn gather_ignores_bad_index() {
        let mut gathered = Gathered {
            slots: vec![None],
            missing: 1,
        };
        assert_eq!(gather(&mut gathered, 5, 1), None);
        assert_eq!(gathered.missing, 1);
    }
}
