// SPDX-License-Identifier: MIT OR Apache-2.0

//! Waiters that connect one node of a chain to the next.

use super::{Promise, Repr};
use crate::context::ExecutionContext;
use crate::node::{Node, Waiter};
use crate::outcome::{Outcome, Rejection, unwound};
use crate::{Error, Priority};
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

/// What a reaction decided the next node should do.
pub(crate) enum Next<U> {
    Settle(Outcome<U>),
    /// Follow another promise.
    Adopt(Promise<U>),
}

impl<U: Send + 'static> Next<U> {
    /// The promise for a reaction that ran before any node existed.
    pub(crate) fn into_promise(self, depth: u16) -> Promise<U> {
        match self {
            Next::Settle(outcome) => Promise::settled_at(outcome, depth),
            Next::Adopt(promise) if promise.is_valid() => promise,
            Next::Adopt(_) => Promise::rejected(Error::InvalidHandle),
        }
    }
}

/// Runs `reaction`, translating unwinds into outcomes.
pub(crate) fn run<T, U, F>(reaction: F, outcome: Outcome<T>) -> Next<U>
where
    F: FnOnce(Outcome<T>) -> Next<U>,
{
    catch_unwind(AssertUnwindSafe(move || reaction(outcome)))
        .unwrap_or_else(|payload| Next::Settle(unwound(payload)))
}

/// Runs a reaction when its source settles, then settles or wires up the target.
pub(crate) struct Continuation<T, U, F> {
    target: Arc<Node<U>>,
    deferred_id: u16,
    depth: u16,
    reaction: Mutex<Option<F>>,
    _source: PhantomData<fn(T)>,
}

impl<T, U, F> Continuation<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Next<U> + Send + 'static,
{
    pub(crate) fn bind(target: Arc<Node<U>>, deferred_id: u16, depth: u16, reaction: F) -> Arc<Self> {
        Arc::new(Continuation {
            target,
            deferred_id,
            depth,
            reaction: Mutex::new(Some(reaction)),
            _source: PhantomData,
        })
    }
}

impl<T, U, F> Waiter<T> for Continuation<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(Outcome<T>) -> Next<U> + Send + 'static,
{
    fn settled(self: Arc<Self>, outcome: Outcome<T>) {
        let reaction = self.reaction.lock().expect("Mutex poisoned").take();
        let Some(reaction) = reaction else {
            return;
        };
        match run(reaction, outcome) {
            Next::Settle(outcome) => {
                self.target.settle_deferred(self.deferred_id, outcome);
            }
            Next::Adopt(promise) => {
                adopt(&self.target, self.deferred_id, self.depth, promise);
            }
        }
    }

    fn progress(&self, absolute: f64) {
        self.target.forward_progress(self.deferred_id, absolute);
    }
}

/// Makes `target` follow `promise`.
///
/// The adopted promise's own progress fills the last step of the target's range.
pub(crate) fn adopt<U: Send + 'static>(
    target: &Arc<Node<U>>,
    deferred_id: u16,
    depth: u16,
    promise: Promise<U>,
) {
    match promise.repr {
        Repr::Resolved(value) => {
            target.settle_deferred(deferred_id, Outcome::Resolved(value));
        }
        Repr::Node { node, id, depth: inner } => {
            if Arc::ptr_eq(&node, target) {
                target.settle_deferred(
                    deferred_id,
                    Outcome::Rejected(Rejection::new(Error::CircularAdoption)),
                );
                return;
            }
            let follower = Arc::new(Follow {
                target: target.clone(),
                deferred_id,
                base: f64::from(depth),
                scale: f64::from(inner) + 1.0,
            });
            if let Err(error) = node.attach(id, follower) {
                target.settle_deferred(deferred_id, Outcome::Rejected(Rejection::new(error)));
            }
        }
    }
}

struct Follow<U> {
    target: Arc<Node<U>>,
    deferred_id: u16,
    base: f64,
    scale: f64,
}

impl<U: Send + 'static> Waiter<U> for Follow<U> {
    fn settled(self: Arc<Self>, outcome: Outcome<U>) {
        self.target.settle_deferred(self.deferred_id, outcome);
    }

    fn progress(&self, absolute: f64) {
        let step = (absolute / self.scale).clamp(0.0, 1.0);
        self.target.forward_progress(self.deferred_id, self.base + step);
    }
}

/// Settles the target on an execution context instead of inline.
pub(crate) struct Forward<T> {
    target: Arc<Node<T>>,
    deferred_id: u16,
    context: Arc<dyn ExecutionContext>,
    priority: Priority,
}

impl<T: Send + 'static> Forward<T> {
    pub(crate) fn marshal(
        target: Arc<Node<T>>,
        deferred_id: u16,
        context: Arc<dyn ExecutionContext>,
    ) -> Arc<Self> {
        Arc::new(Forward {
            target,
            deferred_id,
            context,
            priority: crate::config::config().dispatch_priority(),
        })
    }
}

impl<T: Send + 'static> Waiter<T> for Forward<T> {
    fn settled(self: Arc<Self>, outcome: Outcome<T>) {
        let context = self.context.clone();
        let priority = self.priority;
        context.post(
            priority,
            Box::new(move || {
                self.target.settle_deferred(self.deferred_id, outcome);
            }),
        );
    }

    fn progress(&self, absolute: f64) {
        self.target.forward_progress(self.deferred_id, absolute);
    }
}

/// Calls a progress listener, then passes the outcome through unchanged.
pub(crate) struct ProgressListener<T, F> {
    target: Arc<Node<T>>,
    deferred_id: u16,
    depth: u16,
    listener: F,
}

impl<T, F> ProgressListener<T, F>
where
    T: Send + 'static,
    F: Fn(f32) + Send + Sync + 'static,
{
    pub(crate) fn new(target: Arc<Node<T>>, deferred_id: u16, depth: u16, listener: F) -> Self {
        ProgressListener {
            target,
            deferred_id,
            depth,
            listener,
        }
    }

    /// Calls `listener`, reporting a panic as an uncaught rejection.
    pub(crate) fn notify(listener: &F, value: f32) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(value))) {
            if let Outcome::Rejected(rejection) = unwound::<()>(payload) {
                crate::config::report_uncaught(rejection);
            }
        }
    }
}

impl<T, F> Waiter<T> for ProgressListener<T, F>
where
    T: Send + 'static,
    F: Fn(f32) + Send + Sync + 'static,
{
    fn settled(self: Arc<Self>, outcome: Outcome<T>) {
        if outcome.is_resolved() {
            Self::notify(&self.listener, 1.0);
        }
        self.target.settle_deferred(self.deferred_id, outcome);
    }

    fn progress(&self, absolute: f64) {
        let normalized = absolute / (f64::from(self.depth) + 1.0);
        Self::notify(&self.listener, normalized.clamp(0.0, 1.0) as f32);
        self.target.forward_progress(self.deferred_id, absolute);
    }
}
