// SPDX-License-Identifier: MIT OR Apache-2.0

//! The pooled state machine behind every promise.
//!
//! A [`Node`] moves from [`State::Pending`] to exactly one terminal state. Whatever
//! is waiting on it (the next node in a chain, a combinator's pass-through, an
//! awaiting future) is a [`Waiter`].
//!
//! # Consumption
//!
//! An ordinary node has a single consumer. Attaching a waiter, or forgetting the
//! promise, advances the node's generation so every other copy of the handle goes
//! stale. Once the outcome has been handed to its consumer the node is reset and
//! returned to the pool.
//!
//! A *preserved* node accepts any number of waiters, in attachment order, and hands
//! each a clone of the outcome. It is recycled only after it settles and its
//! preserved handle has been forgotten.
//!
//! # Locking
//!
//! All transitions happen under the node's mutex, which is what makes settlement
//! at-most-once. Waiters are always invoked after the lock is released, so they may
//! freely touch this node or any other.
//!
//! # Delivery
//!
//! Settling a node settles the next one in its chain, and so on. Deliveries that
//! happen while another delivery is running on the same thread are queued and run by
//! the outermost one, so the stack stays flat however long the chain is. A settle
//! call made from outside any callback returns only after the queue has drained.

mod generation;

pub(crate) use generation::Generation;

use crate::cancel::CancelationRegistration;
use crate::outcome::{Outcome, State};
use crate::pool::{self, Recycle};
use crate::{Error, trace};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Delivery = Box<dyn FnOnce()>;

thread_local! {
    //Some while a delivery is running on this thread
    static DELIVERIES: RefCell<Option<VecDeque<Delivery>>> = const { RefCell::new(None) };
}

/// Clears the delivery queue even if a delivery unwinds.
struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        //anything left over belongs to an unwinding delivery; drop it outside the borrow
        let leftover = DELIVERIES.with(|queue| queue.borrow_mut().take());
        drop(leftover);
    }
}

/// Runs `delivery` now, or after the delivery already running on this thread.
fn deliver(delivery: Delivery) {
    let first = DELIVERIES.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.as_mut() {
            Some(pending) => {
                pending.push_back(delivery);
                None
            }
            None => {
                *queue = Some(VecDeque::new());
                Some(delivery)
            }
        }
    });
    let Some(first) = first else {
        return;
    };
    let _draining = Draining;
    first();
    while let Some(next) =
        DELIVERIES.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    {
        next();
    }
}

/// Something waiting for a node to settle.
pub(crate) trait Waiter<T>: Send + Sync {
    /// Called exactly once, without any node lock held.
    fn settled(self: Arc<Self>, outcome: Outcome<T>);

    /// Chain-absolute progress of the node being waited on.
    fn progress(&self, _absolute: f64) {}
}

struct Slot<T> {
    state: State,
    outcome: Option<Outcome<T>>,
    waiters: Vec<Arc<dyn Waiter<T>>>,
    depth: u16,
    progress: f64,
    //Some once preserved
    cloner: Option<fn(&T) -> T>,
    //the preserved handle has not been forgotten
    retained: bool,
    //an unpreserved node whose handle was forgotten before it settled
    forgotten: bool,
    //a preserved outcome reached at least one waiter
    delivered: bool,
    registration: Option<CancelationRegistration>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            state: State::Pending,
            outcome: None,
            waiters: Vec::new(),
            depth: 0,
            progress: 0.0,
            cloner: None,
            retained: false,
            forgotten: false,
            delivered: false,
            registration: None,
        }
    }
}

pub(crate) struct Node<T> {
    id: Generation,
    deferred_id: Generation,
    slot: Mutex<Slot<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Node {
            id: Generation::default(),
            deferred_id: Generation::default(),
            slot: Mutex::new(Slot::default()),
        }
    }
}

impl<T: Send + 'static> Recycle for Node<T> {
    fn reset(&self) {
        let mut slot = self.lock();
        let mut waiters = std::mem::take(&mut slot.waiters);
        waiters.clear();
        *slot = Slot::default();
        //keep the allocation for the next life
        slot.waiters = waiters;
        self.id.advance();
        self.deferred_id.advance();
        log::trace!("recycled {}", std::any::type_name::<Self>());
    }
}

impl<T> Drop for Node<T> {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !slot.delivered {
            if let Some(Outcome::Rejected(rejection)) = slot.outcome.take() {
                crate::config::report_uncaught(rejection);
            }
        }
    }
}

fn copy<T>(outcome: &Outcome<T>, cloner: fn(&T) -> T) -> Outcome<T> {
    match outcome {
        Outcome::Resolved(value) => Outcome::Resolved(cloner(value)),
        Outcome::Rejected(rejection) => Outcome::Rejected(rejection.clone()),
        Outcome::Canceled => Outcome::Canceled,
    }
}

/// Work left over once the lock is released.
enum After<T> {
    Nothing,
    Deliver(Arc<dyn Waiter<T>>, Outcome<T>),
    DeliverAll(Vec<(Arc<dyn Waiter<T>>, Outcome<T>)>),
    Uncaught(crate::Rejection),
}

impl<T: Send + 'static> Node<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().expect("Mutex poisoned")
    }

    /// Takes a pending node from the pool.
    ///
    /// Returns the node with its promise and deferred generations.
    pub(crate) fn pending(depth: u16) -> (Arc<Self>, u16, u16) {
        let node = pool::acquire::<Self>();
        let ids = {
            let mut slot = node.lock();
            slot.depth = depth;
            (node.id.current(), node.deferred_id.current())
        };
        trace::node_created::<T>(depth);
        (node, ids.0, ids.1)
    }

    /// Makes a node that is already settled with `outcome`.
    pub(crate) fn settled(outcome: Outcome<T>, depth: u16) -> (Arc<Self>, u16) {
        let (node, id, _) = Self::pending(depth);
        node.settle(outcome);
        (node, id)
    }

    pub(crate) fn is_valid(&self, id: u16) -> bool {
        self.id.matches(id)
    }

    pub(crate) fn is_preserved(&self) -> bool {
        self.lock().cloner.is_some()
    }

    pub(crate) fn is_pending(&self, deferred_id: u16) -> bool {
        self.deferred_id.matches(deferred_id) && self.lock().state == State::Pending
    }

    /// Settles on behalf of the deferred holding `deferred_id`.
    pub(crate) fn settle_deferred(self: &Arc<Self>, deferred_id: u16, outcome: Outcome<T>) -> bool {
        let slot = self.lock();
        if !self.deferred_id.matches(deferred_id) || slot.state != State::Pending {
            return false;
        }
        self.complete(slot, outcome);
        true
    }

    /// Settles a node no producer handle refers to.
    ///
    /// Returns `false` if the node had already settled.
    pub(crate) fn settle(self: &Arc<Self>, outcome: Outcome<T>) -> bool {
        let slot = self.lock();
        if slot.state != State::Pending {
            return false;
        }
        self.complete(slot, outcome);
        true
    }

    fn complete(self: &Arc<Self>, mut slot: MutexGuard<'_, Slot<T>>, outcome: Outcome<T>) {
        let traced = outcome.rejection().cloned();
        slot.state = outcome.state();
        self.deferred_id.advance();
        let registration = slot.registration.take();
        let waiters = std::mem::take(&mut slot.waiters);

        let mut release = false;
        let after = match slot.cloner {
            None => match waiters.into_iter().next() {
                Some(waiter) => {
                    release = true;
                    After::Deliver(waiter, outcome)
                }
                None if slot.forgotten => {
                    release = true;
                    match outcome {
                        Outcome::Rejected(rejection) => After::Uncaught(rejection),
                        _ => After::Nothing,
                    }
                }
                None => {
                    slot.outcome = Some(outcome);
                    After::Nothing
                }
            },
            Some(cloner) => {
                let deliveries: Vec<_> = waiters
                    .into_iter()
                    .map(|waiter| (waiter, copy(&outcome, cloner)))
                    .collect();
                slot.delivered |= !deliveries.is_empty();
                if slot.retained {
                    slot.outcome = Some(outcome);
                    After::DeliverAll(deliveries)
                } else {
                    release = true;
                    match outcome {
                        Outcome::Rejected(rejection) if deliveries.is_empty() => {
                            After::Uncaught(rejection)
                        }
                        _ => After::DeliverAll(deliveries),
                    }
                }
            }
        };
        drop(slot);

        if let Some(rejection) = traced {
            trace::rejected(&rejection);
        }
        if let Some(registration) = registration {
            registration.unregister();
        }
        if release {
            pool::release(self.clone());
        }
        match after {
            After::Nothing => {}
            After::Deliver(waiter, outcome) => {
                deliver(Box::new(move || waiter.settled(outcome)));
            }
            After::DeliverAll(deliveries) => {
                deliver(Box::new(move || {
                    for (waiter, outcome) in deliveries {
                        waiter.settled(outcome);
                    }
                }));
            }
            After::Uncaught(rejection) => crate::config::report_uncaught(rejection),
        }
    }

    /// Attaches `waiter` through the handle holding `id`.
    ///
    /// If the node already settled, `waiter` runs before this returns.
    pub(crate) fn attach(self: &Arc<Self>, id: u16, waiter: Arc<dyn Waiter<T>>) -> Result<(), Error> {
        let mut slot = self.lock();
        if !self.id.matches(id) {
            return Err(Error::InvalidHandle);
        }
        match slot.cloner {
            None => {
                self.id.advance();
                match slot.outcome.take() {
                    Some(outcome) => {
                        drop(slot);
                        pool::release(self.clone());
                        waiter.settled(outcome);
                    }
                    None => {
                        let progress = slot.progress;
                        slot.waiters.push(waiter.clone());
                        drop(slot);
                        if progress > 0.0 {
                            waiter.progress(progress);
                        }
                    }
                }
            }
            Some(cloner) => match slot.outcome.as_ref().map(|o| copy(o, cloner)) {
                Some(outcome) => {
                    slot.delivered = true;
                    drop(slot);
                    waiter.settled(outcome);
                }
                None => {
                    let progress = slot.progress;
                    slot.waiters.push(waiter.clone());
                    drop(slot);
                    if progress > 0.0 {
                        waiter.progress(progress);
                    }
                }
            },
        }
        Ok(())
    }

    /// Releases the handle holding `id` without observing the outcome.
    pub(crate) fn forget(self: &Arc<Self>, id: u16) -> Result<(), Error> {
        let mut slot = self.lock();
        if !self.id.matches(id) {
            return Err(Error::InvalidHandle);
        }
        self.id.advance();
        let settled = slot.state != State::Pending;
        let uncaught = match slot.cloner {
            None if settled => slot.outcome.take(),
            None => {
                slot.forgotten = true;
                None
            }
            Some(_) => {
                slot.retained = false;
                match slot.outcome.take() {
                    Some(outcome) if !slot.delivered => Some(outcome),
                    _ => None,
                }
            }
        };
        drop(slot);
        if settled {
            pool::release(self.clone());
        }
        if let Some(Outcome::Rejected(rejection)) = uncaught {
            crate::config::report_uncaught(rejection);
        }
        Ok(())
    }

    /// Turns the node multi-consumer, returning the generation of the preserved handle.
    pub(crate) fn preserve(&self, id: u16, cloner: fn(&T) -> T) -> Result<u16, Error> {
        let mut slot = self.lock();
        if !self.id.matches(id) {
            return Err(Error::InvalidHandle);
        }
        if slot.cloner.is_some() {
            return Ok(id);
        }
        slot.cloner = Some(cloner);
        slot.retained = true;
        Ok(self.id.advance())
    }

    /// Reports progress on behalf of the deferred holding `deferred_id`.
    pub(crate) fn report_progress(&self, deferred_id: u16, fraction: f32) -> bool {
        let slot = self.lock();
        if !self.deferred_id.matches(deferred_id) || slot.state != State::Pending {
            return false;
        }
        let absolute = f64::from(slot.depth) + f64::from(fraction);
        self.publish_progress(slot, absolute);
        true
    }

    /// Forwards chain-absolute progress from upstream to the node issued as `deferred_id`.
    pub(crate) fn forward_progress(&self, deferred_id: u16, absolute: f64) {
        let slot = self.lock();
        if !self.deferred_id.matches(deferred_id) || slot.state != State::Pending {
            return;
        }
        self.publish_progress(slot, absolute);
    }

    fn publish_progress(&self, mut slot: MutexGuard<'_, Slot<T>>, absolute: f64) {
        slot.progress = absolute;
        let waiters = slot.waiters.clone();
        drop(slot);
        if !waiters.is_empty() {
            deliver(Box::new(move || {
                for waiter in waiters {
                    waiter.progress(absolute);
                }
            }));
        }
    }

    /// Keeps `registration` until the node settles.
    ///
    /// Hands the registration back if the deferred already settled.
    pub(crate) fn hold_registration(
        &self,
        deferred_id: u16,
        registration: CancelationRegistration,
    ) -> Option<CancelationRegistration> {
        let mut slot = self.lock();
        if self.deferred_id.matches(deferred_id) && slot.state == State::Pending {
            slot.registration = Some(registration);
            None
        } else {
            Some(registration)
        }
    }
}
