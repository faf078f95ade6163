// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Promise, Repr};
use crate::Error;
use crate::node::Waiter;
use crate::outcome::Outcome;
use atomic_waker::AtomicWaker;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

struct Shared<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    waker: AtomicWaker,
}

impl<T: Send + 'static> Waiter<T> for Shared<T> {
    fn settled(self: Arc<Self>, outcome: Outcome<T>) {
        *self.outcome.lock().expect("Mutex poisoned") = Some(outcome);
        self.waker.wake();
    }
}

enum Inner<T> {
    //the promise is attached on first poll
    Unpolled(Promise<T>),
    Waiting(Arc<Shared<T>>),
    Done,
}

/**
A future that waits for a [`Promise`] to settle.

Created by `.await`ing a promise (through [`IntoFuture`](std::future::IntoFuture)).
Awaiting consumes the promise; awaiting a stale handle yields [`Error::InvalidHandle`].

Dropping the future after its first poll does not cancel the promise.
*/
#[must_use = "futures do nothing unless polled"]
pub struct Awaiter<T> {
    inner: Inner<T>,
}

impl<T: Send + 'static> Awaiter<T> {
    pub(crate) fn new(promise: Promise<T>) -> Self {
        Awaiter {
            inner: Inner::Unpolled(promise),
        }
    }
}

impl<T> Unpin for Awaiter<T> {}

impl<T: Send + 'static> Future for Awaiter<T> {
    type Output = Result<Outcome<T>, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let shared = match std::mem::replace(&mut self.inner, Inner::Done) {
            Inner::Done => panic!("Awaiter polled after completion"),
            Inner::Unpolled(promise) => match promise.repr {
                Repr::Resolved(value) => return Poll::Ready(Ok(Outcome::Resolved(value))),
                Repr::Node { node, id, .. } => {
                    let shared = Arc::new(Shared::<T> {
                        outcome: Mutex::new(None),
                        waker: AtomicWaker::new(),
                    });
                    //register before attaching so an inline settle still wakes us
                    shared.waker.register(cx.waker());
                    node.attach(id, shared.clone())?;
                    shared
                }
            },
            Inner::Waiting(shared) => {
                shared.waker.register(cx.waker());
                shared
            }
        };
        let outcome = shared.outcome.lock().expect("Mutex poisoned").take();
        match outcome {
            Some(outcome) => Poll::Ready(Ok(outcome)),
            None => {
                self.inner = Inner::Waiting(shared);
                Poll::Pending
            }
        }
    }
}

impl<T> Debug for Awaiter<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner {
            Inner::Unpolled(_) => "unpolled",
            Inner::Waiting(_) => "waiting",
            Inner::Done => "done",
        };
        f.debug_struct("Awaiter").field("state", &state).finish()
    }
}
