// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result of a settled promise.
//!
//! A promise ends in exactly one of three ways: it is resolved with a value, rejected
//! with a [`Rejection`], or canceled. [`Outcome`] carries that result through the
//! continuation graph; nothing in the core relies on unwinding to move a failure
//! from one node to the next.
//!
//! Unwinding only appears at the callback boundary. A callback that panics rejects
//! the next promise with a [`Panicked`] reason, and a callback that calls [`cancel`]
//! cancels the next promise instead.

use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// The observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Not settled yet.
    #[default]
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with a [`Rejection`].
    Rejected,
    /// Settled by cancelation.
    Canceled,
}

/// How a promise was settled.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The promise was resolved with a value.
    Resolved(T),
    /// The promise was rejected.
    Rejected(Rejection),
    /// The promise was canceled.
    Canceled,
}

impl<T> Outcome<T> {
    /// Returns the terminal [`State`] this outcome represents.
    pub fn state(&self) -> State {
        match self {
            Outcome::Resolved(_) => State::Resolved,
            Outcome::Rejected(_) => State::Rejected,
            Outcome::Canceled => State::Canceled,
        }
    }

    /// Returns the value, if the outcome is [`Outcome::Resolved`].
    pub fn resolved(self) -> Option<T> {
        match self {
            Outcome::Resolved(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the rejection reason, if the outcome is [`Outcome::Rejected`].
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    /// Maps the resolved value, passing failures through unchanged.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Resolved(value) => Outcome::Resolved(f(value)),
            Outcome::Rejected(rejection) => Outcome::Rejected(rejection),
            Outcome::Canceled => Outcome::Canceled,
        }
    }
}

/// Anything that can be used as a rejection reason.
///
/// Implemented for every `'static` type that is `Debug + Send + Sync`.
pub trait Reason: Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<E: Any + Debug + Send + Sync> Reason for E {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased, cheaply cloneable rejection reason.
///
/// Preserved promises hand the same rejection to every consumer, so the reason is
/// shared rather than moved.
#[derive(Clone)]
pub struct Rejection {
    reason: Arc<dyn Reason>,
    type_name: &'static str,
}

impl Rejection {
    /// Wraps `reason`.
    ///
    /// Passing a `Rejection` returns it unchanged rather than nesting it.
    pub fn new<E: Reason>(reason: E) -> Self {
        if let Some(rejection) = (&reason as &dyn Any).downcast_ref::<Rejection>() {
            return rejection.clone();
        }
        Rejection {
            reason: Arc::new(reason),
            type_name: std::any::type_name::<E>(),
        }
    }

    /// Returns the reason if it has type `E`.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        //through the trait object, not the blanket impl on the `Arc` itself
        (*self.reason).as_any().downcast_ref::<E>()
    }

    pub fn is<E: Any>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// The type name of the wrapped reason, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns whether both rejections share the same reason instance.
    pub fn ptr_eq(&self, other: &Rejection) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Rejection::new(Panicked(message))
    }
}

impl Debug for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Rejection").field(&self.reason).finish()
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "promise rejected with {:?}", self.reason)
    }
}

/// The rejection reason produced when a callback panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panicked(pub String);

/// Unwind payload used by [`cancel`].
///
/// Never surfaces as a rejection: the callback boundary turns it into [`Outcome::Canceled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelSignal;

/**
Cancels the promise returned by the chaining call whose callback is running.

Only meaningful inside a promise callback. The unwind is started with
[`std::panic::resume_unwind`], so the panic hook does not run.

```
use some_promise::{Deferred, Outcome, State};

let deferred = Deferred::<u32>::new();
let next = deferred
    .promise()
    .then(|value| {
        if value > 10 {
            some_promise::cancel();
        }
        value
    })
    .unwrap();
deferred.resolve(11).unwrap();
let outcome = futures::executor::block_on(next.into_future()).unwrap();
assert_eq!(outcome.state(), State::Canceled);
```
*/
pub fn cancel() -> ! {
    std::panic::resume_unwind(Box::new(CancelSignal))
}

/// Translates an unwind out of a user callback into an outcome.
pub(crate) fn unwound<U>(payload: Box<dyn Any + Send>) -> Outcome<U> {
    if payload.is::<CancelSignal>() {
        Outcome::Canceled
    } else {
        Outcome::Rejected(Rejection::from_panic(payload))
    }
}
