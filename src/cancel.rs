// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancelation.
//!
//! A [`CancelationSource`] owns the right to cancel; it hands out [`CancelationToken`]s
//! that observers can poll or register callbacks with. Canceling never interrupts
//! running code: it only runs the registered callbacks, each at most once.
//!
//! # Examples
//!
//! ```
//! use some_promise::{CancelationSource, Deferred, State};
//!
//! let source = CancelationSource::new();
//! let deferred = Deferred::<u32>::with_token(&source.token());
//! let promise = deferred.promise();
//! source.cancel();
//!
//! // the token won the race, so the producer's late resolve has no effect
//! assert!(!deferred.try_resolve(1));
//! let outcome = futures::executor::block_on(promise.into_future()).unwrap();
//! assert_eq!(outcome.state(), State::Canceled);
//! ```

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Callback = Box<dyn FnOnce() + Send>;

struct Shared {
    canceled: AtomicBool,
    next_registration: AtomicU64,
    //None once canceled
    callbacks: Mutex<Option<Vec<(u64, Callback)>>>,
}

/// Owns the right to cancel its tokens.
pub struct CancelationSource {
    shared: Arc<Shared>,
}

/// Observes cancelation of a [`CancelationSource`].
#[derive(Clone, Default)]
pub struct CancelationToken {
    shared: Option<Arc<Shared>>,
}

/// A callback registered with [`CancelationToken::register`].
///
/// Dropping the registration leaves the callback registered.
pub struct CancelationRegistration {
    shared: Weak<Shared>,
    id: u64,
}

impl CancelationSource {
    pub fn new() -> Self {
        CancelationSource {
            shared: Arc::new(Shared {
                canceled: AtomicBool::new(false),
                next_registration: AtomicU64::new(0),
                callbacks: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    pub fn token(&self) -> CancelationToken {
        CancelationToken {
            shared: Some(self.shared.clone()),
        }
    }

    /// Requests cancelation and runs every registered callback, in registration order.
    ///
    /// Later calls do nothing.
    pub fn cancel(&self) {
        let callbacks = {
            let mut lock = self.shared.callbacks.lock().expect("Mutex poisoned");
            self.shared.canceled.store(true, Ordering::Release);
            lock.take()
        };
        //run outside the lock so callbacks may register or unregister
        for (_, callback) in callbacks.into_iter().flatten() {
            callback();
        }
    }

    pub fn is_cancelation_requested(&self) -> bool {
        self.shared.canceled.load(Ordering::Acquire)
    }
}

impl Default for CancelationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelationToken {
    /// A token that can never be canceled.
    pub fn none() -> Self {
        CancelationToken { shared: None }
    }

    pub fn can_be_canceled(&self) -> bool {
        self.shared.is_some()
    }

    pub fn is_cancelation_requested(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|s| s.canceled.load(Ordering::Acquire))
    }

    /**
    Registers `callback` to run when the token is canceled.

    If the token is already canceled, `callback` runs immediately and `None` is returned.
    A token that can never be canceled drops `callback` and returns `None`.
    */
    pub fn register(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Option<CancelationRegistration> {
        let shared = self.shared.as_ref()?;
        let mut lock = shared.callbacks.lock().expect("Mutex poisoned");
        match lock.as_mut() {
            Some(callbacks) => {
                let id = shared.next_registration.fetch_add(1, Ordering::Relaxed);
                callbacks.push((id, Box::new(callback)));
                Some(CancelationRegistration {
                    shared: Arc::downgrade(shared),
                    id,
                })
            }
            None => {
                drop(lock);
                callback();
                None
            }
        }
    }
}

impl CancelationRegistration {
    /// Removes the callback.
    ///
    /// Returns `false` if the callback already ran (or is running) because of cancelation.
    pub fn unregister(self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let mut lock = shared.callbacks.lock().expect("Mutex poisoned");
        match lock.as_mut() {
            Some(callbacks) => {
                let before = callbacks.len();
                callbacks.retain(|(id, _)| *id != self.id);
                callbacks.len() != before
            }
            None => false,
        }
    }
}

impl Debug for CancelationSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelationSource")
            .field("canceled", &self.is_cancelation_requested())
            .finish()
    }
}

impl Debug for CancelationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelationToken")
            .field("can_be_canceled", &self.can_be_canceled())
            .field("canceled", &self.is_cancelation_requested())
            .finish()
    }
}

impl Debug for CancelationRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelationRegistration")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CancelationSource, CancelationToken};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn callbacks_fire_once() {
        let source = CancelationSource::new();
        let token = source.token();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let _registration = token.register(move || {
            f.fetch_add(1, Ordering::Relaxed);
        });
        source.cancel();
        source.cancel();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        assert!(token.is_cancelation_requested());
    }

    #[test]
    fn unregister_prevents_callback() {
        let source = CancelationSource::new();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let registration = source
            .token()
            .register(move || {
                f.fetch_add(1, Ordering::Relaxed);
            })
            .expect("registered");
        assert!(registration.unregister());
        source.cancel();
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn register_after_cancel_runs_inline() {
        let source = CancelationSource::new();
        source.cancel();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let registration = source.token().register(move || {
            f.fetch_add(1, Ordering::Relaxed);
        });
        assert!(registration.is_none());
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unregister_after_cancel_fails() {
        let source = CancelationSource::new();
        let registration = source.token().register(|| {}).expect("registered");
        source.cancel();
        assert!(!registration.unregister());
    }

    #[test]
    fn none_token() {
        let token = CancelationToken::none();
        assert!(!token.can_be_canceled());
        assert!(token.register(|| unreachable!()).is_none());
    }
}
