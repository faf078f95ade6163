// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-type free lists for promise nodes and their helpers.
//!
//! Every pooled type gets its own bounded lock-free queue, looked up by [`TypeId`].
//! Pooling is skipped entirely when [`crate::Config::object_pooling`] is off or the
//! `validation` feature is enabled, so a stale handle can never land on a live,
//! recycled object during validation runs.

use crossbeam_queue::ArrayQueue;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// An object that can be returned to its pool.
pub(crate) trait Recycle: Default + Send + Sync + 'static {
    /// Puts the object back into its freshly constructed state.
    ///
    /// Called without any of the object's locks held.
    fn reset(&self);
}

type Queues = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static QUEUES: OnceLock<Queues> = OnceLock::new();

fn queues() -> &'static Queues {
    QUEUES.get_or_init(|| RwLock::new(HashMap::new()))
}

pub(crate) fn enabled() -> bool {
    !cfg!(feature = "validation") && crate::config::pooling_enabled()
}

fn queue<X: Recycle>() -> Arc<ArrayQueue<Arc<X>>> {
    let key = TypeId::of::<X>();
    let existing = queues()
        .read()
        .expect("Pool lock poisoned")
        .get(&key)
        .cloned();
    let erased = match existing {
        Some(erased) => erased,
        None => {
            let capacity = crate::config::config().pool_capacity().max(1);
            queues()
                .write()
                .expect("Pool lock poisoned")
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(ArrayQueue::<Arc<X>>::new(capacity)) as Arc<dyn Any + Send + Sync>
                })
                .clone()
        }
    };
    erased
        .downcast::<ArrayQueue<Arc<X>>>()
        .expect("Pool entry has the wrong type")
}

/// Takes a recycled object, or makes a new one.
pub(crate) fn acquire<X: Recycle>() -> Arc<X> {
    if enabled() {
        if let Some(recycled) = queue::<X>().pop() {
            return recycled;
        }
        log::trace!("pool miss for {}", std::any::type_name::<X>());
    }
    Arc::new(X::default())
}

/// Resets `object` and offers it back to its pool.
///
/// The object is dropped instead when pooling is off or the pool is full.
pub(crate) fn release<X: Recycle>(object: Arc<X>) {
    object.reset();
    if enabled() {
        //a full queue hands the object back; dropping it is fine
        let _ = queue::<X>().push(object);
    }
}

/// Drops every pooled object of every type.
pub fn clear_object_pool() {
    let mut queues = queues().write().expect("Pool lock poisoned");
    queues.clear();
}

#[cfg(test)]
mod tests {
    use super::{Recycle, acquire, enabled, release};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Probe {
        resets: AtomicU32,
    }

    impl Recycle for Probe {
        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn reuses_released_objects() {
        let first = acquire::<Probe>();
        let address = Arc::as_ptr(&first);
        release(first);
        let second = acquire::<Probe>();
        if enabled() {
            assert_eq!(Arc::as_ptr(&second), address);
            assert_eq!(second.resets.load(Ordering::Relaxed), 1);
        } else {
            assert_eq!(second.resets.load(Ordering::Relaxed), 0);
        }
    }
}
