// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Joiner, Store};
use crate::node::Waiter;
use crate::outcome::Outcome;
use crate::pool::{self, Recycle};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

struct Binding<T, S, R> {
    joiner: Arc<Joiner<S, R>>,
    index: usize,
    //depth of the source, for normalizing its progress
    depth: u16,
    store: Store<S, T, R>,
}

/// Links one source promise to one slot of a [`Joiner`].
///
/// Pooled. Bound when a combinator hooks a pending source; unbound and recycled
/// once the source reports.
pub(crate) struct PassThrough<T, S, R> {
    binding: Mutex<Option<Binding<T, S, R>>>,
    _source: PhantomData<fn(T)>,
}

impl<T, S, R> Default for PassThrough<T, S, R> {
    fn default() -> Self {
        PassThrough {
            binding: Mutex::new(None),
            _source: PhantomData,
        }
    }
}

impl<T, S, R> Recycle for PassThrough<T, S, R>
where
    T: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    fn reset(&self) {
        *self.binding.lock().expect("Mutex poisoned") = None;
    }
}

impl<T, S, R> PassThrough<T, S, R>
where
    T: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn bind(
        joiner: Arc<Joiner<S, R>>,
        index: usize,
        depth: u16,
        store: Store<S, T, R>,
    ) -> Arc<Self> {
        let pass = pool::acquire::<Self>();
        *pass.binding.lock().expect("Mutex poisoned") = Some(Binding {
            joiner,
            index,
            depth,
            store,
        });
        pass
    }
}

impl<T, S, R> Waiter<T> for PassThrough<T, S, R>
where
    T: Send + 'static,
    S: Send + 'static,
    R: Send + 'static,
{
    fn settled(self: Arc<Self>, outcome: Outcome<T>) {
        let binding = self.binding.lock().expect("Mutex poisoned").take();
        if let Some(binding) = binding {
            binding.joiner.report(binding.index, binding.store, outcome);
        }
        //a progress report may still hold a reference
        if Arc::strong_count(&self) == 1 {
            pool::release(self);
        }
    }

    fn progress(&self, absolute: f64) {
        let bound = self
            .binding
            .lock()
            .expect("Mutex poisoned")
            .as_ref()
            .map(|b| (b.joiner.clone(), b.index, b.depth));
        if let Some((joiner, index, depth)) = bound {
            let fraction = absolute / (f64::from(depth) + 1.0);
            joiner.progress(index, fraction.clamp(0.0, 1.0) as f32);
        }
    }
}
