// SPDX-License-Identifier: MIT OR Apache-2.0

/*!
This context is in use when no background context is configured.

It is intentionally the simplest idea possible, but it ensures [`crate::Dispatch::Background`]
always has somewhere to go.

> Cut my jobs into pieces, this is my last resort!
*/

use crate::Priority;
use crate::context::ExecutionContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

static WARNED: AtomicBool = AtomicBool::new(false);

/// Runs every posted job on a fresh thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastResortContext;

impl LastResortContext {
    pub fn new() -> Self {
        LastResortContext
    }
}

impl ExecutionContext for LastResortContext {
    fn post(&self, _priority: Priority, job: Box<dyn FnOnce() + Send>) {
        if !WARNED.swap(true, Ordering::Relaxed) {
            log::warn!(
                "some_promise::LastResortContext is in use.  This is not intended for production code; configure a background context."
            );
        }
        thread::Builder::new()
            .name("some_promise last resort".to_string())
            .spawn(job)
            .expect("Can't spawn last resort thread");
    }
}

#[cfg(test)]
mod tests {
    use super::LastResortContext;
    use crate::Priority;
    use crate::context::ExecutionContext;
    use std::sync::mpsc::channel;

    #[test]
    fn runs_on_another_thread() {
        let (sender, receiver) = channel();
        let caller = std::thread::current().id();
        LastResortContext::new().post(
            Priority::Unknown,
            Box::new(move || {
                sender.send(std::thread::current().id()).unwrap();
            }),
        );
        let runner = receiver.recv().unwrap();
        assert_ne!(runner, caller);
    }
}
