// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generation tokens that invalidate stale handles.
//!
//! Every handle captures the generation of its node when it is created. Any
//! operation first checks that the node's generation still matches; consuming a
//! handle, settling a deferred and recycling a node all advance it.
//!
//! The counter is 16 bits wide and wraps. A handle that is kept across exactly
//! 65536 advances of the same node would validate again; this is accepted.

use std::sync::atomic::{AtomicU16, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Generation(AtomicU16);

impl Generation {
    pub(crate) fn current(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn matches(&self, id: u16) -> bool {
        self.current() == id
    }

    /// Moves to the next generation, returning it.
    pub(crate) fn advance(&self) -> u16 {
        //fetch_add wraps on overflow
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::Generation;
    use std::sync::atomic::AtomicU16;

    #[test]
    fn advance_invalidates() {
        let generation = Generation::default();
        let id = generation.current();
        assert!(generation.matches(id));
        let next = generation.advance();
        assert!(!generation.matches(id));
        assert!(generation.matches(next));
    }

    #[test]
    fn wraps() {
        let generation = Generation(AtomicU16::new(u16::MAX));
        assert_eq!(generation.advance(), 0);
        assert!(generation.matches(0));
    }
}
