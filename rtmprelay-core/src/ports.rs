//! Inbound media port allocation
//!
//! A single process-wide cursor hands out consecutive port pairs. Released
//! ports are never recycled; the cursor only wraps back to the start of the
//! configured range once every port in it has been handed out.

use crate::types::PortPair;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::error;

/// First port handed out when no configuration overrides it.
pub const DEFAULT_PORT_BASE: u16 = 11000;

pub struct PortAllocator {
    base: u16,
    /// Number of whole pairs in `[base, max]`, at least one
    pairs: u16,
    /// Pairs handed out so far
    cursor: AtomicU32,
}

impl PortAllocator {
    /// Allocator over the inclusive range `[base, max]`.
    ///
    /// `base` is clamped to `u16::MAX - 1` and a range narrower than one
    /// pair is widened to exactly one pair, so every pair holds two
    /// distinct valid ports.
    #[must_use]
    pub fn new(base: u16, max: u16) -> Self {
        let base = base.min(u16::MAX - 1);
        let width = max.max(base + 1) - base;
        // (width + 1) / 2 without overflowing when the range is all of u16
        let pairs = width / 2 + (width & 1);
        Self {
            base,
            pairs,
            cursor: AtomicU32::new(0),
        }
    }

    /// Hand out the next `(audio, video)` pair.
    ///
    /// Both ports come from a single atomic step, so concurrent callers can
    /// never observe overlapping pairs. No check is made that the OS port is
    /// free; bind failures surface from the pipeline itself.
    ///
    /// Once the range is exhausted the cursor wraps, and a new pair may
    /// collide with one a long-running session still streams on.
    pub fn allocate_pair(&self) -> PortPair {
        let pair = self.cursor.fetch_add(1, Ordering::SeqCst);
        let index = pair % u32::from(self.pairs);
        if index == 0 && pair != 0 {
            error!(
                base = self.base,
                pairs = self.pairs,
                "Port range exhausted, wrapping to the start of the range; ports may collide with live sessions"
            );
        }
        // index < pairs, and base + 2 * pairs - 1 <= max
        let audio = self.base + 2 * index as u16;
        PortPair {
            audio,
            video: audio + 1,
        }
    }

    /// Number of pairs handed out so far.
    pub fn allocated_pairs(&self) -> u32 {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_BASE, u16::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_pairs_are_distinct_and_monotonic() {
        let allocator = PortAllocator::default();
        let first = allocator.allocate_pair();
        let second = allocator.allocate_pair();

        assert_eq!(first, PortPair { audio: 11000, video: 11001 });
        assert_eq!(second, PortPair { audio: 11002, video: 11003 });
        assert_eq!(allocator.allocated_pairs(), 2);
    }

    #[test]
    fn test_wraps_after_exhausting_range() {
        let allocator = PortAllocator::new(20000, 20003);
        assert_eq!(allocator.allocate_pair().audio, 20000);
        assert_eq!(allocator.allocate_pair().audio, 20002);
        assert_eq!(allocator.allocate_pair().audio, 20000);
    }

    #[test]
    fn test_odd_width_range_never_exceeds_max() {
        let allocator = PortAllocator::new(65533, 65535);
        for _ in 0..4 {
            let pair = allocator.allocate_pair();
            assert!(pair.audio >= 65533);
            assert!(pair.video <= 65535);
            assert_ne!(pair.audio, pair.video);
        }
    }

    #[test]
    fn test_top_of_range_still_yields_distinct_ports() {
        for (base, max) in [(65535, 65535), (65534, 65535), (65535, 0), (0, 0)] {
            let allocator = PortAllocator::new(base, max);
            for _ in 0..3 {
                let pair = allocator.allocate_pair();
                assert_ne!(pair.audio, pair.video, "range {base}..={max}");
                assert_eq!(pair.video, pair.audio + 1);
            }
        }

        let pair = PortAllocator::new(65535, 65535).allocate_pair();
        assert_eq!(pair, PortPair { audio: 65534, video: 65535 });
    }

    #[test]
    fn test_full_u16_range() {
        let allocator = PortAllocator::new(0, u16::MAX);
        assert_eq!(allocator.pairs, 32768);
        assert_eq!(allocator.allocate_pair(), PortPair { audio: 0, video: 1 });
    }

    #[test]
    fn test_concurrent_allocation_never_collides() {
        let allocator = Arc::new(PortAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..100).map(|_| allocator.allocate_pair()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ports = HashSet::new();
        for handle in handles {
            for pair in handle.join().unwrap() {
                assert!(ports.insert(pair.audio));
                assert!(ports.insert(pair.video));
            }
        }
        assert_eq!(ports.len(), 8 * 100 * 2);
    }
}
