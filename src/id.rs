//! Snowflake id generation.
//!
//! Ids are 63-bit positive integers laid out as:
//!
//! ```text
//! | 41 bits: ms since EPOCH | 10 bits: node | 12 bits: sequence |
//! ```
//!
//! A generator is bound to one node id. Ids it returns are strictly
//! increasing; generators on different nodes never collide.

use std::sync::Mutex;

use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Custom epoch (2010-11-04T01:42:54.657Z) in Unix milliseconds.
pub const EPOCH_MILLIS: i64 = 1_288_834_974_657;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

/// Largest accepted node id.
pub const MAX_NODE_ID: i64 = (1 << NODE_BITS) - 1;

const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const TIME_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;
const NODE_SHIFT: u32 = SEQUENCE_BITS;

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by [`IdGenerator`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// Node id is outside `0..=MAX_NODE_ID`.
    #[error("node id {0} out of range 0..={MAX_NODE_ID}")]
    InvalidNode(i64),

    /// The clock reported a time earlier than the last issued id.
    #[error("clock moved backwards: last={last_ms}ms now={now_ms}ms")]
    ClockMovedBackwards { last_ms: i64, now_ms: i64 },
}

// =============================================================================
// Clock
// =============================================================================

/// Millisecond time source.
pub trait Clock: Send + Sync + 'static {
    /// Current time in Unix milliseconds.
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by [`chrono::Utc`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

// =============================================================================
// Generator
// =============================================================================

#[derive(Debug)]
struct State {
    last_ms: i64,
    sequence: i64,
}

/// Thread-safe snowflake generator.
pub struct IdGenerator<C: Clock = SystemClock> {
    node: i64,
    clock: C,
    state: Mutex<State>,
}

impl<C: Clock> std::fmt::Debug for IdGenerator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

impl IdGenerator<SystemClock> {
    /// Create a generator for `node` using the system clock.
    pub fn new(node: i64) -> Result<Self, IdError> {
        Self::with_clock(node, SystemClock)
    }
}

impl<C: Clock> IdGenerator<C> {
    /// Create a generator with a custom clock.
    pub fn with_clock(node: i64, clock: C) -> Result<Self, IdError> {
        if !(0..=MAX_NODE_ID).contains(&node) {
            return Err(IdError::InvalidNode(node));
        }
        Ok(Self {
            node,
            clock,
            state: Mutex::new(State {
                last_ms: i64::MIN,
                sequence: 0,
            }),
        })
    }

    /// Node id embedded in every generated id.
    pub fn node(&self) -> i64 {
        self.node
    }

    /// Generate the next id.
    ///
    /// When the per-millisecond sequence is exhausted this spins until the
    /// clock moves to the next millisecond.
    ///
    /// # Errors
    /// Returns [`IdError::ClockMovedBackwards`] if the clock regressed since
    /// the previous call.
    pub fn generate(&self) -> Result<i64, IdError> {
        // A poisoned lock still holds a consistent (last_ms, sequence) pair.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut now = self.clock.now_millis();
        if now < state.last_ms {
            return Err(IdError::ClockMovedBackwards {
                last_ms: state.last_ms,
                now_ms: now,
            });
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = self.clock.now_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        Ok(((now - EPOCH_MILLIS) << TIME_SHIFT) | (self.node << NODE_SHIFT) | state.sequence)
    }
}

/// Split an id into `(unix_millis, node, sequence)`.
pub fn decompose(id: i64) -> (i64, i64, i64) {
    (
        (id >> TIME_SHIFT) + EPOCH_MILLIS,
        (id >> NODE_SHIFT) & MAX_NODE_ID,
        id & MAX_SEQUENCE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that returns a fixed value until moved.
    #[derive(Clone)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn new(ms: i64) -> Self {
            Self(Arc::new(AtomicI64::new(ms)))
        }

        fn set(&self, ms: i64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Clock that advances by one millisecond every `step` reads.
    struct SteppingClock {
        reads: AtomicI64,
        base: i64,
        step: i64,
    }

    impl Clock for SteppingClock {
        fn now_millis(&self) -> i64 {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            self.base + n / self.step
        }
    }

    #[test]
    fn test_invalid_node_rejected() {
        assert_eq!(IdGenerator::new(-1).unwrap_err(), IdError::InvalidNode(-1));
        assert_eq!(
            IdGenerator::new(MAX_NODE_ID + 1).unwrap_err(),
            IdError::InvalidNode(MAX_NODE_ID + 1)
        );
        assert!(IdGenerator::new(0).is_ok());
        assert!(IdGenerator::new(MAX_NODE_ID).is_ok());
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let generator = IdGenerator::new(1).unwrap();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.generate().unwrap();
            assert!(id > last, "{id} should be greater than {last}");
            last = id;
        }
    }

    #[test]
    fn test_layout_roundtrip() {
        let clock = ManualClock::new(1_588_842_127_114);
        let generator = IdGenerator::with_clock(42, clock).unwrap();

        let first = generator.generate().unwrap();
        let second = generator.generate().unwrap();

        assert_eq!(decompose(first), (1_588_842_127_114, 42, 0));
        assert_eq!(decompose(second), (1_588_842_127_114, 42, 1));
        assert!(first > 0);
    }

    #[test]
    fn test_sequence_overflow_waits_for_next_millisecond() {
        // Each millisecond survives 10_000 reads, so the sequence wraps first.
        let clock = SteppingClock {
            reads: AtomicI64::new(0),
            base: 1_600_000_000_000,
            step: 10_000,
        };
        let generator = IdGenerator::with_clock(3, clock).unwrap();

        let ids: Vec<i64> = (0..=MAX_SEQUENCE + 1)
            .map(|_| generator.generate().unwrap())
            .collect();

        let (ms_first, _, _) = decompose(ids[0]);
        let (ms_last, _, seq_last) = decompose(*ids.last().unwrap());
        assert!(ms_last > ms_first);
        assert_eq!(seq_last, 0);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_clock_regression_fails_fast() {
        let clock = ManualClock::new(1_600_000_000_500);
        let generator = IdGenerator::with_clock(1, clock.clone()).unwrap();
        generator.generate().unwrap();

        clock.set(1_600_000_000_499);
        let err = generator.generate().unwrap_err();
        assert_eq!(
            err,
            IdError::ClockMovedBackwards {
                last_ms: 1_600_000_000_500,
                now_ms: 1_600_000_000_499,
            }
        );
    }

    #[test]
    fn test_concurrent_ids_unique() {
        let generator = Arc::new(IdGenerator::new(7).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..5_000)
                        .map(|_| generator.generate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 40_000);
    }
}
