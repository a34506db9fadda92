//! Snowflake-style 64-bit id allocation.
//!
//! Layout, most significant bit first:
//! - 1 bit unused (ids are always positive)
//! - 41 bits milliseconds since [`EPOCH_MILLIS`]
//! - 10 bits worker id
//! - 12 bits per-millisecond sequence
//!
//! One generator is built at startup with the deployment's worker id and shared
//! by reference. Ids from a single worker are unique and increase with time.

use crate::error::{Result, SettlementError};
use crate::services::clock::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// 2024-01-01T00:00:00Z in Unix milliseconds.
pub const EPOCH_MILLIS: i64 = 1_704_067_200_000;

pub const WORKER_ID_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;
pub const MAX_WORKER_ID: u16 = (1 << WORKER_ID_BITS) - 1;
pub const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;

/// Decomposed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdParts {
    /// Unix ms the id was allocated in
    pub timestamp_millis: i64,
    pub worker_id: u16,
    pub sequence: u16,
}

struct IdState {
    last_timestamp: i64,
    sequence: u16,
}

/// Thread-safe snowflake allocator.
pub struct IdGenerator {
    worker_id: u16,
    clock: Arc<dyn Clock>,
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Create a generator on the system clock.
    pub fn new(worker_id: u16) -> Result<Self> {
        Self::with_clock(worker_id, Arc::new(SystemClock))
    }

    /// Create a generator on a custom clock.
    pub fn with_clock(worker_id: u16, clock: Arc<dyn Clock>) -> Result<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(SettlementError::InvalidWorkerId(worker_id));
        }
        Ok(Self {
            worker_id,
            clock,
            state: Mutex::new(IdState {
                last_timestamp: -1,
                sequence: 0,
            }),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Allocate the next id.
    ///
    /// Fails with `ClockMovedBackward` if the clock reads earlier than the last
    /// allocation; the generator keeps its state and recovers once the clock
    /// catches up.
    pub fn next_id(&self) -> Result<i64> {
        // State is two integers updated together; a panic elsewhere cannot leave it torn.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut now = self.clock.now_millis();
        if now < state.last_timestamp || now < EPOCH_MILLIS {
            let last = state.last_timestamp.max(EPOCH_MILLIS);
            warn!("Clock moved backward: last {} ms, now {} ms", last, now);
            return Err(SettlementError::ClockMovedBackward { last, now });
        }

        let sequence = if now == state.last_timestamp {
            let next = (state.sequence + 1) & MAX_SEQUENCE;
            if next == 0 {
                now = self.wait_next_millis(state.last_timestamp)?;
            }
            next
        } else {
            0
        };

        state.last_timestamp = now;
        state.sequence = sequence;
        Ok(compose(now, self.worker_id, sequence))
    }

    /// Spin until the clock passes `last`. Gives up if the clock falls behind
    /// `last` while waiting.
    fn wait_next_millis(&self, last: i64) -> Result<i64> {
        loop {
            let now = self.clock.now_millis();
            if now > last {
                return Ok(now);
            }
            if now < last {
                warn!("Clock moved backward while waiting: last {} ms, now {} ms", last, now);
                return Err(SettlementError::ClockMovedBackward { last, now });
            }
            std::hint::spin_loop();
        }
    }
}

fn compose(timestamp_millis: i64, worker_id: u16, sequence: u16) -> i64 {
    ((timestamp_millis - EPOCH_MILLIS) << TIMESTAMP_SHIFT)
        | (i64::from(worker_id) << WORKER_SHIFT)
        | i64::from(sequence)
}

/// Split an id back into its timestamp, worker id and sequence.
pub fn parse_id(id: i64) -> IdParts {
    IdParts {
        timestamp_millis: (id >> TIMESTAMP_SHIFT) + EPOCH_MILLIS,
        worker_id: ((id >> WORKER_SHIFT) & i64::from(MAX_WORKER_ID)) as u16,
        sequence: (id & i64::from(MAX_SEQUENCE)) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    const T0: i64 = EPOCH_MILLIS + 86_400_000;

    /// Returns `start` for the first `stall` reads, then whatever `then` holds.
    struct StallingClock {
        start: i64,
        stall: u64,
        then: AtomicI64,
        reads: AtomicU64,
    }

    impl StallingClock {
        fn new(start: i64, stall: u64, then: i64) -> Self {
            Self {
                start,
                stall,
                then: AtomicI64::new(then),
                reads: AtomicU64::new(0),
            }
        }
    }

    impl Clock for StallingClock {
        fn now_millis(&self) -> i64 {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.stall {
                self.start
            } else {
                self.then.load(Ordering::SeqCst)
            }
        }
    }

    #[test]
    fn test_rejects_worker_id_out_of_range() {
        assert!(matches!(
            IdGenerator::new(1024),
            Err(SettlementError::InvalidWorkerId(1024))
        ));
        assert!(IdGenerator::new(MAX_WORKER_ID).is_ok());
    }

    #[test]
    fn test_parse_round_trip() {
        let clock = Arc::new(ManualClock::new(T0));
        let ids = IdGenerator::with_clock(513, clock.clone()).unwrap();

        let first = ids.next_id().unwrap();
        let second = ids.next_id().unwrap();

        let parts = parse_id(second);
        assert_eq!(parts.timestamp_millis, T0);
        assert_eq!(parts.worker_id, 513);
        assert_eq!(parts.sequence, 1);
        assert_eq!(parse_id(first).sequence, 0);
        assert!(second > first);
    }

    #[test]
    fn test_sequence_resets_on_new_millisecond() {
        let clock = Arc::new(ManualClock::new(T0));
        let ids = IdGenerator::with_clock(1, clock.clone()).unwrap();

        ids.next_id().unwrap();
        ids.next_id().unwrap();
        clock.advance(1);
        let id = ids.next_id().unwrap();

        let parts = parse_id(id);
        assert_eq!(parts.timestamp_millis, T0 + 1);
        assert_eq!(parts.sequence, 0);
    }

    #[test]
    fn test_sequence_exhaustion_waits_for_next_millisecond() {
        let per_ms = u64::from(MAX_SEQUENCE) + 1;
        let clock = Arc::new(StallingClock::new(T0, per_ms + 1, T0 + 1));
        let ids = IdGenerator::with_clock(7, clock).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..per_ms {
            let id = ids.next_id().unwrap();
            assert_eq!(parse_id(id).timestamp_millis, T0);
            assert!(seen.insert(id));
        }

        let rolled = ids.next_id().unwrap();
        let parts = parse_id(rolled);
        assert_eq!(parts.timestamp_millis, T0 + 1);
        assert_eq!(parts.sequence, 0);
        assert!(seen.insert(rolled));
    }

    #[test]
    fn test_clock_moved_backward() {
        let clock = Arc::new(ManualClock::new(T0));
        let ids = IdGenerator::with_clock(3, clock.clone()).unwrap();

        let before = ids.next_id().unwrap();
        clock.set(T0 - 5);

        match ids.next_id() {
            Err(SettlementError::ClockMovedBackward { last, now }) => {
                assert_eq!(last, T0);
                assert_eq!(now, T0 - 5);
            }
            other => panic!("expected ClockMovedBackward, got {:?}", other),
        }

        // Recovers once the clock catches up
        clock.set(T0 + 1);
        let after = ids.next_id().unwrap();
        assert!(after > before);
    }

    #[test]
    fn test_clock_before_epoch_is_rejected() {
        let clock = Arc::new(ManualClock::new(EPOCH_MILLIS - 1));
        let ids = IdGenerator::with_clock(0, clock).unwrap();
        assert!(matches!(
            ids.next_id(),
            Err(SettlementError::ClockMovedBackward { .. })
        ));
    }

    #[test]
    fn test_clock_moves_backward_during_exhaustion_wait() {
        let per_ms = u64::from(MAX_SEQUENCE) + 1;
        // One read per id, then the read that wraps the sequence; the wait sees T0 - 5
        let clock = Arc::new(StallingClock::new(T0, per_ms + 1, T0 - 5));
        let ids = IdGenerator::with_clock(4, clock.clone()).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..per_ms {
            assert!(seen.insert(ids.next_id().unwrap()));
        }

        match ids.next_id() {
            Err(SettlementError::ClockMovedBackward { last, now }) => {
                assert_eq!(last, T0);
                assert_eq!(now, T0 - 5);
            }
            other => panic!("expected ClockMovedBackward, got {:?}", other),
        }

        // A failed wait leaves the exhausted sequence in place
        clock.then.store(T0 + 1, Ordering::SeqCst);
        let next = ids.next_id().unwrap();
        assert_eq!(parse_id(next).timestamp_millis, T0 + 1);
        assert_eq!(parse_id(next).sequence, 0);
        assert!(seen.insert(next));
    }
}
