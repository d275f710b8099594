// Identity and clock provider
// Supplies the local participant id, message ids, and logical timestamps for
// newly composed messages.

use std::sync::atomic::{AtomicI64, Ordering};

use uuid::Uuid;

/// Logical clock for message timestamps. Returns wall-clock milliseconds but
/// never the same value twice, so rapid sends from this sender stay strictly
/// ordered regardless of timer resolution.
pub struct LogicalClock {
    last_issued: AtomicI64,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self {
            last_issued: AtomicI64::new(0),
        }
    }

    /// Issue the next timestamp: max(wall clock, last + 1).
    pub fn now(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_issued.load(Ordering::Relaxed);
        loop {
            let candidate = wall.max(last + 1);
            match self.last_issued.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Local participant identity plus the clock used to stamp outgoing messages.
pub struct Identity {
    participant_id: String,
    clock: LogicalClock,
}

impl Identity {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            clock: LogicalClock::new(),
        }
    }

    /// Identity with a random participant id, for callers that have no
    /// account concept yet.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Globally unique id for a new message. UUID v4 collisions are treated
    /// as an internal invariant violation downstream, not a recoverable error.
    pub fn next_message_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn timestamp(&self) -> i64 {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_strictly_monotonic() {
        let clock = LogicalClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous, "clock went backwards: {} -> {}", previous, next);
            previous = next;
        }
    }

    #[test]
    fn clock_is_monotonic_across_threads() {
        use std::sync::Arc;

        let clock = Arc::new(LogicalClock::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| clock.now()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "duplicate timestamps issued");
    }

    #[test]
    fn message_ids_are_unique() {
        let identity = Identity::generate();
        let a = identity.next_message_id();
        let b = identity.next_message_id();
        assert_ne!(a, b);
    }
}
