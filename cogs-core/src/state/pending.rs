//! Correlation of in-flight commands with their replies.
//!
//! Each sent command registers a continuation under its sequence number.
//! A reply carrying that number resolves the entry exactly once; entries
//! that outlive the maximum request age are swept and failed with
//! `RequestTimeout`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::dialect::Response;
use crate::error::CogsError;

/// Outcome delivered to a waiting caller.
pub type Outcome = Result<Response, CogsError>;

// ── Continuation ─────────────────────────────────────────────────

/// Something waiting for the outcome of one request.
pub trait Continuation {
    /// Deliver the outcome. Called at most once per registered entry.
    fn complete(self, outcome: Outcome);
}

impl Continuation for oneshot::Sender<Outcome> {
    fn complete(self, outcome: Outcome) {
        // The caller may have dropped its `Reply`; that is not an error.
        let _ = self.send(outcome);
    }
}

// ── PendingRequest ───────────────────────────────────────────────

/// A request awaiting its reply.
#[derive(Debug)]
pub struct PendingRequest<C> {
    pub sequence: u64,
    pub issued_at: Instant,
    pub continuation: C,
}

impl<C> PendingRequest<C> {
    /// How long this request has been in flight.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }
}

// ── CorrelationTable ─────────────────────────────────────────────

/// Outstanding requests keyed by sequence number, with a fixed capacity.
#[derive(Debug)]
pub struct CorrelationTable<C> {
    entries: HashMap<u64, PendingRequest<C>>,
    capacity: usize,
}

impl<C: Continuation> CorrelationTable<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Maximum number of outstanding entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if a specific request is pending.
    pub fn contains(&self, sequence: u64) -> bool {
        self.entries.contains_key(&sequence)
    }

    /// Track a continuation for `sequence`.
    ///
    /// At capacity the continuation is returned alongside `TableFull` so
    /// the caller can fail it immediately.
    pub fn register(&mut self, sequence: u64, continuation: C) -> Result<(), (CogsError, C)> {
        if self.entries.len() >= self.capacity {
            return Err((
                CogsError::TableFull {
                    capacity: self.capacity,
                },
                continuation,
            ));
        }
        if self.entries.contains_key(&sequence) {
            return Err((
                CogsError::ProtocolViolation("sequence number already in flight"),
                continuation,
            ));
        }
        self.entries.insert(
            sequence,
            PendingRequest {
                sequence,
                issued_at: Instant::now(),
                continuation,
            },
        );
        Ok(())
    }

    /// Complete the entry for `sequence` with `outcome`.
    ///
    /// Returns `false` if nothing was waiting on that sequence; the
    /// outcome is then dropped and the caller should treat the frame as
    /// unsolicited.
    pub fn resolve(&mut self, sequence: u64, outcome: Outcome) -> bool {
        match self.entries.remove(&sequence) {
            Some(entry) => {
                entry.continuation.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every entry older than `max_age` with `RequestTimeout`.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&mut self, max_age: Duration) -> usize {
        self.sweep_at(Instant::now(), max_age)
    }

    /// Like [`sweep`](Self::sweep), measured against an explicit `now`.
    pub fn sweep_at(&mut self, now: Instant, max_age: Duration) -> usize {
        let expired: Vec<u64> = self
            .entries
            .values()
            .filter(|req| req.age(now) >= max_age)
            .map(|req| req.sequence)
            .collect();

        for seq in &expired {
            if let Some(entry) = self.entries.remove(seq) {
                let after = entry.age(now);
                entry
                    .continuation
                    .complete(Err(CogsError::RequestTimeout { seq: *seq, after }));
            }
        }
        expired.len()
    }

    /// Fail every outstanding entry with the error built by `err`.
    ///
    /// Returns the number of failed entries.
    pub fn fail_all(&mut self, err: impl Fn() -> CogsError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.continuation.complete(Err(err()));
        }
        count
    }
}

// ── Tests ────────────────────────────────────────────────────────
