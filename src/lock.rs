//! Lease-based mutual exclusion for the retrieval session.

use std::time::Duration;
use tokio::time::Instant;

/// Default lease after which a held lock is considered stale.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

/// Guards the single session a controller may have open.
///
/// A held lock whose lease has expired can be taken over by the next
/// [`acquire`](Self::acquire), so a run that never released it cannot wedge the
/// controller.
#[derive(Debug)]
pub struct SessionLock {
    lease: Duration,
    held: bool,
    acquired_at: Option<Instant>,
    generation: u64,
}

impl SessionLock {
    /// Creates a free lock with the given lease.
    #[must_use]
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            held: false,
            acquired_at: None,
            generation: 0,
        }
    }

    /// Takes the lock if it is free or stale.
    ///
    /// Returns `false` without touching any state while another holder's lease
    /// is still running.
    pub fn acquire(&mut self) -> bool {
        let now = Instant::now();

        if self.is_busy_at(now) {
            return false;
        }

        if self.held {
            tracing::warn!(
                generation = self.generation,
                lease_secs = self.lease.as_secs(),
                "Reclaiming stale session lock"
            );
        }

        self.held = true;
        self.acquired_at = Some(now);
        self.generation += 1;
        true
    }

    /// Clears the lock unconditionally.
    pub fn release(&mut self) {
        self.held = false;
    }

    /// Clears the lock only if it is still held by `generation`.
    ///
    /// Returns `true` if the lock was released.
    pub fn release_if_current(&mut self, generation: u64) -> bool {
        if self.held && self.generation == generation {
            self.held = false;
            true
        } else {
            false
        }
    }

    /// Returns `true` if held and not stale.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.is_busy_at(Instant::now())
    }

    /// Counter bumped by every successful acquire.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The configured lease.
    #[must_use]
    pub fn lease(&self) -> Duration {
        self.lease
    }

    fn is_busy_at(&self, now: Instant) -> bool {
        match (self.held, self.acquired_at) {
            (true, Some(at)) => now.saturating_duration_since(at) < self.lease,
            _ => false,
        }
    }
}

impl Default for SessionLock {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE)
    }
}
