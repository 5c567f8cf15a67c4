use std::sync::atomic::{AtomicU64, Ordering};

/// Remaining headroom under a byte ceiling.
///
/// Reservations withdraw from the headroom and releases deposit back into it. The value
/// never goes negative: a withdrawal that does not fit leaves the counter untouched and
/// reports the headroom it observed.
pub struct Headroom(AtomicU64);

impl Headroom {
    pub fn new(amount: u64) -> Headroom {
        Headroom(AtomicU64::new(amount))
    }

    /// Attempts to withdraw `amount` bytes.
    ///
    /// Returns `Err(observed)` with the headroom seen by the last attempt if the
    /// withdrawal does not fit.
    pub fn withdraw(&self, amount: u64) -> Result<(), u64> {
        let mut current = self.0.load(Ordering::Relaxed);
        while current >= amount {
            match self.0.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(updated) => current = updated,
            }
        }
        Err(current)
    }

    /// Returns `amount` bytes to the headroom.
    pub fn deposit(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Release);
    }

    /// Current headroom (most likely stale by the time it is observed by the caller).
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A monotonically increasing statistic.
#[derive(Default)]
pub struct Tally(AtomicU64);

impl Tally {
    #[inline]
    pub fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    #[inline]
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
