use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a session, shared between the driver and every handle.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Total message bytes sent, excluding framing
    bytes_tx: AtomicUsize,
    /// Total message bytes received, excluding framing
    bytes_rx: AtomicUsize,
    /// The cumulative average round-trip time in microseconds.
    rtt: AtomicUsize,
    /// Index used to calculate rtt
    rtt_idx: AtomicUsize,
    notifications: AtomicUsize,
    notifications_dropped: AtomicUsize,
}

impl SessionStats {
    #[inline]
    /// Atomically updates the RTT according to the CA formula:
    /// CA = (rtt + n * prev_ca) / (n + 1)
    pub(crate) fn update_rtt(&self, rtt_us: usize) {
        let idx = self.rtt_idx.fetch_add(1, Ordering::Relaxed);
        let prev = self.rtt.load(Ordering::Relaxed);

        // Widened so `n * prev_ca` cannot overflow. The average never exceeds
        // the largest sample, so it narrows back losslessly.
        let new = (rtt_us as u128 + idx as u128 * prev as u128) / (idx as u128 + 1);
        self.rtt.store(new as usize, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_tx(&self, bytes: usize) {
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rx(&self, bytes: usize) {
        self.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_notifications(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn rtt(&self) -> usize {
        self.rtt.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_tx(&self) -> usize {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_rx(&self) -> usize {
        self.bytes_rx.load(Ordering::Relaxed)
    }

    /// Notifications received, including dropped ones.
    #[inline]
    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Notifications dropped because the notification stream was full or gone.
    #[inline]
    pub fn notifications_dropped(&self) -> usize {
        self.notifications_dropped.load(Ordering::Relaxed)
    }
}
