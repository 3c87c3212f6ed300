/*!
 * Progress cadence for streamed transfers
 *
 * Consumers receive roughly one hundred updates per transfer regardless of
 * its size, plus exactly one update carrying the final byte count.
 */

/// Number of progress updates aimed for per transfer
pub const UPDATES_PER_TRANSFER: u64 = 100;

/// Callback invoked with `(bytes_read, content_length)`
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

/// Callback interval for a transfer of `content_length` bytes (never 0)
pub fn progress_interval(content_length: u64) -> u64 {
    (content_length / UPDATES_PER_TRANSFER).max(1)
}

/// Decides when a cumulative byte counter should trigger a callback
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: u64,
    total: u64,
    last_reported: u64,
}

impl ProgressThrottle {
    pub fn new(interval: u64, total: u64) -> Self {
        Self {
            interval: interval.max(1),
            total,
            last_reported: 0,
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Bytes that may be consumed before the next report boundary
    pub fn until_next(&self, bytes_read: u64) -> u64 {
        (self.last_reported + self.interval)
            .min(self.total)
            .saturating_sub(bytes_read)
    }

    /// Record `bytes_read`; true when a callback is due
    pub fn observe(&mut self, bytes_read: u64) -> bool {
        if bytes_read > self.last_reported
            && (bytes_read - self.last_reported >= self.interval || bytes_read == self.total)
        {
            self.last_reported = bytes_read;
            true
        } else {
            false
        }
    }
}
