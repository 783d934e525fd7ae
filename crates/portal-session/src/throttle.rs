use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Rate limiter for content flushes within one turn.
///
/// Only decides *when* to flush. The caller keeps the accumulated reply
/// and reads it when a flush is due. The first offer goes out at once. Later offers are
/// coalesced and released when [`deadline`](Self::deadline) passes; the
/// caller owns the timer and calls [`flush_due`](Self::flush_due). There is
/// at most one deadline at any time.
#[derive(Debug)]
pub struct StreamThrottle {
    interval: Duration,
    last_flush: Option<Instant>,
    pending: bool,
    deadline: Option<Instant>,
}

impl StreamThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: None,
            pending: false,
            deadline: None,
        }
    }

    /// Note new content. Returns `true` when it should be flushed now.
    pub fn offer(&mut self) -> bool {
        let now = Instant::now();
        match self.last_flush {
            Some(last) if now.duration_since(last) < self.interval => {
                self.deadline = Some(last + self.interval);
                self.pending = true;
                false
            }
            _ => {
                self.release(now);
                true
            }
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the coalesced update is due. Clears it when it is.
    pub fn flush_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now && self.pending => {
                self.release(now);
                true
            }
            _ => false,
        }
    }

    /// Unthrottled drain for the end of a turn. Returns whether anything
    /// was pending.
    pub fn finish(&mut self) -> bool {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }

    /// Drop anything pending without releasing it.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending = false;
    }

    pub fn has_pending(&self) -> bool {
        self.pending
    }

    fn release(&mut self, now: Instant) {
        self.deadline = None;
        self.pending = false;
        self.last_flush = Some(now);
    }
}

impl Default for StreamThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_INTERVAL)
    }
}
