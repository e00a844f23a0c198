//! Latest-wins debounce
//!
//! Each call takes a generation number. A call that is still the newest
//! after the quiet period proceeds; older calls learn they were superseded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Generation taken by one debounced call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTicket(u64);

#[derive(Debug)]
pub struct Debouncer {
    quiet_period: Duration,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            generation: AtomicU64::new(0),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Wait out the quiet period. True if no newer call arrived meanwhile.
    pub async fn settle(&self) -> bool {
        let ticket = self.next();
        tokio::time::sleep(self.quiet_period).await;
        self.is_latest(ticket)
    }

    /// Supersede any pending call and proceed immediately
    pub fn flush(&self) -> DebounceTicket {
        self.next()
    }

    pub fn is_latest(&self, ticket: DebounceTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }

    fn next(&self) -> DebounceTicket {
        DebounceTicket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
