// Reconnect debouncing - collapses bursts of parameter changes
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(50);

/// Identifies one scheduled action. Only the most recent ticket can be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Defers an action until a quiet period passes without another `schedule`.
///
/// Each `schedule` aborts the previous timer, so only the last call of a burst
/// fires. The timer task hands its [`Ticket`] to the action; owners that route
/// the action through a queue call [`ReconnectDebouncer::claim`] before acting,
/// which makes `cancel` win even over a timer that already expired.
#[derive(Debug)]
pub struct ReconnectDebouncer {
    quiet: Duration,
    generation: u64,
    pending: Option<(Ticket, JoinHandle<()>)>,
}

impl ReconnectDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            generation: 0,
            pending: None,
        }
    }

    pub fn schedule<F>(&mut self, action: F) -> Ticket
    where
        F: FnOnce(Ticket) + Send + 'static,
    {
        if let Some((_, timer)) = self.pending.take() {
            timer.abort();
        }

        self.generation += 1;
        let ticket = Ticket(self.generation);
        let quiet = self.quiet;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(quiet).await;
            action(ticket);
        });
        self.pending = Some((ticket, timer));
        ticket
    }

    /// Accepts `ticket` if it belongs to the pending timer, clearing it.
    pub fn claim(&mut self, ticket: Ticket) -> bool {
        let current = matches!(&self.pending, Some((pending, _)) if *pending == ticket);
        if current {
            self.pending = None;
        }
        current
    }

    pub fn cancel(&mut self) {
        if let Some((_, timer)) = self.pending.take() {
            timer.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for ReconnectDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
