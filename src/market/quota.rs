//! Request-credit budgeting for the odds provider.
//!
//! the-odds-api bills per request in credits (an odds fetch costs more than
//! a scores fetch), with a hard monthly cap. The governor slices that cap
//! into fixed windows and admits or refuses each fetch up front, so a busy
//! hour cannot burn the whole month's allowance.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

/// Fixed-window credit budget. Cheap to share behind an `Arc`; callers
/// admit a fetch with [`try_admit`](QuotaGovernor::try_admit) before
/// touching the network.
#[derive(Debug)]
pub struct QuotaGovernor {
    budget: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl QuotaGovernor {
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget,
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Try to reserve `cost` credits in the current window. Returns `false`
    /// without consuming anything if the window's remaining budget is short.
    /// Credits are consumed at admission, not on completion, so a failed
    /// fetch still counts against the window (the provider billed it too).
    pub fn try_admit(&self, cost: u32) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.roll_window(&mut state);

        if state.used + cost > self.budget {
            debug!(
                cost,
                used = state.used,
                budget = self.budget,
                "Quota denied, refusing fetch"
            );
            return false;
        }
        state.used += cost;
        true
    }

    /// Credits still available in the current window.
    pub fn remaining(&self) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.roll_window(&mut state);
        self.budget.saturating_sub(state.used)
    }

    fn roll_window(&self, state: &mut Window) {
        if state.started.elapsed() >= self.window {
            state.started = Instant::now();
            state.used = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_within_budget() {
        let gov = QuotaGovernor::new(10, Duration::from_secs(60));
        assert!(gov.try_admit(3));
        assert!(gov.try_admit(3));
        assert!(gov.try_admit(4));
        assert_eq!(gov.remaining(), 0);
    }

    #[test]
    fn test_denies_over_budget_without_consuming() {
        let gov = QuotaGovernor::new(5, Duration::from_secs(60));
        assert!(gov.try_admit(3));
        assert!(!gov.try_admit(3));
        // The denied request consumed nothing.
        assert_eq!(gov.remaining(), 2);
        assert!(gov.try_admit(2));
    }

    #[test]
    fn test_cost_larger_than_budget_always_denied() {
        let gov = QuotaGovernor::new(2, Duration::from_secs(60));
        assert!(!gov.try_admit(3));
        assert_eq!(gov.remaining(), 2);
    }

    #[test]
    fn test_window_rollover_resets_usage() {
        let gov = QuotaGovernor::new(3, Duration::from_millis(10));
        assert!(gov.try_admit(3));
        assert!(!gov.try_admit(1));

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(gov.remaining(), 3);
        assert!(gov.try_admit(3));
    }

    #[test]
    fn test_zero_cost_always_admitted() {
        let gov = QuotaGovernor::new(0, Duration::from_secs(60));
        assert!(gov.try_admit(0));
        assert!(!gov.try_admit(1));
    }
}
