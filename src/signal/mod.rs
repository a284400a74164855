//! Cancellation on SIGINT
//!
//! First interrupt requests a clean stop: the pipeline checks the flag
//! between stages and between targets, so container teardown guards still
//! run. A second interrupt exits immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Action for a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: request cancellation at the next checkpoint
    RequestCancel,
    /// Second signal: exit now
    ImmediateExit,
    /// Third and later signals
    Ignore,
}

/// Shared cancellation flag
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    signal_count: AtomicU8,
}

impl CancelFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether a clean stop has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record one received signal and return the action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            self.cancelled.store(true, Ordering::SeqCst);
            SignalAction::RequestCancel
        } else if count == 1 {
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }
}

/// Install the SIGINT handler for a flag
pub fn install(flag: &Arc<CancelFlag>) -> Result<(), ctrlc::Error> {
    let flag = Arc::clone(flag);
    ctrlc::set_handler(move || match flag.handle_signal() {
        SignalAction::RequestCancel => {
            eprintln!("interrupt: stopping after the current step (interrupt again to exit now)");
        }
        SignalAction::ImmediateExit => std::process::exit(EXIT_CODE_CANCELLED),
        SignalAction::Ignore => {}
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signal_requests_cancel() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());

        assert_eq!(flag.handle_signal(), SignalAction::RequestCancel);
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_second_signal_exits_immediately() {
        let flag = CancelFlag::new();
        flag.handle_signal();
        assert_eq!(flag.handle_signal(), SignalAction::ImmediateExit);
        assert_eq!(flag.handle_signal(), SignalAction::Ignore);
    }
}
