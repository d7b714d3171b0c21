use crossbeam_utils::Backoff;

use crate::Core::timing;

/// How a side of the ring waits while polling the other side's cursor.
///
/// Both policies stay in user space; neither blocks in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Fixed-interval cycle-counter spin between polls.
    Spin { poll_ns: u64 },
    /// Exponential spin that degrades to yielding the thread.
    Backoff,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Spin { poll_ns: 100 }
    }
}

/// Per-call wait state. Created fresh for every wait so backoff restarts.
pub(crate) struct Waiter {
    policy: WaitPolicy,
    backoff: Backoff,
}

impl Waiter {
    #[inline]
    pub(crate) fn new(policy: WaitPolicy) -> Self {
        Self {
            policy,
            backoff: Backoff::new(),
        }
    }

    #[inline]
    pub(crate) fn pause(&self) {
        match self.policy {
            WaitPolicy::Spin { poll_ns } => timing::ndelay(poll_ns),
            WaitPolicy::Backoff => self.backoff.snooze(),
        }
    }
}
