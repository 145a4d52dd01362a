use qcn_common::Ticks;

/// A one-shot wake-up deadline for a throttled shaper.
///
/// Arming it again replaces the previous deadline. Whoever drives the shaper waits until the
/// deadline and dequeues again.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Watchdog {
    deadline: Option<Ticks>,
    armed: u64,
}

impl Watchdog {
    /// Arms the watchdog for `at`, replacing any earlier deadline.
    pub fn schedule(&mut self, at: Ticks) {
        self.deadline = Some(at);
        self.armed += 1;
    }

    /// Disarms the watchdog.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// The pending deadline, if armed.
    pub fn deadline(&self) -> Option<Ticks> {
        self.deadline
    }

    /// How many times the watchdog was armed.
    pub fn times_armed(&self) -> u64 {
        self.armed
    }
}
