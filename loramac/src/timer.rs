//! One-shot timer service. Implementations arm hardware or OS timers and
//! post [`Event::Timer`](crate::event::Event::Timer) into the queue when a
//! deadline passes.

/// The five timers the MAC schedules. Each is one-shot; re-arming an
/// already-running timer restarts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TimerId {
    RxWindow1,
    RxWindow2,
    AckTimeout,
    TxDelayed,
    StateCheck,
}

/// Provider of one-shot timers and a millisecond clock.
///
/// A timer that fires after it was cancelled is harmless: every MAC timer
/// handler re-checks the state bit that owns it and ignores stale events.
pub trait TimerHandle {
    /// Arms `id` to post its event `delay_ms` from now.
    fn start(&mut self, id: TimerId, delay_ms: u32);

    /// Cancels `id` if it is pending.
    fn stop(&mut self, id: TimerId);

    /// Monotonic milliseconds since an arbitrary epoch. Wraps after ~49
    /// days, like the rest of the stack's timestamps.
    fn now_ms(&mut self) -> u32;
}
