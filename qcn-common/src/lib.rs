mod clock;
pub use clock::*;

/// Scheduler ticks are nanoseconds.
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Computes the time in ticks needed to transmit `size` bytes at `rate` bytes per second.
///
/// A zero rate never transmits, so the result saturates to [`Ticks::MAX`].
#[inline]
pub const fn xmit_ticks(rate: u64, size: u64) -> Ticks {
    if rate == 0 {
        return Ticks::MAX;
    }

    let ticks = size as u128 * NSEC_PER_SEC as u128 / rate as u128;
    if ticks > Ticks::MAX as u128 {
        Ticks::MAX
    } else {
        ticks as Ticks
    }
}

/// Link constants.
pub mod constants {
    /// Standard Ethernet MTU in bytes.
    pub const MTU_ETHERNET: u32 = 1_500;
}
