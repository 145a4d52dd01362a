//! Length to transmission time lookup tables.

use qcn_common::{xmit_ticks, Ticks};

/// Number of slots in a [`RateTable`].
pub const RTAB_SIZE: usize = 256;

/// A rate and the cell layout of its lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    /// Rate in bytes per second.
    pub rate: u64,
    /// Log2 of the table cell size in bytes.
    pub cell_log: u8,
    /// Link layer overhead added to every packet, in bytes.
    pub overhead: u16,
    /// Added to the length before it is divided into cells (typically -1).
    pub cell_align: i16,
    /// Minimum packet unit: no packet is charged less than this.
    pub mpu: u16,
}

impl RateSpec {
    /// Creates a rate spec for `rate` bytes per second whose table covers packets up to `mtu`
    /// bytes without wrapping.
    pub fn new(rate: u64, mtu: u32) -> Self {
        Self { rate, cell_log: Self::compute_cell_log(mtu), overhead: 0, cell_align: -1, mpu: 0 }
    }

    /// Returns the smallest cell log such that `mtu >> cell_log` fits in a table slot.
    ///
    /// For Ethernet (MTU 1500) this is 3 because `1500 >> 3 = 187 < 256`.
    pub fn compute_cell_log(mtu: u32) -> u8 {
        let mut cell_log = 0u8;
        while (mtu >> cell_log) > 255 {
            cell_log += 1;
        }
        cell_log
    }

    /// Adds a fixed per-packet overhead in bytes, charged before the table lookup.
    pub fn with_overhead(mut self, overhead: u16) -> Self {
        self.overhead = overhead;
        self
    }

    /// Sets the minimum packet unit: shorter packets are charged as this many bytes.
    pub fn with_mpu(mut self, mpu: u16) -> Self {
        self.mpu = mpu;
        self
    }
}

/// Maps a packet length to the ticks needed to send it at a fixed rate.
///
/// Slot `i` holds the transmission time of `(i + 1) << cell_log` bytes (at least `mpu`).
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    spec: RateSpec,
    data: Box<[Ticks; RTAB_SIZE]>,
}

impl RateTable {
    /// Builds the 256-slot table for `spec`.
    pub fn new(spec: RateSpec) -> Self {
        let mut data = Box::new([0; RTAB_SIZE]);
        for (i, slot) in data.iter_mut().enumerate() {
            let size = ((i as u64 + 1) << spec.cell_log).max(spec.mpu as u64);
            *slot = xmit_ticks(spec.rate, size);
        }

        Self { spec, data }
    }

    pub fn spec(&self) -> &RateSpec {
        &self.spec
    }

    /// The rate in bytes per second.
    pub fn rate(&self) -> u64 {
        self.spec.rate
    }

    /// Raw slot values.
    pub fn data(&self) -> &[Ticks; RTAB_SIZE] {
        &self.data
    }

    /// Length to time: the ticks needed to send a packet of `len` bytes.
    ///
    /// Lengths past the last slot are charged as multiples of the last slot plus the remainder.
    #[inline]
    pub fn l2t(&self, len: u32) -> Ticks {
        let slot = (len as i64 + self.spec.cell_align as i64 + self.spec.overhead as i64).max(0);
        let slot = (slot >> self.spec.cell_log) as usize;

        if slot >= RTAB_SIZE {
            self.data[RTAB_SIZE - 1]
                .saturating_mul((slot >> 8) as Ticks)
                .saturating_add(self.data[slot & 0xFF])
        } else {
            self.data[slot]
        }
    }

    /// Largest packet size whose transmission time fits in a bucket of `depth` ticks.
    ///
    /// Negative when not even the smallest cell fits, i.e. no packet can ever be sent.
    pub fn max_size(&self, depth: Ticks) -> i64 {
        let n = self.data.iter().position(|&t| t > depth).unwrap_or(RTAB_SIZE);
        ((n as i64) << self.spec.cell_log) - 1
    }
}

#[cfg(test)]
mod tests {
    use qcn_common::constants::MTU_ETHERNET;

    use super::*;

    #[test]
    fn cell_log_fits_mtu() {
        assert_eq!(RateSpec::compute_cell_log(MTU_ETHERNET), 3);
        assert_eq!(RateSpec::compute_cell_log(255), 0);
        assert_eq!(RateSpec::compute_cell_log(9000), 6);
    }

    #[test]
    fn l2t_matches_rate() {
        // 1 MB/s, one byte per microsecond.
        let table = RateTable::new(RateSpec::new(1_000_000, MTU_ETHERNET));

        // 1500 - 1 = 1499 >> 3 = slot 187, which covers 188 << 3 = 1504 bytes.
        assert_eq!(table.l2t(1500), 1_504_000);
        assert_eq!(table.l2t(1), 8_000);
        assert_eq!(table.l2t(0), 8_000);

        // Longer than the table: 255 full tables plus the remainder.
        let long = table.l2t(4096);
        assert_eq!(long, table.data()[255] + table.data()[(4095 >> 3) & 0xFF]);
    }

    #[test]
    fn mpu_and_overhead_are_charged() {
        let spec = RateSpec::new(1_000_000, MTU_ETHERNET).with_mpu(64).with_overhead(24);
        let table = RateTable::new(spec);

        assert_eq!(table.l2t(1), 64_000);
        assert_eq!(table.l2t(100), RateTable::new(RateSpec::new(1_000_000, MTU_ETHERNET)).l2t(124));
    }

    #[test]
    fn max_size_from_depth() {
        let table = RateTable::new(RateSpec::new(1_000_000, MTU_ETHERNET));

        // A full table fits: every cell is servable.
        assert_eq!(table.max_size(Ticks::MAX), (256 << 3) - 1);
        // 1000 bytes worth of ticks: slots up to 1000 bytes fit.
        assert_eq!(table.max_size(1_000_000), (125 << 3) - 1);
        // Not even one cell.
        assert_eq!(table.max_size(1_000), -1);
    }
}
