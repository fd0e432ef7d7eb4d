//! Gamma lookup producing bit-spaced exposure codes.
//!
//! Each 6-bit linear channel value maps to an 8-bit gamma corrected level.
//! The level is stored with bit `j` moved to bit `(j + 2) * 3`, so the three
//! colour channels of one pixel can be summed into a single word where every
//! bit plane occupies its own three-bit lane.

/// 8-bit gamma curve sampled at 64 linear steps.
const GAMMA_CURVE: [u8; 64] = [
    0, 0, 1, 1, 2, 2, 3, 4, 5, 6, 8, 9, 11, 12, 14, 16, 18, 20, 23, 25, 28, 30, 33, 36, 39, 42, 46,
    49, 53, 56, 60, 64, 68, 72, 77, 81, 86, 90, 95, 100, 105, 110, 116, 121, 127, 132, 138, 144,
    150, 156, 163, 169, 176, 182, 189, 196, 203, 210, 218, 225, 233, 240, 248, 255,
];

/// Bit position of bit plane 0 in an exposure code.
pub const LANE_BASE: u32 = 6;
/// Distance between two bit planes in an exposure code.
pub const LANE_STRIDE: u32 = 3;

/// Table shared by every encoder.
pub static GAMMA_TABLE: GammaTable = GammaTable::new();

/// Immutable 64 entry table of exposure codes.
#[derive(Clone, PartialEq, Eq)]
pub struct GammaTable {
    entries: [u32; 64],
}

impl GammaTable {
    /// Builds the table from the standard curve.
    #[must_use]
    pub const fn new() -> Self {
        let mut entries = [0u32; 64];
        let mut i = 0;
        while i < entries.len() {
            entries[i] = spread(GAMMA_CURVE[i]);
            i += 1;
        }
        Self { entries }
    }

    /// Exposure code for a 6-bit channel index. Only the low six bits of
    /// `index` are used.
    #[inline(always)]
    #[must_use]
    pub fn code(&self, index: u32) -> u32 {
        self.entries[(index & 0x3F) as usize]
    }

    /// Collapses an exposure code back into its 8-bit level.
    #[must_use]
    pub const fn level(code: u32) -> u8 {
        let mut level = 0u8;
        let mut plane = 0;
        while plane < 8 {
            if code & (1 << (LANE_BASE + plane * LANE_STRIDE)) != 0 {
                level |= 1 << plane;
            }
            plane += 1;
        }
        level
    }
}

impl Default for GammaTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for GammaTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for GammaTable {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "GammaTable({=[u32]:#x})", &self.entries[..])
    }
}

const fn spread(level: u8) -> u32 {
    let mut code = 0u32;
    let mut plane = 0;
    while plane < 8 {
        if level & (1 << plane) != 0 {
            code |= 1 << (LANE_BASE + plane * LANE_STRIDE);
        }
        plane += 1;
    }
    code
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_full_scale_sets_every_lane() {
        let code = GAMMA_TABLE.code(63);
        assert_eq!(code, 0x0924_9240);
        assert_eq!(code.count_ones(), 8);
        for plane in 0..8 {
            let lane = (code >> (LANE_BASE + plane * LANE_STRIDE)) & 0b111;
            assert_eq!(lane, 0b001, "plane {plane}");
        }
    }

    #[test]
    fn test_zero_is_dark() {
        assert_eq!(GAMMA_TABLE.code(0), 0);
        assert_eq!(GAMMA_TABLE.code(1), 0);
    }

    #[test]
    fn test_levels_follow_curve() {
        for (index, expected) in GAMMA_CURVE.iter().enumerate() {
            let code = GAMMA_TABLE.code(index as u32);
            assert_eq!(GammaTable::level(code), *expected);
        }
    }

    #[test]
    fn test_levels_non_decreasing() {
        let mut previous = 0;
        for index in 0..64 {
            let level = GammaTable::level(GAMMA_TABLE.code(index));
            assert!(level >= previous, "index {index}");
            previous = level;
        }
    }

    #[test]
    fn test_codes_stay_in_lanes() {
        let lanes: u32 = (0..8).map(|p| 1 << (LANE_BASE + p * LANE_STRIDE)).sum();
        for index in 0..64 {
            assert_eq!(GAMMA_TABLE.code(index) & !lanes, 0);
        }
    }

    #[test]
    fn test_index_is_masked() {
        assert_eq!(GAMMA_TABLE.code(64 + 5), GAMMA_TABLE.code(5));
    }
}
