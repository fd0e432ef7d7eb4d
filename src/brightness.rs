//! Brightness to bit-plane light time.
//!
//! Every bit plane is shifted out over a full slot of `width` columns, but the
//! LEDs are only allowed to light for the first few columns of it. The table
//! built here holds, per plane, the column at which output is disabled again.

use crate::TRANSFER_PERIOD_COUNT;

/// Number of low planes whose light time halves from one plane to the next.
pub const HALVED_PLANES: usize = 5;

/// Columns of blanking every lit period keeps at minimum.
const PERIOD_PADDING: u32 = 3;

/// Columns reserved for the latch and blanking edges of a slot.
const SLOT_OVERHEAD: u32 = 8;

/// Column thresholds for one brightness level.
///
/// Entry `p` is the column at which plane `p` is switched dark; the last entry
/// always equals the panel width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrightnessPeriods {
    periods: [u16; TRANSFER_PERIOD_COUNT + 1],
}

impl BrightnessPeriods {
    /// Computes the thresholds for `level` on a panel `width` columns wide.
    ///
    /// # Arguments
    /// * `level` - brightness, `0` is the dimmest visible setting
    /// * `width` - panel width in pixels, at least 8
    #[must_use]
    pub fn new(level: u8, width: usize) -> Self {
        let scale = (u32::from(level) + 1).pow(2);
        let span = (width as u32).saturating_sub(SLOT_OVERHEAD);
        let mut light = (span * scale) >> 16;

        let mut periods = [0u16; TRANSFER_PERIOD_COUNT + 1];
        periods[TRANSFER_PERIOD_COUNT] = width as u16;
        for plane in (0..TRANSFER_PERIOD_COUNT).rev() {
            if plane < HALVED_PLANES {
                light >>= 1;
            }
            periods[plane] = (light + PERIOD_PADDING) as u16;
        }
        Self { periods }
    }

    /// Threshold column for plane `index`, or the panel width for the last entry.
    #[inline(always)]
    #[must_use]
    pub fn get(&self, index: usize) -> usize {
        usize::from(self.periods[index])
    }

    /// All thresholds, plane 0 first.
    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.periods
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_mid_level_on_64_wide() {
        let periods = BrightnessPeriods::new(128, 64);
        assert_eq!(periods.as_slice(), &[3, 3, 4, 6, 10, 17, 17, 17, 64]);
    }

    #[test]
    fn test_full_level_on_64_wide() {
        let periods = BrightnessPeriods::new(255, 64);
        assert_eq!(periods.as_slice(), &[4, 6, 10, 17, 31, 59, 59, 59, 64]);
    }

    #[test]
    fn test_lowest_level_is_padding_only() {
        let periods = BrightnessPeriods::new(0, 64);
        assert_eq!(&periods.as_slice()[..8], &[3; 8]);
    }

    #[test]
    fn test_every_level_is_monotonic() {
        for width in [16, 32, 64, 128, 256] {
            for level in 0..=255u8 {
                let periods = BrightnessPeriods::new(level, width);
                let slice = periods.as_slice();
                assert_eq!(periods.get(TRANSFER_PERIOD_COUNT), width);
                for pair in slice.windows(2) {
                    assert!(pair[0] <= pair[1], "width {width} level {level}: {slice:?}");
                }
            }
        }
    }

    #[test]
    fn test_higher_level_never_darker() {
        let mut previous = BrightnessPeriods::new(0, 64);
        for level in 1..=255u8 {
            let current = BrightnessPeriods::new(level, 64);
            for plane in 0..TRANSFER_PERIOD_COUNT {
                assert!(current.get(plane) >= previous.get(plane));
            }
            previous = current;
        }
    }
}
