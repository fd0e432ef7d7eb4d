//! Scan line encoder.
//!
//! Turns two rows of RGB565 pixels (row `y` for R1/G1/B1 and row
//! `y + half_height` for R2/G2/B2) into the ten slots of a line buffer:
//!
//! | slot | content                                                    |
//! |------|------------------------------------------------------------|
//! | 0    | idle, shift-register clock pulse around its middle         |
//! | 1..=8| bit planes 0..=7, latched on the last column               |
//! | 9    | extended light of the high planes                          |
//!
//! While a slot is shifted out the LEDs show the previously latched plane.
//! Output stays enabled until the column given by [`BrightnessPeriods`] for
//! that slot and is disabled for the remaining columns.

use crate::brightness::BrightnessPeriods;
use crate::config::AddressMode;
use crate::config::PanelGeometry;
use crate::gamma::GammaTable;
use crate::word::row_address;
use crate::word::LAT;
use crate::word::OE;
use crate::word::PIN_A_CLK;
use crate::word::PIN_B_LAT;
use crate::word::PIN_C_DAT;
use crate::BUFFER_SLOT_COUNT;
use crate::TRANSFER_PERIOD_COUNT;

/// Planes `1, 3, 5, 7` of the upper half, `0, 2, 4, 6` of the lower half.
const LOW_LANES: u32 = 0b000_111_000_111_000_111_000_111_000_000;
/// Planes `2, 4, 6` of the upper half, `1, 3, 5, 7` of the lower half.
const HIGH_LANES: u32 = 0b111_000_111_000_111_000_111_000_000_000;
/// Plane 0 of the upper half sits below the first lane.
const FIRST_LANE: u32 = 0b111_000;

/// Extended-light slot.
const EXTEND_SLOT: usize = BUFFER_SLOT_COUNT - 1;
/// Slot holding the last bit plane, kept dark while it shifts.
const LAST_PLANE_SLOT: usize = TRANSFER_PERIOD_COUNT;

/// Writes scan lines into line buffers.
#[derive(Debug, Clone, Copy)]
pub struct LineEncoder<'g> {
    gamma: &'g GammaTable,
    geometry: PanelGeometry,
    address_mode: AddressMode,
}

impl<'g> LineEncoder<'g> {
    /// Creates an encoder for one panel.
    #[must_use]
    pub fn new(gamma: &'g GammaTable, geometry: PanelGeometry, address_mode: AddressMode) -> Self {
        Self {
            gamma,
            geometry,
            address_mode,
        }
    }

    /// Panel the encoder writes for.
    #[must_use]
    pub fn geometry(&self) -> PanelGeometry {
        self.geometry
    }

    /// Exposure codes of both pixels of a pair, channels summed so plane `p`
    /// occupies bits `3p + 4..=3p + 6` as blue, green, red from the top.
    #[inline(always)]
    fn exposure(&self, pixels: u32) -> (u32, u32) {
        // 5-bit red and blue are widened to 6 bits by repeating their top bit.
        let r = ((pixels >> 10) & 0x003E_003E) | ((pixels >> 15) & 0x0001_0001);
        let g = (pixels >> 5) & 0x003F_003F;
        let b = ((pixels << 1) & 0x003E_003E) | ((pixels >> 4) & 0x0001_0001);

        let lane = |v: u32, half: u32| (v >> half) & 0x3F;
        let combine = |half: u32| {
            let mut sum = self.gamma.code(lane(g, half));
            sum += self.gamma.code(lane(r, half)) >> 1;
            let mut code = self.gamma.code(lane(b, half));
            code += sum >> 1;
            code
        };
        (combine(0), combine(16))
    }

    /// Encodes scan line `y` into `dst`.
    ///
    /// `top` and `bottom` are the rows shown on R1/G1/B1 and R2/G2/B2, at
    /// least `width` pixels each. `dst` must be a whole line buffer.
    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn encode(
        &self,
        dst: &mut [u32],
        y: usize,
        top: &[u16],
        bottom: &[u16],
        periods: &BrightnessPeriods,
    ) {
        let width = self.geometry.width();
        let pairs = self.geometry.pairs_per_slot();
        debug_assert_eq!(dst.len(), pairs * BUFFER_SLOT_COUNT);
        debug_assert!(top.len() >= width && bottom.len() >= width);

        let row = match self.address_mode {
            AddressMode::Binary => row_address(y),
            AddressMode::ShiftRegister => 0,
        };
        // Control bits of slots 0..=8; slot 9 reuses the one of slot 7.
        let mut control = [row; TRANSFER_PERIOD_COUNT + 1];
        control[LAST_PLANE_SLOT] = OE | PIN_A_CLK;

        let mut lit_slot = 0;
        let mut threshold = periods.get(0);
        let mut x = 0;

        for (pair, (upper, lower)) in top[..width]
            .chunks_exact(2)
            .zip(bottom[..width].chunks_exact(2))
            .enumerate()
        {
            let (upper_0, upper_1) =
                self.exposure(u32::from(upper[1]) << 16 | u32::from(upper[0]));
            let (lower_0, lower_1) =
                self.exposure(u32::from(lower[1]) << 16 | u32::from(lower[0]));

            // Six-bit groups of both halves: planes 1, 3, 5, 7 for the even
            // slots, planes 0, 2, 4, 6 for the odd slots.
            let split = |upper: u32, lower: u32| {
                let upper = upper >> 1;
                let lower = lower << 2;
                let even = (upper & LOW_LANES) + (lower & HIGH_LANES);
                let odd = ((upper & (HIGH_LANES | FIRST_LANE)) + (lower & LOW_LANES)) << 3;
                (even, odd)
            };
            let (mut even_0, mut odd_0) = split(upper_0, lower_0);
            let (mut even_1, mut odd_1) = split(upper_1, lower_1);

            dst[pair] = control[0];
            dst[EXTEND_SLOT * pairs + pair] = control[TRANSFER_PERIOD_COUNT - 1];

            let mut slot = 1;
            while slot < BUFFER_SLOT_COUNT - 1 {
                even_0 >>= 6;
                even_1 >>= 6;
                odd_0 >>= 6;
                odd_1 >>= 6;
                dst[slot * pairs + pair] =
                    ((odd_0 & 0x3F) << 16 | (odd_1 & 0x3F)) + control[slot];
                dst[(slot + 1) * pairs + pair] =
                    ((even_0 & 0x3F) << 16 | (even_1 & 0x3F)) + control[slot + 1];
                slot += 2;
            }

            x += 2;
            while x >= threshold && lit_slot < TRANSFER_PERIOD_COUNT {
                control[lit_slot] |= OE;
                lit_slot += 1;
                threshold = periods.get(lit_slot);
            }
        }

        let middle = pairs / 2;
        dst[middle - 1] |= PIN_A_CLK | PIN_A_CLK << 16;
        dst[middle] |= PIN_A_CLK | PIN_A_CLK << 16;

        // Blank the first columns of every slot and latch every plane on its
        // last column. An odd period blanks one column more.
        for slot in 0..TRANSFER_PERIOD_COUNT {
            let start = slot * pairs;
            dst[start] |= OE;
            dst[start + 1] |= second_pair_blank(periods.get(slot));
            dst[start + 2 * pairs - 1] |= LAT;
        }

        let extend = EXTEND_SLOT * pairs;
        dst[extend] |= OE;
        dst[extend + 1] |= second_pair_blank(periods.get(TRANSFER_PERIOD_COUNT - 1));
        // One-hot row marker for the shift register, clocked out during slot 8.
        dst[extend - (y + 1)] |= PIN_C_DAT;
        dst[extend - (y + 1 + self.geometry.half_height())] |= PIN_C_DAT;
        dst[extend - 1] |= LAT | PIN_B_LAT;
    }
}

#[inline(always)]
fn second_pair_blank(period: usize) -> u32 {
    if period & 1 != 0 {
        OE
    } else {
        OE & 0xFFFF_0000
    }
}
