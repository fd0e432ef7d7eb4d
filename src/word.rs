//! Bus word layout.
//!
//! One 16-bit word is clocked out per panel column. Line buffers store two
//! columns per 32-bit word; the I2S unit of the ESP32 sends the upper half
//! first, so the earlier (even) column lives in bits 16..=31.

use bitfield::bitfield;

bitfield! {
    /// A single column on the bus.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct OutputWord(u16);
    impl Debug;
    /// Row address A..E. In shift-register mode A clocks, B latches and C
    /// carries the data of the row selector.
    pub addr, set_addr: 13, 9;
    /// Address line C, or the row selector data in shift-register mode.
    pub addr_c, set_addr_c: 11;
    /// Address line B, or the row selector latch in shift-register mode.
    pub addr_b, set_addr_b: 10;
    /// Address line A, or the row selector clock in shift-register mode.
    pub addr_a, set_addr_a: 9;
    /// High keeps every LED dark.
    pub output_disable, set_output_disable: 7;
    /// Moves the shifted column data into the output registers.
    pub latch, set_latch: 6;
    /// Blue of the lower half.
    pub blu2, set_blu2: 5;
    /// Green of the lower half.
    pub grn2, set_grn2: 4;
    /// Red of the lower half.
    pub red2, set_red2: 3;
    /// Blue of the upper half.
    pub blu1, set_blu1: 2;
    /// Green of the upper half.
    pub grn1, set_grn1: 1;
    /// Red of the upper half.
    pub red1, set_red1: 0;
}

#[cfg(feature = "defmt")]
impl defmt::Format for OutputWord {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "OutputWord({=u16:#x})", self.0)
    }
}

impl OutputWord {
    /// Word with every field cleared.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Raw bus value.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Colour bits of both halves, `R1 G1 B1 R2 G2 B2` from bit 0.
    #[must_use]
    pub const fn colors(self) -> u16 {
        self.0 & COLOR_MASK
    }
}

impl From<u16> for OutputWord {
    fn from(bits: u16) -> Self {
        Self(bits)
    }
}

/// All six colour bits of one column.
pub const COLOR_MASK: u16 = 0x3F;
/// First row address bit.
pub const ADDR_SHIFT: u32 = 9;

const OE_BIT: u16 = 1 << 7;
const LAT_BIT: u16 = 1 << 6;

/// Output disable on a single column.
pub const OE16: u16 = OE_BIT;
/// Latch on a single column.
pub const LAT16: u16 = LAT_BIT;

/// Output disable on both columns of a pair.
pub const OE: u32 = pair(OE_BIT);
/// Latch on both columns of a pair.
pub const LAT: u32 = pair(LAT_BIT);
/// Shift-register clock on the later column only; both columns need it
/// widened explicitly.
pub const PIN_A_CLK: u32 = 1 << ADDR_SHIFT;
/// Shift-register latch on both columns.
pub const PIN_B_LAT: u32 = pair(1 << (ADDR_SHIFT + 1));
/// Shift-register data on both columns.
pub const PIN_C_DAT: u32 = pair(1 << (ADDR_SHIFT + 2));

/// Content of every word of a freshly allocated line buffer.
pub const IDLE_PAIR: u32 = OE;

/// Replicates a column value into both halves of a pair.
#[must_use]
pub const fn pair(bits: u16) -> u32 {
    (bits as u32) << 16 | bits as u32
}

/// Row address `y` on both columns of a pair.
#[must_use]
pub const fn row_address(y: usize) -> u32 {
    let y = y as u32;
    y << ADDR_SHIFT | y << (ADDR_SHIFT + 16)
}

/// Splits a pair into `(even, odd)` columns.
#[must_use]
pub const fn columns(pair: u32) -> (OutputWord, OutputWord) {
    (OutputWord((pair >> 16) as u16), OutputWord(pair as u16))
}
