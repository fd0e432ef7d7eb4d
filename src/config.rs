//! Driver configuration and panel geometry.

use crate::Hub75Error;
use crate::BUFFER_SLOT_COUNT;

/// Default refresh rate in frames per second.
pub const DEFAULT_REFRESH_RATE: u32 = 120;
/// Default brightness level.
pub const DEFAULT_BRIGHTNESS: u8 = 128;

/// How the row selector of the panel is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressMode {
    /// Row number on the A..E address pins.
    #[default]
    Binary,
    /// A one-hot shift register clocked through A (clock), B (latch) and C
    /// (data).
    ShiftRegister,
}

/// Refresh configuration.
///
/// ```
/// use esp_hub75_bcm::AddressMode;
/// use esp_hub75_bcm::Config;
///
/// let config = Config::default()
///     .with_refresh_rate(200)
///     .with_address_mode(AddressMode::ShiftRegister)
///     .with_brightness(64);
/// assert_eq!(config.refresh_rate, 200);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Full frames per second.
    pub refresh_rate: u32,
    /// Row selector wiring.
    pub address_mode: AddressMode,
    /// Initial brightness.
    pub brightness: u8,
    /// Write the FM6124 configuration registers when the refresh starts.
    pub init_fm6124: bool,
    /// Priority hint for the executor running the refresh task.
    pub task_priority: u8,
    /// Core the refresh task should run on, if the platform has a choice.
    pub task_core: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_rate: DEFAULT_REFRESH_RATE,
            address_mode: AddressMode::Binary,
            brightness: DEFAULT_BRIGHTNESS,
            init_fm6124: true,
            task_priority: 3,
            task_core: None,
        }
    }
}

impl Config {
    /// Sets the full-frame refresh rate.
    #[must_use]
    pub fn with_refresh_rate(mut self, refresh_rate: u32) -> Self {
        self.refresh_rate = refresh_rate;
        self
    }

    /// Sets the row selector wiring.
    #[must_use]
    pub fn with_address_mode(mut self, address_mode: AddressMode) -> Self {
        self.address_mode = address_mode;
        self
    }

    /// Sets the initial brightness.
    #[must_use]
    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    /// Enables or disables the FM6124 register preamble.
    #[must_use]
    pub fn with_fm6124_init(mut self, enabled: bool) -> Self {
        self.init_fm6124 = enabled;
        self
    }

    /// Sets the executor priority hint of the refresh task.
    #[must_use]
    pub fn with_task_priority(mut self, priority: u8) -> Self {
        self.task_priority = priority;
        self
    }

    /// Pins the refresh task to a core.
    #[must_use]
    pub fn with_task_core(mut self, core: Option<u8>) -> Self {
        self.task_core = core;
        self
    }
}

/// Descriptor length field limit in bytes.
const MAX_TRANSFER_BYTES: usize = 4095;

/// Width and height of the panel chain in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PanelGeometry {
    width: usize,
    height: usize,
}

impl PanelGeometry {
    /// Validates a geometry against what the descriptor ring can represent.
    ///
    /// # Errors
    /// [`Hub75Error::Geometry`] when the width is not a multiple of 4, is 8 or
    /// less, or overflows a descriptor; when the height is zero or odd; or
    /// when the shift-register row markers would not fit the line buffer.
    pub fn new(width: usize, height: usize) -> Result<Self, Hub75Error> {
        if width <= 8 || width % 4 != 0 || width * 2 > MAX_TRANSFER_BYTES {
            return Err(Hub75Error::Geometry);
        }
        if height == 0 || height % 2 != 0 || height > (BUFFER_SLOT_COUNT - 1) * width / 2 {
            return Err(Hub75Error::Geometry);
        }
        Ok(Self { width, height })
    }

    /// Columns per line.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Lines in the frame.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Scan lines per frame; line `y` drives rows `y` and `y + half_height`.
    #[must_use]
    pub fn half_height(&self) -> usize {
        self.height / 2
    }

    /// Pairs of columns per slot.
    #[must_use]
    pub fn pairs_per_slot(&self) -> usize {
        self.width / 2
    }
}
