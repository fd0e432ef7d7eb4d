//! Continuous-refresh driver for HUB75 LED matrix displays.
//!
//! HUB75 panels have no frame memory of their own: the host has to stream
//! every scan line, every bit plane, forever. This crate keeps that stream
//! running from a pair of DMA line buffers while the application draws into
//! an ordinary RGB565 frame buffer.
//!
//! ## How a line is refreshed
//!
//! A ring of DMA descriptors transmits one of two line buffers per scan line.
//! Each line buffer holds ten slots of `width` bus words: eight bit planes,
//! an idle slot and an extended-light slot. Descriptors revisit slots so that
//! every bit plane stays lit for a duration proportional to its weight
//! (Binary Code Modulation). The last descriptor of each buffer raises an
//! end-of-frame interrupt; the [`refresh::InterruptHandler`] posts the
//! identity of the buffer that just finished, and the [`refresh::RefreshTask`]
//! encodes the next scan line into it while DMA transmits the other one.
//!
//! ## Driver lifecycle
//!
//! 1. [`Hub75::configure`] with a [`Config`].
//! 2. [`Hub75::set_image_buffer`] binds the [`FrameSource`] to display.
//! 3. [`Hub75::init`] allocates the descriptor ring and line buffers.
//! 4. [`Hub75::begin_transaction`] starts DMA and hands back the task to spawn.
//!    From here on new pictures go through [`FrameExchange::swap`].
//! 5. [`Hub75::end_transaction`] / [`Hub75::release`] stop DMA and free memory
//!    once the task has exited.
//!
//! ## Feature flags
//!
//! - `esp32`: the I2S parallel [`HardwarePort`] for either I2S unit of the
//!   ESP32 (LX6).
//! - `defmt`: `defmt::Format` for the public types.
#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

extern crate alloc;

pub mod brightness;
pub mod clock;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod encoder;
pub mod framebuffer;
pub mod gamma;
pub mod port;
pub mod refresh;
pub mod word;

cfg_if::cfg_if! {
    if #[cfg(feature = "esp32")] {
        pub mod i2s_parallel;
        pub use i2s_parallel::Hub75Pins16;
        pub use i2s_parallel::I2sInstance;
        pub use i2s_parallel::I2sParallelPort;
        pub use i2s_parallel::I2sUnit;
    }
}

pub use brightness::BrightnessPeriods;
pub use clock::ClockDivider;
pub use config::AddressMode;
pub use config::Config;
pub use config::PanelGeometry;
pub use driver::Hub75;
pub use framebuffer::FrameSource;
pub use framebuffer::Rgb565FrameBuffer;
pub use gamma::GammaTable;
pub use port::HardwarePort;
pub use refresh::FrameExchange;
pub use refresh::RefreshSignals;

/// Bit planes transmitted per scan line.
pub const TRANSFER_PERIOD_COUNT: usize = 8;
/// Half-width periods spent switching rows.
pub const LINECHANGE_HALF_PERIOD_COUNT: usize = 2;
/// Extra periods that extend the light time of the high planes.
pub const EXTEND_PERIOD_COUNT: usize = 4;
/// Descriptors per line buffer.
pub const TOTAL_PERIOD_COUNT: usize =
    TRANSFER_PERIOD_COUNT + LINECHANGE_HALF_PERIOD_COUNT + EXTEND_PERIOD_COUNT;
/// Slots of `width` bus words in one line buffer.
pub const BUFFER_SLOT_COUNT: usize = TRANSFER_PERIOD_COUNT + 1 + LINECHANGE_HALF_PERIOD_COUNT / 2;

/// Errors raised while bringing the refresh up.
///
/// None of these escape [`Hub75::init`] other than as a `false` return; they
/// are logged once where they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Hub75Error {
    /// The DMA descriptors or line buffers could not be allocated.
    Allocation,
    /// The panel geometry cannot be represented by the descriptor ring.
    Geometry,
    /// No image buffer has been bound.
    NoImageBuffer,
    /// The driver has not been initialised.
    NotInitialized,
    /// A refresh is already running.
    Busy,
    /// The hardware port refused its configuration.
    Port,
    /// The line-complete interrupt could not be registered.
    Interrupt,
}

impl core::fmt::Display for Hub75Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Hub75Error::Allocation => f.write_str("DMA memory allocation failed"),
            Hub75Error::Geometry => f.write_str("unsupported panel geometry"),
            Hub75Error::NoImageBuffer => f.write_str("no image buffer bound"),
            Hub75Error::NotInitialized => f.write_str("driver not initialised"),
            Hub75Error::Busy => f.write_str("refresh already running"),
            Hub75Error::Port => f.write_str("hardware port configuration failed"),
            Hub75Error::Interrupt => f.write_str("interrupt registration failed"),
        }
    }
}

impl From<alloc::collections::TryReserveError> for Hub75Error {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Hub75Error::Allocation
    }
}
