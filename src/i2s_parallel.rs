//! I2S parallel [`HardwarePort`] for the ESP32 (LX6).
//!
//! Either I2S unit runs in LCD mode and shifts one 16-bit bus word per clock
//! out of the descriptor ring. Pins are routed by `esp-hal`'s
//! [`I2sParallel`]; the transmitter, the outlink and the interrupt are then
//! driven straight through the register block because the ring never
//! terminates.
//!
//! # Example
//! ```no_run
//! use esp_hal::gpio::NoPin;
//! use esp_hal::interrupt::InterruptHandler;
//! use esp_hal::interrupt::Priority;
//! use esp_hub75_bcm::Hub75Pins16;
//! use esp_hub75_bcm::I2sParallelPort;
//!
//! #[esp_hal::handler]
//! fn on_i2s() {
//!     // forward to `Hub75::interrupt_handler()`
//! }
//!
//! # fn demo(peripherals: esp_hal::peripherals::Peripherals) {
//! // A 64x32 panel has no E line.
//! let pins = Hub75Pins16 {
//!     red1: peripherals.GPIO16.into(),
//!     grn1: peripherals.GPIO4.into(),
//!     blu1: peripherals.GPIO17.into(),
//!     red2: peripherals.GPIO18.into(),
//!     grn2: peripherals.GPIO5.into(),
//!     blu2: peripherals.GPIO19.into(),
//!     addr0: peripherals.GPIO15.into(),
//!     addr1: peripherals.GPIO13.into(),
//!     addr2: peripherals.GPIO12.into(),
//!     addr3: peripherals.GPIO14,
//!     addr4: NoPin,
//!     blank: peripherals.GPIO25.into(),
//!     clock: peripherals.GPIO27.into(),
//!     latch: peripherals.GPIO26.into(),
//! };
//! let port = I2sParallelPort::new(
//!     peripherals.I2S1,
//!     peripherals.DMA_I2S1,
//!     pins,
//!     InterruptHandler::new(on_i2s, Priority::Priority2),
//! );
//! # }
//! ```

use esp_hal::dma::DmaChannelFor;
use esp_hal::gpio::interconnect::PeripheralOutput;
use esp_hal::gpio::AnyPin;
use esp_hal::gpio::NoPin;
use esp_hal::gpio::OutputSignal;
use esp_hal::i2s::parallel::I2sParallel;
use esp_hal::i2s::parallel::TxSixteenBits;
use esp_hal::i2s::AnyI2s;
use esp_hal::interrupt;
use esp_hal::interrupt::InterruptHandler;
use esp_hal::peripherals::Interrupt;
use esp_hal::peripherals::I2S0;
use esp_hal::peripherals::I2S1;
use esp_hal::time::Rate;
use esp_hal::Blocking;
use log::debug;
use log::error;

use crate::clock::ClockDivider;
use crate::clock::PREAMBLE_CLOCK_HZ;
use crate::descriptor::DmaDescriptor;
use crate::port::HardwarePort;
use crate::port::InterruptStatus;
use crate::Hub75Error;

mod bits {
    pub const CONF_TX_RESET: u32 = 1 << 0;
    pub const CONF_RX_RESET: u32 = 1 << 1;
    pub const CONF_TX_FIFO_RESET: u32 = 1 << 2;
    pub const CONF_RX_FIFO_RESET: u32 = 1 << 3;
    pub const CONF_TX_START: u32 = 1 << 4;
    pub const CONF_TX_RIGHT_FIRST: u32 = 1 << 8;
    pub const CONF_RX_RIGHT_FIRST: u32 = 1 << 9;
    pub const CONF_TX_MONO: u32 = 1 << 14;
    pub const CONF_TX_MSB_RIGHT: u32 = 1 << 16;

    pub const CONF_DEFAULT: u32 =
        CONF_TX_MSB_RIGHT | CONF_TX_RIGHT_FIRST | CONF_RX_RIGHT_FIRST | CONF_TX_MONO;
    pub const CONF_START: u32 = CONF_DEFAULT | CONF_TX_START;
    pub const CONF_RESET: u32 = CONF_DEFAULT | CONF_TX_RESET;

    pub const LC_IN_RST: u32 = 1 << 0;
    pub const LC_OUT_RST: u32 = 1 << 1;
    pub const LC_AHBM_FIFO_RST: u32 = 1 << 2;
    pub const LC_AHBM_RST: u32 = 1 << 3;
    pub const LC_OUT_EOF_MODE: u32 = 1 << 8;
    pub const LC_OUTDSCR_BURST_EN: u32 = 1 << 9;
    pub const LC_OUT_DATA_BURST_EN: u32 = 1 << 11;

    pub const CONF1_TX_PCM_BYPASS: u32 = 1 << 3;
    pub const CONF2_LCD_EN: u32 = 1 << 5;
    pub const CONF_CHAN_MONO: u32 = 1 | 1 << 3;

    pub const FIFO_RX_DATA_NUM: u32 = 16;
    pub const FIFO_TX_DATA_NUM: u32 = 16 << 6;
    pub const FIFO_DSCR_EN: u32 = 1 << 12;
    pub const FIFO_TX_MOD: u32 = 1 << 13;
    pub const FIFO_RX_MOD: u32 = 1 << 16;
    pub const FIFO_CONF_DMA: u32 =
        FIFO_TX_MOD | FIFO_RX_MOD | FIFO_TX_DATA_NUM | FIFO_RX_DATA_NUM | FIFO_DSCR_EN;

    pub const SAMPLE_RATE_DIRECT: u32 = 16 << 12 | 16 << 18 | 1 | 1 << 6;

    pub const OUTLINK_ADDR: u32 = 0x000F_FFFF;
    pub const OUTLINK_STOP: u32 = 1 << 28;
    pub const OUTLINK_START: u32 = 1 << 29;
}

/// The two I2S units of the ESP32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2sUnit {
    /// `I2S0`, interrupt source `I2S0`.
    I2s0,
    /// `I2S1`, interrupt source `I2S1`.
    I2s1,
}

impl I2sUnit {
    fn interrupt(self) -> Interrupt {
        match self {
            I2sUnit::I2s0 => Interrupt::I2S0,
            I2sUnit::I2s1 => Interrupt::I2S1,
        }
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::I2S0<'_> {}
    impl Sealed for super::I2S1<'_> {}
}

/// An I2S peripheral that can drive the panel.
pub trait I2sInstance<'d>: Into<AnyI2s<'d>> + sealed::Sealed {
    /// Unit whose registers and interrupt the port uses.
    const UNIT: I2sUnit;
}

impl<'d> I2sInstance<'d> for I2S0<'d> {
    const UNIT: I2sUnit = I2sUnit::I2s0;
}

impl<'d> I2sInstance<'d> for I2S1<'d> {
    const UNIT: I2sUnit = I2sUnit::I2s1;
}

/// Runs `$body` with `$regs` bound to the register block of `$unit`.
macro_rules! with_regs {
    ($unit:expr, |$regs:ident| $body:block) => {
        match $unit {
            I2sUnit::I2s0 => {
                let $regs = I2S0::regs();
                $body
            }
            I2sUnit::I2s1 => {
                let $regs = I2S1::regs();
                $body
            }
        }
    };
}

/// HUB75 pins in bus bit order.
///
/// `blank` is the panel's active-low OE line and `clock` is driven
/// inverted so data is stable on the rising edge the panel samples.
/// Panels with fewer rows leave `addr3` and `addr4` unconnected with
/// [`NoPin`].
pub struct Hub75Pins16<'d, D = AnyPin<'d>, E = AnyPin<'d>> {
    /// Red, upper half.
    pub red1: AnyPin<'d>,
    /// Green, upper half.
    pub grn1: AnyPin<'d>,
    /// Blue, upper half.
    pub blu1: AnyPin<'d>,
    /// Red, lower half.
    pub red2: AnyPin<'d>,
    /// Green, lower half.
    pub grn2: AnyPin<'d>,
    /// Blue, lower half.
    pub blu2: AnyPin<'d>,
    /// Row address A.
    pub addr0: AnyPin<'d>,
    /// Row address B.
    pub addr1: AnyPin<'d>,
    /// Row address C.
    pub addr2: AnyPin<'d>,
    /// Row address D.
    pub addr3: D,
    /// Row address E.
    pub addr4: E,
    /// Output enable, active low.
    pub blank: AnyPin<'d>,
    /// Pixel clock.
    pub clock: AnyPin<'d>,
    /// Latch.
    pub latch: AnyPin<'d>,
}

impl<'d, D: PeripheralOutput<'d>, E: PeripheralOutput<'d>> Hub75Pins16<'d, D, E> {
    fn convert_pins(self) -> (TxSixteenBits<'d>, OutputSignal<'d>) {
        let (_, clock) = self.clock.split();
        let pins = TxSixteenBits::new(
            self.red1,
            self.grn1,
            self.blu1,
            self.red2,
            self.grn2,
            self.blu2,
            self.latch,
            self.blank,
            NoPin,
            self.addr0,
            self.addr1,
            self.addr2,
            self.addr3,
            self.addr4,
            NoPin,
            NoPin,
        );
        (pins, clock.inverted())
    }
}

/// An I2S unit in LCD mode, feeding the panel from the descriptor ring.
pub struct I2sParallelPort<'d> {
    _i2s: I2sParallel<'d, Blocking>,
    unit: I2sUnit,
    handler: InterruptHandler,
}

// SAFETY: after construction the port only touches the register block of its
// own unit, with whole-register writes that are atomic on this core.
unsafe impl Sync for I2sParallelPort<'_> {}

impl<'d> I2sParallelPort<'d> {
    /// Routes the pins to an I2S unit and takes its DMA channel.
    ///
    /// # Arguments
    /// * `i2s` - `I2S0` or `I2S1`
    /// * `channel` - The DMA channel bound to that unit
    /// * `pins` - The HUB75 pin configuration
    /// * `handler` - Interrupt handler forwarding to
    ///   [`InterruptHandler::on_interrupt`](crate::refresh::InterruptHandler::on_interrupt),
    ///   registered when the refresh task starts
    pub fn new<I, D, E>(
        i2s: I,
        channel: impl DmaChannelFor<AnyI2s<'d>>,
        pins: Hub75Pins16<'d, D, E>,
        handler: InterruptHandler,
    ) -> Self
    where
        I: I2sInstance<'d>,
        D: PeripheralOutput<'d>,
        E: PeripheralOutput<'d>,
    {
        let (pins, clock) = pins.convert_pins();
        let i2s = I2sParallel::new(
            i2s.into(),
            channel,
            Rate::from_hz(PREAMBLE_CLOCK_HZ),
            pins,
            clock,
        );
        debug!("{:?}: pins routed", I::UNIT);
        Self {
            _i2s: i2s,
            unit: I::UNIT,
            handler,
        }
    }

    /// Unit driving the panel.
    pub fn unit(&self) -> I2sUnit {
        self.unit
    }
}

impl HardwarePort for I2sParallelPort<'_> {
    fn configure(&self) -> Result<(), Hub75Error> {
        use bits::*;
        with_regs!(self.unit, |regs| {
            // SAFETY: raw values below are valid settings for every field.
            unsafe {
                regs.conf().write(|w| {
                    w.bits(CONF_TX_RESET | CONF_RX_RESET | CONF_TX_FIFO_RESET | CONF_RX_FIFO_RESET)
                });
                regs.conf().write(|w| w.bits(CONF_DEFAULT));
                regs.timing().write(|w| w.bits(0));

                regs.lc_conf()
                    .write(|w| w.bits(LC_IN_RST | LC_OUT_RST | LC_AHBM_RST | LC_AHBM_FIFO_RST));
                regs.lc_conf().write(|w| {
                    w.bits(LC_OUT_EOF_MODE | LC_OUTDSCR_BURST_EN | LC_OUT_DATA_BURST_EN)
                });

                regs.in_link().write(|w| w.bits(0));
                regs.out_link().write(|w| w.bits(0));

                regs.conf1().write(|w| w.bits(CONF1_TX_PCM_BYPASS));
                regs.conf2().write(|w| w.bits(CONF2_LCD_EN));
                regs.conf_chan().write(|w| w.bits(CONF_CHAN_MONO));

                regs.int_ena().write(|w| w.bits(0));
                regs.int_clr().write(|w| w.bits(u32::MAX));
            }
        });
        debug!("{:?}: configured for 16-bit LCD output", self.unit);
        Ok(())
    }

    fn listen_line_complete(&self) -> Result<(), Hub75Error> {
        let source = self.unit.interrupt();
        // SAFETY: the unit is owned by this port, nothing else binds it.
        unsafe {
            interrupt::bind_interrupt(source, self.handler.handler());
        }
        interrupt::enable(source, self.handler.priority()).map_err(|e| {
            error!("{:?}: enabling interrupt failed: {e:?}", self.unit);
            Hub75Error::Interrupt
        })?;
        with_regs!(self.unit, |regs| {
            // SAFETY: int_ena accepts any flag combination.
            unsafe {
                regs.int_ena()
                    .write(|w| w.bits(InterruptStatus::line_complete().bits()));
            }
        });
        Ok(())
    }

    fn start(&self, head: *const DmaDescriptor, clock: ClockDivider) {
        use bits::*;
        with_regs!(self.unit, |regs| {
            // SAFETY: `head` points into the ring the driver keeps alive until
            // `stop` returns. The outlink takes the low 20 bits of a DRAM address.
            unsafe {
                regs.out_link().write(|w| w.bits(0));
                regs.fifo_conf().write(|w| w.bits(FIFO_CONF_DMA));
                regs.sample_rate_conf().write(|w| w.bits(SAMPLE_RATE_DIRECT));
                regs.clkm_conf().write(|w| w.bits(clock.register().0));
                regs.int_clr().write(|w| w.bits(u32::MAX));

                regs.conf().write(|w| w.bits(CONF_RESET));
                regs.out_link()
                    .write(|w| w.bits(OUTLINK_START | (head as u32 & OUTLINK_ADDR)));
                regs.conf().write(|w| w.bits(CONF_START));
            }
        });
    }

    fn stop(&self) {
        use bits::*;
        with_regs!(self.unit, |regs| {
            // SAFETY: plain register writes that halt the transmitter.
            unsafe {
                regs.int_ena().write(|w| w.bits(0));
                regs.int_clr().write(|w| w.bits(u32::MAX));
                regs.out_link().modify(|r, w| w.bits(r.bits() | OUTLINK_STOP));
                regs.conf().write(|w| w.bits(CONF_RESET));
                regs.out_link().write(|w| w.bits(0));
            }
        });
        interrupt::disable(esp_hal::system::Cpu::current(), self.unit.interrupt());
    }

    #[esp_hal::ram]
    fn set_clock(&self, clock: ClockDivider) {
        with_regs!(self.unit, |regs| {
            // SAFETY: the divider register layout matches `ClockRegister`.
            unsafe {
                regs.clkm_conf().write(|w| w.bits(clock.register().0));
            }
        });
    }

    #[esp_hal::ram]
    fn read_status(&self) -> InterruptStatus {
        with_regs!(self.unit, |regs| {
            InterruptStatus::from_bits(regs.int_st().read().bits())
        })
    }

    #[esp_hal::ram]
    fn clear_status(&self, status: InterruptStatus) {
        with_regs!(self.unit, |regs| {
            // SAFETY: writing a one clears that flag and nothing else.
            unsafe {
                regs.int_clr().write(|w| w.bits(status.bits()));
            }
        });
    }

    #[esp_hal::ram]
    fn eof_descriptor(&self) -> usize {
        with_regs!(self.unit, |regs| {
            regs.out_eof_des_addr().read().bits() as usize
        })
    }
}
