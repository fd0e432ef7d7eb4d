//! Hardware capabilities the refresh needs.
//!
//! The refresh core never touches registers itself; everything goes through a
//! [`HardwarePort`]. All methods take `&self` since the port is shared between
//! the driver, the refresh task and the interrupt handler.

use bitfield::bitfield;

use crate::clock::ClockDivider;
use crate::clock::BASE_CLOCK_HZ;
use crate::descriptor::DmaDescriptor;
use crate::Hub75Error;

bitfield! {
    /// Interrupt status of the bus peripheral.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct InterruptStatus(u32);
    impl Debug;
    /// Every descriptor of the ring has been sent.
    pub out_total_eof, set_out_total_eof: 16;
    /// A descriptor flagged end-of-frame has been sent.
    pub out_eof, set_out_eof: 12;
    /// The transmitter finished a descriptor.
    pub out_done, set_out_done: 11;
}

#[cfg(feature = "defmt")]
impl defmt::Format for InterruptStatus {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "InterruptStatus({=u32:#x})", self.0)
    }
}

impl InterruptStatus {
    /// Status with only the given raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw register value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Status with only end-of-frame raised.
    #[must_use]
    pub fn line_complete() -> Self {
        let mut status = Self(0);
        status.set_out_eof(true);
        status
    }
}

/// Bus peripheral and DMA engine driving the panel.
pub trait HardwarePort {
    /// Routes the pins and puts the peripheral into 16-bit parallel output.
    ///
    /// # Errors
    /// [`Hub75Error::Port`] when the peripheral cannot be set up.
    fn configure(&self) -> Result<(), Hub75Error>;

    /// Registers the interrupt handler and enables the end-of-frame
    /// interrupt. Called once from the refresh task.
    ///
    /// # Errors
    /// [`Hub75Error::Interrupt`] when the interrupt cannot be allocated.
    fn listen_line_complete(&self) -> Result<(), Hub75Error>;

    /// Starts DMA at `head` with the bus clocked by `clock`.
    fn start(&self, head: *const DmaDescriptor, clock: ClockDivider);

    /// Disables interrupts and stops DMA. The ring must not be read by the
    /// hardware once this returns.
    fn stop(&self);

    /// Changes the bus clock of a running transfer.
    fn set_clock(&self, clock: ClockDivider);

    /// Pending interrupt flags.
    fn read_status(&self) -> InterruptStatus;

    /// Acknowledges the given interrupt flags.
    fn clear_status(&self, status: InterruptStatus);

    /// Address of the last descriptor that raised end-of-frame.
    fn eof_descriptor(&self) -> usize;

    /// Clock the bus divider divides.
    fn base_clock(&self) -> u32 {
        BASE_CLOCK_HZ
    }
}

impl<P: HardwarePort + ?Sized> HardwarePort for &P {
    fn configure(&self) -> Result<(), Hub75Error> {
        (**self).configure()
    }

    fn listen_line_complete(&self) -> Result<(), Hub75Error> {
        (**self).listen_line_complete()
    }

    fn start(&self, head: *const DmaDescriptor, clock: ClockDivider) {
        (**self).start(head, clock);
    }

    fn stop(&self) {
        (**self).stop();
    }

    fn set_clock(&self, clock: ClockDivider) {
        (**self).set_clock(clock);
    }

    fn read_status(&self) -> InterruptStatus {
        (**self).read_status()
    }

    fn clear_status(&self, status: InterruptStatus) {
        (**self).clear_status(status);
    }

    fn eof_descriptor(&self) -> usize {
        (**self).eof_descriptor()
    }

    fn base_clock(&self) -> u32 {
        (**self).base_clock()
    }
}
