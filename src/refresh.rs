//! Interrupt handler and refresh task.
//!
//! The DMA engine loops over the descriptor ring forever. Each time it
//! finishes a line buffer the end-of-frame interrupt fires and
//! [`InterruptHandler::on_interrupt`] posts the identity of that buffer to a
//! single-slot mailbox. [`RefreshTask`] waits on the mailbox and encodes the
//! next scan line into the buffer it was handed, while DMA is busy sending
//! the other one. If the task falls behind, newer notifications overwrite
//! older ones and the panel shows a stale line rather than a torn one.
//!
//! Once [`Notification::Stop`] has been posted the mailbox ignores further
//! lines, and the task re-checks the stop flag after every wake-up, so an
//! interrupt racing the teardown cannot keep the task alive.
//!
//! Frames reach a running task through a [`FrameExchange`]: the task adopts
//! a presented frame before encoding its next line and hands the frame it
//! was showing back to the application.
//!
//! ```text
//!   DMA: [front][back ][front][back ] ...
//!   IRQ:        ^front ^back  ^front
//!   task:        encode  encode  encode
//!                front   back    front
//! ```

use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU8;
use core::sync::atomic::Ordering;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::debug;
use log::error;
use log::warn;

use crate::brightness::BrightnessPeriods;
use crate::clock::ClockDivider;
use crate::config::DEFAULT_BRIGHTNESS;
use crate::descriptor::BufferId;
use crate::descriptor::DmaResources;
use crate::descriptor::LineBuffer;
use crate::descriptor::RingLayout;
use crate::encoder::LineEncoder;
use crate::framebuffer::FrameSource;
use crate::port::HardwarePort;
use crate::word::LAT16;
use crate::word::OE16;
use crate::word::IDLE_PAIR;

/// Message from the interrupt (or the driver) to the refresh task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// DMA finished sending this buffer and moved on to the other one.
    LineSent(BufferId),
    /// The refresh is being torn down.
    Stop,
}

/// State shared between the driver, the interrupt handler and the task.
///
/// Meant to live in a `static`:
///
/// ```
/// use esp_hub75_bcm::RefreshSignals;
///
/// static SIGNALS: RefreshSignals = RefreshSignals::new();
/// ```
pub struct RefreshSignals {
    mailbox: Signal<CriticalSectionRawMutex, Notification>,
    stopping: AtomicBool,
    brightness: AtomicU8,
    finished: Signal<CriticalSectionRawMutex, DmaResources>,
}

impl Default for RefreshSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshSignals {
    /// Empty mailbox, default brightness.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mailbox: Signal::new(),
            stopping: AtomicBool::new(false),
            brightness: AtomicU8::new(DEFAULT_BRIGHTNESS),
            finished: Signal::new(),
        }
    }

    /// Posts to the mailbox, replacing anything not yet taken.
    ///
    /// After a [`Notification::Stop`], line notifications are dropped until
    /// the next refresh starts.
    pub fn notify(&self, notification: Notification) {
        match notification {
            Notification::Stop => {
                self.stopping.store(true, Ordering::Release);
                self.mailbox.signal(notification);
            }
            Notification::LineSent(_) => {
                if !self.stopping.load(Ordering::Acquire) {
                    self.mailbox.signal(notification);
                }
            }
        }
    }

    /// Whether a stop has been posted since the refresh started.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Takes a pending notification without waiting.
    pub fn try_take(&self) -> Option<Notification> {
        self.mailbox.try_take()
    }

    pub(crate) async fn wait(&self) -> Notification {
        self.mailbox.wait().await
    }

    pub(crate) fn reset(&self) {
        self.stopping.store(false, Ordering::Release);
        self.mailbox.reset();
    }

    /// Brightness the task will use for the next line.
    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub(crate) fn set_brightness(&self, level: u8) {
        self.brightness.store(level, Ordering::Relaxed);
    }

    pub(crate) fn hand_back(&self, resources: DmaResources) {
        self.finished.signal(resources);
    }

    pub(crate) fn try_reclaim(&self) -> Option<DmaResources> {
        self.finished.try_take()
    }

    pub(crate) async fn reclaim(&self) -> DmaResources {
        self.finished.wait().await
    }
}

/// Frames travelling between the application and a running refresh.
///
/// The application draws into a frame it owns and [`present`](Self::present)s
/// it. The task switches to that frame before encoding its next line and
/// returns the frame it was showing through [`take_back`](Self::take_back).
/// Present one frame at a time: a frame presented before the previous one
/// was adopted replaces it, and the replaced reference is lost.
///
/// ```
/// use esp_hub75_bcm::FrameExchange;
/// use esp_hub75_bcm::Rgb565FrameBuffer;
///
/// static FRAMES: FrameExchange<'static, Rgb565FrameBuffer<64, 32>> = FrameExchange::new();
/// ```
pub struct FrameExchange<'a, F> {
    presented: Signal<CriticalSectionRawMutex, &'a mut F>,
    returned: Signal<CriticalSectionRawMutex, &'a mut F>,
    retired: Signal<CriticalSectionRawMutex, &'a mut F>,
}

impl<F> Default for FrameExchange<'_, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, F> FrameExchange<'a, F> {
    /// Nothing presented, nothing to take back.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            presented: Signal::new(),
            returned: Signal::new(),
            retired: Signal::new(),
        }
    }

    /// Queues `frame` for display from the next encoded line on.
    pub fn present(&self, frame: &'a mut F) {
        self.presented.signal(frame);
    }

    /// Waits for the frame the refresh stopped showing.
    pub async fn take_back(&self) -> &'a mut F {
        self.returned.wait().await
    }

    /// Takes the frame the refresh stopped showing, if there is one.
    pub fn try_take_back(&self) -> Option<&'a mut F> {
        self.returned.try_take()
    }

    /// Presents `frame` and waits for the one it replaced.
    pub async fn swap(&self, frame: &'a mut F) -> &'a mut F {
        self.present(frame);
        self.take_back().await
    }

    fn take_presented(&self) -> Option<&'a mut F> {
        self.presented.try_take()
    }

    fn give_back(&self, frame: &'a mut F) {
        self.returned.signal(frame);
    }

    fn retire(&self, frame: &'a mut F) {
        self.retired.signal(frame);
    }

    pub(crate) fn try_reclaim(&self) -> Option<&'a mut F> {
        self.retired.try_take()
    }
}

/// Runs in interrupt context at the end of every line.
pub struct InterruptHandler<'a, P: HardwarePort> {
    port: &'a P,
    signals: &'a RefreshSignals,
    layout: RingLayout,
}

impl<P: HardwarePort> Clone for InterruptHandler<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: HardwarePort> Copy for InterruptHandler<'_, P> {}

impl<'a, P: HardwarePort> InterruptHandler<'a, P> {
    pub(crate) fn new(port: &'a P, signals: &'a RefreshSignals, layout: RingLayout) -> Self {
        Self {
            port,
            signals,
            layout,
        }
    }

    /// Acknowledges the pending flags and, on end-of-frame, tells the task
    /// which buffer DMA just released. Never blocks or allocates.
    #[cfg_attr(feature = "esp32", esp_hal::ram)]
    pub fn on_interrupt(&self) {
        let status = self.port.read_status();
        self.port.clear_status(status);
        if !status.out_eof() {
            return;
        }
        if let Some(buffer) = self.layout.buffer_of(self.port.eof_descriptor()) {
            self.signals.notify(Notification::LineSent(buffer));
        }
    }
}

/// Bus words of the FM6124 configuration registers, repeated every 16
/// columns. Register 1 is latched for the last 11 columns, register 2 for
/// the last 12.
const FM6124_REGISTERS: [[u16; 16]; 2] = [
    [0, 0, 0, 0, 0, 0, 0x3F, 0x3F, 0x3F, 0x3F, 0x3F, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0x3F, 0, 0, 0, 0, 0, 0],
];

/// Slots of the front buffer carrying the register writes, in send order.
const PREAMBLE_SLOTS: [usize; 2] = [7, 6];

/// Writes the FM6124 register preamble into the slots sent first.
pub fn write_fm6124_preamble(buffer: &mut LineBuffer) {
    let width = buffer.pairs_per_slot() * 2;
    for (register, (values, slot)) in FM6124_REGISTERS.iter().zip(PREAMBLE_SLOTS).enumerate() {
        let latched_from = width - (11 + register);
        for column in 0..width {
            let mut word = values[column & 15] | OE16;
            if column >= latched_from {
                word |= LAT16;
            }
            buffer.set_column(slot, column, word);
        }
    }
}

fn clear_fm6124_preamble(buffer: &mut LineBuffer) {
    for slot in PREAMBLE_SLOTS {
        buffer.fill_slot(slot, IDLE_PAIR);
    }
}

/// Background side of the refresh.
///
/// Created by [`Hub75::begin_transaction`](crate::Hub75::begin_transaction);
/// spawn [`RefreshTask::run`] on an executor with the priority and core from
/// the driver's [`Config`](crate::Config). Dropping the task hands the DMA
/// memory and the frame it was showing back to the driver.
pub struct RefreshTask<'a, P: HardwarePort, F: FrameSource> {
    port: &'a P,
    signals: &'a RefreshSignals,
    frames: &'a FrameExchange<'a, F>,
    frame: Option<&'a mut F>,
    encoder: LineEncoder<'a>,
    resources: Option<DmaResources>,
    refresh_clock: ClockDivider,
    preamble: bool,
    y: usize,
    level: u8,
    periods: BrightnessPeriods,
    dma_owned: Option<BufferId>,
}

impl<'a, P: HardwarePort, F: FrameSource> RefreshTask<'a, P, F> {
    pub(crate) fn new(
        port: &'a P,
        signals: &'a RefreshSignals,
        frames: &'a FrameExchange<'a, F>,
        frame: &'a mut F,
        encoder: LineEncoder<'a>,
        resources: DmaResources,
        refresh_clock: ClockDivider,
        preamble: bool,
    ) -> Self {
        let level = signals.brightness();
        Self {
            port,
            signals,
            frames,
            frame: Some(frame),
            encoder,
            resources: Some(resources),
            refresh_clock,
            preamble,
            y: 0,
            level,
            periods: BrightnessPeriods::new(level, encoder.geometry().width()),
            dma_owned: None,
        }
    }

    /// Refreshes until the driver stops it.
    pub async fn run(mut self) {
        if !self.prepare().await {
            return;
        }
        while self.next_line().await {}
        debug!("refresh: stopped");
    }

    /// Registers the line interrupt, waits for the preamble to go out and
    /// switches the bus to the refresh clock. Returns `false` when the
    /// refresh cannot continue.
    pub async fn prepare(&mut self) -> bool {
        if let Err(e) = self.port.listen_line_complete() {
            error!("refresh: line interrupt unavailable: {e}");
            return false;
        }

        // Both buffers may go out once before the interrupt is live; the
        // front buffer is free again only after its own end-of-frame.
        loop {
            let notification = self.signals.wait().await;
            if self.signals.is_stopping() {
                return false;
            }
            match notification {
                Notification::Stop => return false,
                Notification::LineSent(BufferId::Front) => break,
                Notification::LineSent(BufferId::Back) => {}
            }
        }
        self.dma_owned = Some(BufferId::Back);

        if self.preamble {
            if let Some(resources) = self.resources.as_mut() {
                clear_fm6124_preamble(resources.buffer_mut(BufferId::Front));
            }
        }
        self.port.set_clock(self.refresh_clock);
        debug!(
            "refresh: running at {} Hz",
            self.refresh_clock.frequency(self.port.base_clock())
        );
        true
    }

    /// Waits for the next end-of-line and encodes the following scan line
    /// from the newest presented frame. Returns `false` once the driver
    /// posted [`Notification::Stop`].
    pub async fn next_line(&mut self) -> bool {
        let notification = self.signals.wait().await;
        if self.signals.is_stopping() {
            return false;
        }
        match notification {
            Notification::Stop => false,
            Notification::LineSent(buffer) => {
                self.dma_owned = Some(buffer.other());
                self.adopt_presented_frame();
                self.encode_into(buffer);
                true
            }
        }
    }

    fn adopt_presented_frame(&mut self) {
        let Some(next) = self.frames.take_presented() else {
            return;
        };
        let geometry = self.encoder.geometry();
        if next.line_size() != geometry.width() || next.total_lines() != geometry.height() {
            warn!(
                "refresh: presented frame is {}x{}, panel is {}x{}",
                next.line_size(),
                next.total_lines(),
                geometry.width(),
                geometry.height()
            );
            self.frames.give_back(next);
            return;
        }
        if let Some(previous) = self.frame.replace(next) {
            self.frames.give_back(previous);
        }
    }

    fn encode_into(&mut self, buffer: BufferId) {
        let geometry = self.encoder.geometry();
        let level = self.signals.brightness();
        if level != self.level {
            self.level = level;
            self.periods = BrightnessPeriods::new(level, geometry.width());
        }

        let half = geometry.half_height();
        self.y = (self.y + 1) % half;

        let (Some(resources), Some(frame)) = (self.resources.as_mut(), self.frame.as_deref())
        else {
            return;
        };
        self.encoder.encode(
            resources.buffer_mut(buffer).words_mut(),
            self.y,
            frame.line_buffer(self.y),
            frame.line_buffer(self.y + half),
            &self.periods,
        );
    }

    /// Scan line encoded last.
    #[must_use]
    pub fn line(&self) -> usize {
        self.y
    }

    /// Buffer DMA is sending, once the first line has gone out.
    #[must_use]
    pub fn dma_owned(&self) -> Option<BufferId> {
        self.dma_owned
    }

    /// Ring and line buffers.
    #[must_use]
    pub fn resources(&self) -> Option<&DmaResources> {
        self.resources.as_ref()
    }
}

impl<P: HardwarePort, F: FrameSource> Drop for RefreshTask<'_, P, F> {
    fn drop(&mut self) {
        // The frame goes first: the driver takes it once the resources are back.
        self.adopt_presented_frame();
        if let Some(frame) = self.frame.take() {
            self.frames.retire(frame);
        }
        if let Some(resources) = self.resources.take() {
            self.signals.hand_back(resources);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::future::Future;
    use std::vec::Vec;

    use embassy_futures::block_on;
    use embedded_graphics::pixelcolor::raw::RawU16;
    use embedded_graphics::pixelcolor::RgbColor;

    use super::*;
    use crate::config::AddressMode;
    use crate::config::PanelGeometry;
    use crate::framebuffer::Color;
    use crate::gamma::GAMMA_TABLE;
    use crate::port::sim::SimPort;
    use crate::port::InterruptStatus;
    use crate::Rgb565FrameBuffer;

    type Frame = Rgb565FrameBuffer<64, 32>;

    fn geometry() -> PanelGeometry {
        PanelGeometry::new(64, 32).unwrap()
    }

    fn task<'a>(
        port: &'a SimPort,
        signals: &'a RefreshSignals,
        frames: &'a FrameExchange<'a, Frame>,
        frame: &'a mut Frame,
        preamble: bool,
    ) -> RefreshTask<'a, SimPort, Frame> {
        let mut resources = DmaResources::build(&geometry()).unwrap();
        if preamble {
            write_fm6124_preamble(resources.buffer_mut(BufferId::Front));
        }
        port.start(resources.ring().head(), ClockDivider { n: 200, a: 1, b: 0 });
        RefreshTask::new(
            port,
            signals,
            frames,
            frame,
            LineEncoder::new(&GAMMA_TABLE, geometry(), AddressMode::Binary),
            resources,
            ClockDivider { n: 46, a: 56, b: 28 },
            preamble,
        )
    }

    fn handler<'a>(
        port: &'a SimPort,
        signals: &'a RefreshSignals,
        task: &RefreshTask<'_, SimPort, Frame>,
    ) -> InterruptHandler<'a, SimPort> {
        InterruptHandler::new(port, signals, task.resources().unwrap().ring().layout())
    }

    fn send_line(port: &SimPort, task: &RefreshTask<'_, SimPort, Frame>) {
        port.send_line(task.resources().unwrap().ring());
    }

    fn words(task: &RefreshTask<'_, SimPort, Frame>, buffer: BufferId) -> Vec<u32> {
        Vec::from(task.resources().unwrap().buffer(buffer).words())
    }

    /// Line buffer contents for scan line `y` of `frame` at `level`.
    fn encoded(frame: &Frame, y: usize, level: u8) -> Vec<u32> {
        let mut resources = DmaResources::build(&geometry()).unwrap();
        LineEncoder::new(&GAMMA_TABLE, geometry(), AddressMode::Binary).encode(
            resources.buffer_mut(BufferId::Back).words_mut(),
            y,
            frame.line_buffer(y),
            frame.line_buffer(y + 16),
            &BrightnessPeriods::new(level, 64),
        );
        Vec::from(resources.buffer(BufferId::Back).words())
    }

    fn gradient() -> Frame {
        let mut frame = Frame::new();
        for y in 0..32 {
            for x in 0..64 {
                frame.set_pixel(x, y, RawU16::new((x * 1024 + y * 37) as u16).into());
            }
        }
        frame
    }

    #[test]
    fn test_preamble_layout() {
        let mut resources = DmaResources::build(&geometry()).unwrap();
        let buffer = resources.buffer_mut(BufferId::Front);
        write_fm6124_preamble(buffer);
        assert_eq!(buffer.column(7, 6).bits(), 0x3F | OE16);
        assert_eq!(buffer.column(7, 5).bits(), OE16);
        assert_eq!(buffer.column(7, 16 + 10).bits(), 0x3F | OE16);
        assert_eq!(buffer.column(6, 9).bits(), 0x3F | OE16);
        assert_eq!(buffer.column(6, 10).bits(), OE16);
        assert_eq!(buffer.column(7, 64 - 11).bits() & LAT16, LAT16);
        assert_eq!(buffer.column(7, 64 - 12).bits() & LAT16, 0);
        assert_eq!(buffer.column(6, 64 - 12).bits() & LAT16, LAT16);
        assert_eq!(buffer.column(6, 64 - 13).bits() & LAT16, 0);
        assert!(buffer.slot(5).iter().all(|&w| w == IDLE_PAIR));
    }

    #[test]
    fn test_interrupt_posts_sent_buffer() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let task = task(&port, &signals, &frames, &mut frame, false);
        let handler = handler(&port, &signals, &task);

        send_line(&port, &task);
        handler.on_interrupt();
        assert_eq!(port.status.get(), 0);
        assert_eq!(signals.try_take(), Some(Notification::LineSent(BufferId::Front)));

        send_line(&port, &task);
        handler.on_interrupt();
        assert_eq!(signals.try_take(), Some(Notification::LineSent(BufferId::Back)));
    }

    #[test]
    fn test_interrupt_ignores_other_flags() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let task = task(&port, &signals, &frames, &mut frame, false);
        let handler = handler(&port, &signals, &task);

        port.status.set(1 << 11);
        handler.on_interrupt();
        assert_eq!(port.status.get(), 0);
        assert_eq!(signals.try_take(), None);

        port.status.set(InterruptStatus::line_complete().bits());
        port.eof.set(0x10);
        handler.on_interrupt();
        assert_eq!(signals.try_take(), None);
    }

    #[test]
    fn test_mailbox_keeps_latest() {
        let signals = RefreshSignals::new();
        signals.notify(Notification::LineSent(BufferId::Front));
        signals.notify(Notification::LineSent(BufferId::Back));
        assert_eq!(signals.try_take(), Some(Notification::LineSent(BufferId::Back)));
        assert_eq!(signals.try_take(), None);
    }

    #[test]
    fn test_stop_outlives_later_lines() {
        let signals = RefreshSignals::new();
        signals.notify(Notification::Stop);
        signals.notify(Notification::LineSent(BufferId::Front));
        assert!(signals.is_stopping());
        assert_eq!(signals.try_take(), Some(Notification::Stop));

        signals.reset();
        assert!(!signals.is_stopping());
        signals.notify(Notification::LineSent(BufferId::Back));
        assert_eq!(signals.try_take(), Some(Notification::LineSent(BufferId::Back)));
    }

    #[test]
    fn test_prepare_clears_preamble_and_switches_clock() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, true);
        let handler = handler(&port, &signals, &task);

        send_line(&port, &task);
        handler.on_interrupt();
        assert!(block_on(task.prepare()));
        assert!(port.listening.get());
        assert_eq!(port.clock.get(), Some(ClockDivider { n: 46, a: 56, b: 28 }));
        assert_eq!(task.dma_owned(), Some(BufferId::Back));
        let front = task.resources().unwrap().buffer(BufferId::Front);
        for slot in PREAMBLE_SLOTS {
            assert!(front.slot(slot).iter().all(|&w| w == IDLE_PAIR));
        }
    }

    #[test]
    fn test_prepare_waits_for_front_buffer() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, true);

        signals.notify(Notification::LineSent(BufferId::Back));
        let mut prepare = core::pin::pin!(task.prepare());
        let waker = futures_waker();
        let mut cx = core::task::Context::from_waker(&waker);
        assert!(prepare.as_mut().poll(&mut cx).is_pending());
        signals.notify(Notification::LineSent(BufferId::Front));
        assert_eq!(prepare.as_mut().poll(&mut cx), core::task::Poll::Ready(true));
    }

    #[test]
    fn test_failed_interrupt_registration() {
        let port = SimPort {
            fail_listen: true,
            ..SimPort::default()
        };
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let task = task(&port, &signals, &frames, &mut frame, false);
        block_on(task.run());
        assert!(frames.try_reclaim().is_some());
        assert!(signals.try_reclaim().is_some());
    }

    #[test]
    fn test_task_never_writes_dma_buffer() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = gradient();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, true);
        let handler = handler(&port, &signals, &task);

        send_line(&port, &task);
        handler.on_interrupt();
        assert!(block_on(task.prepare()));

        for line in 1..=40 {
            send_line(&port, &task);
            handler.on_interrupt();
            let Some(Notification::LineSent(sent)) = signals.try_take() else {
                panic!("no notification for line {line}");
            };
            signals.notify(Notification::LineSent(sent));
            let dma = sent.other();
            let before = words(&task, dma);

            assert!(block_on(task.next_line()));

            assert_eq!(task.dma_owned(), Some(dma));
            assert_eq!(task.line(), line % 16);
            assert_eq!(words(&task, dma), before);
        }
    }

    #[test]
    fn test_brightness_change_leaves_encoded_buffer() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let reference = gradient();
        let mut frame = gradient();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, false);

        signals.set_brightness(255);
        signals.notify(Notification::LineSent(BufferId::Front));
        assert!(block_on(task.next_line()));
        let front = words(&task, BufferId::Front);
        assert_eq!(front, encoded(&reference, 1, 255));

        signals.set_brightness(16);
        assert_eq!(words(&task, BufferId::Front), front);

        signals.notify(Notification::LineSent(BufferId::Back));
        assert!(block_on(task.next_line()));
        assert_eq!(words(&task, BufferId::Front), front);
        assert_eq!(words(&task, BufferId::Back), encoded(&reference, 2, 16));
        assert_ne!(encoded(&reference, 2, 16), encoded(&reference, 2, 255));
    }

    #[test]
    fn test_presented_frame_reaches_next_line() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let level = signals.brightness();
        let mut shown = Frame::new();
        let mut white = Frame::new();
        for y in 0..32 {
            for x in 0..64 {
                white.set_pixel(x, y, Color::WHITE);
            }
        }
        let white_line = encoded(&white, 1, level);
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut shown, false);

        frames.present(&mut white);
        assert!(frames.try_take_back().is_none());
        signals.notify(Notification::LineSent(BufferId::Front));
        assert!(block_on(task.next_line()));
        assert_eq!(words(&task, BufferId::Front), white_line);

        // The replaced frame is free to redraw while the refresh runs.
        let redraw = frames.try_take_back().expect("replaced frame returned");
        redraw.set_pixel(5, 2, Color::RED);
        let red_line = encoded(redraw, 2, level);
        assert_ne!(red_line, encoded(&Frame::new(), 2, level));
        frames.present(redraw);

        signals.notify(Notification::LineSent(BufferId::Back));
        assert!(block_on(task.next_line()));
        assert_eq!(words(&task, BufferId::Back), red_line);
        assert_eq!(words(&task, BufferId::Front), white_line);
        let white = frames.try_take_back().expect("white frame returned");
        assert_eq!(white.get_pixel(63, 31), Color::WHITE);
    }

    #[test]
    fn test_frames_without_presentation_stay_put() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = gradient();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, false);

        signals.notify(Notification::LineSent(BufferId::Front));
        assert!(block_on(task.next_line()));
        assert!(frames.try_take_back().is_none());
    }

    #[test]
    fn test_drop_returns_pending_and_shown_frames() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut shown = Frame::new();
        let mut pending = Frame::new();
        pending.set_pixel(1, 1, Color::GREEN);
        let frames = FrameExchange::new();
        let task = task(&port, &signals, &frames, &mut shown, false);

        frames.present(&mut pending);
        drop(task);
        let kept = frames.try_reclaim().expect("frame left with the driver");
        assert_eq!(kept.get_pixel(1, 1), Color::GREEN);
        let returned = frames.try_take_back().expect("shown frame returned");
        assert_eq!(returned.get_pixel(1, 1), Color::BLACK);
        assert!(signals.try_reclaim().is_some());
    }

    #[test]
    fn test_stop_hands_back_resources() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, false);
        let before = words(&task, BufferId::Back);

        signals.notify(Notification::Stop);
        assert!(!block_on(task.next_line()));
        assert_eq!(words(&task, BufferId::Back), before);
        drop(task);
        assert!(signals.try_reclaim().is_some());
        assert!(frames.try_reclaim().is_some());
    }

    #[test]
    fn test_stop_wins_over_late_line() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, false);

        signals.notify(Notification::Stop);
        signals.notify(Notification::LineSent(BufferId::Front));
        assert!(!block_on(task.next_line()));
        assert_eq!(signals.try_take(), None);
    }

    #[test]
    fn test_stop_wins_over_racing_interrupt() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut task = task(&port, &signals, &frames, &mut frame, false);
        let handler = handler(&port, &signals, &task);
        let front = words(&task, BufferId::Front);

        // An interrupt after the stop posts nothing.
        signals.notify(Notification::Stop);
        send_line(&port, &task);
        handler.on_interrupt();
        assert_eq!(signals.try_take(), Some(Notification::Stop));

        // One that checked the flag just before the stop still lands in the
        // mailbox, on top of it.
        signals.mailbox.signal(Notification::LineSent(BufferId::Front));
        assert!(!block_on(task.prepare()));
        signals.mailbox.signal(Notification::LineSent(BufferId::Front));
        assert!(!block_on(task.next_line()));
        assert_eq!(words(&task, BufferId::Front), front);

        drop(task);
        assert!(signals.try_reclaim().is_some());
    }

    fn futures_waker() -> core::task::Waker {
        struct Noop;
        impl std::task::Wake for Noop {
            fn wake(self: std::sync::Arc<Self>) {}
        }
        std::sync::Arc::new(Noop).into()
    }
}
