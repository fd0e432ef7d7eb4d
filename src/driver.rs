//! Driver facade.
//!
//! # Example
//! ```
//! # use esp_hub75_bcm::port::HardwarePort;
//! # fn demo<P: HardwarePort>(port: &P) {
//! use esp_hub75_bcm::Config;
//! use esp_hub75_bcm::FrameExchange;
//! use esp_hub75_bcm::Hub75;
//! use esp_hub75_bcm::RefreshSignals;
//! use esp_hub75_bcm::Rgb565FrameBuffer;
//!
//! type Frame = Rgb565FrameBuffer<64, 32>;
//! static SIGNALS: RefreshSignals = RefreshSignals::new();
//! let mut front = Frame::new();
//! let mut back = Frame::new();
//! let frames = FrameExchange::new();
//!
//! let mut hub75 = Hub75::new(port, &SIGNALS, &frames);
//! hub75.configure(Config::default().with_refresh_rate(120));
//! hub75.set_image_buffer(&mut front);
//! if hub75.init() {
//!     if let Some(task) = hub75.begin_transaction() {
//!         // spawn `task.run()` on the executor of your choice, then draw
//!         // into `back` and swap it in with `frames.swap(&mut back)`
//!         frames.present(&mut back);
//! #       drop(task);
//!     }
//! }
//! # }
//! ```

use log::debug;
use log::error;
use log::warn;

use crate::clock::ClockDivider;
use crate::clock::PREAMBLE_CLOCK_HZ;
use crate::config::Config;
use crate::config::PanelGeometry;
use crate::descriptor::BufferId;
use crate::descriptor::DmaResources;
use crate::descriptor::RingLayout;
use crate::encoder::LineEncoder;
use crate::framebuffer::FrameSource;
use crate::gamma::GAMMA_TABLE;
use crate::port::HardwarePort;
use crate::refresh::write_fm6124_preamble;
use crate::refresh::FrameExchange;
use crate::refresh::InterruptHandler;
use crate::refresh::Notification;
use crate::refresh::RefreshSignals;
use crate::refresh::RefreshTask;
use crate::Hub75Error;
use crate::TOTAL_PERIOD_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// DMA stopped, resources (if any) held by the driver.
    Idle,
    /// DMA running, resources and frame lent to the refresh task.
    Running,
    /// DMA stopped, waiting for the task to hand the resources and the
    /// frame back.
    Stopping,
}

/// Bus clock that refreshes the whole panel `refresh_rate` times a second.
#[must_use]
pub fn refresh_frequency(geometry: &PanelGeometry, refresh_rate: u32) -> u32 {
    let words = TOTAL_PERIOD_COUNT as u64 * geometry.width() as u64 * geometry.height() as u64;
    let hz = (words * u64::from(refresh_rate)) >> 1;
    hz.clamp(1, u64::from(u32::MAX)) as u32
}

/// HUB75 continuous-refresh driver.
///
/// Dropping a running driver stops DMA; the task exits at its next wake-up.
pub struct Hub75<'a, P: HardwarePort, F: FrameSource> {
    port: &'a P,
    signals: &'a RefreshSignals,
    frames: &'a FrameExchange<'a, F>,
    config: Config,
    frame: Option<&'a mut F>,
    geometry: Option<PanelGeometry>,
    resources: Option<DmaResources>,
    layout: Option<RingLayout>,
    state: State,
}

impl<'a, P: HardwarePort, F: FrameSource> Hub75<'a, P, F> {
    /// Creates an idle driver with the default [`Config`].
    ///
    /// # Arguments
    /// * `port` - The bus peripheral and DMA engine
    /// * `signals` - State shared with the interrupt handler and the task
    /// * `frames` - Hands new frames to the task while it refreshes
    pub fn new(port: &'a P, signals: &'a RefreshSignals, frames: &'a FrameExchange<'a, F>) -> Self {
        let config = Config::default();
        signals.set_brightness(config.brightness);
        Self {
            port,
            signals,
            frames,
            config,
            frame: None,
            geometry: None,
            resources: None,
            layout: None,
            state: State::Idle,
        }
    }

    /// Replaces the configuration. Ignored while a refresh is active.
    pub fn configure(&mut self, config: Config) {
        if self.state != State::Idle {
            warn!("hub75: configure ignored while refreshing");
            return;
        }
        self.signals.set_brightness(config.brightness);
        self.config = config;
    }

    /// Current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds the frame to display. Ignored while a refresh is active, where
    /// [`FrameExchange::present`] changes the picture instead. DMA memory
    /// sized for another geometry is freed and needs a new
    /// [`init`](Self::init).
    pub fn set_image_buffer(&mut self, frame: &'a mut F) {
        if self.state != State::Idle {
            warn!("hub75: image buffer change ignored while refreshing");
            return;
        }
        let geometry = PanelGeometry::new(frame.line_size(), frame.total_lines()).ok();
        if self.resources.is_some() && geometry != self.geometry {
            debug!("hub75: geometry changed, releasing DMA memory");
            self.resources = None;
            self.layout = None;
        }
        self.frame = Some(frame);
    }

    /// The bound frame, unless a refresh is showing it.
    pub fn image_buffer_mut(&mut self) -> Option<&mut F> {
        if self.state == State::Stopping {
            self.try_reclaim();
        }
        if self.state != State::Idle {
            return None;
        }
        self.frame.as_deref_mut()
    }

    /// Allocates the descriptor ring and line buffers for the bound frame.
    ///
    /// # Returns
    /// `false` when the driver stays inert; the reason has been logged.
    pub fn init(&mut self) -> bool {
        match self.try_init() {
            Ok(()) => true,
            Err(e) => {
                error!("hub75: init failed: {e}");
                false
            }
        }
    }

    fn try_init(&mut self) -> Result<(), Hub75Error> {
        if self.state != State::Idle {
            return Err(Hub75Error::Busy);
        }
        let frame = self.frame.as_deref().ok_or(Hub75Error::NoImageBuffer)?;
        let geometry = PanelGeometry::new(frame.line_size(), frame.total_lines())?;
        self.port.configure()?;

        self.resources = None;
        self.layout = None;
        let resources = DmaResources::build(&geometry)?;
        debug!(
            "hub75: {}x{} panel, {} bytes per line buffer",
            geometry.width(),
            geometry.height(),
            resources.buffer(BufferId::Front).words().len() * 4
        );
        self.layout = Some(resources.ring().layout());
        self.geometry = Some(geometry);
        self.resources = Some(resources);
        Ok(())
    }

    /// Sets the brightness used from the next encoded line on.
    pub fn set_brightness(&self, level: u8) {
        self.signals.set_brightness(level);
    }

    /// Current brightness.
    pub fn brightness(&self) -> u8 {
        self.signals.brightness()
    }

    /// Handler to call from the bus interrupt, available once initialised.
    pub fn interrupt_handler(&self) -> Option<InterruptHandler<'a, P>> {
        self.layout
            .map(|layout| InterruptHandler::new(self.port, self.signals, layout))
    }

    /// Starts DMA and returns the task that keeps the line buffers fed.
    ///
    /// The bus starts at 400 kHz while the panel driver registers are
    /// written; the task switches to the refresh clock. Returns `None` when
    /// not initialised or already running.
    pub fn begin_transaction(&mut self) -> Option<RefreshTask<'a, P, F>> {
        if self.state == State::Stopping && !self.try_reclaim() {
            debug!("hub75: refresh task still exiting");
            return None;
        }
        if self.state == State::Running {
            debug!("hub75: refresh already running");
            return None;
        }
        let (Some(geometry), true, true) =
            (self.geometry, self.frame.is_some(), self.resources.is_some())
        else {
            warn!("hub75: begin_transaction before init");
            return None;
        };
        let (Some(frame), Some(mut resources)) = (self.frame.take(), self.resources.take()) else {
            return None;
        };

        if self.config.init_fm6124 {
            write_fm6124_preamble(resources.buffer_mut(BufferId::Front));
        }
        let head = resources.ring().head();
        let base = self.port.base_clock();
        let refresh_clock =
            ClockDivider::for_frequency(base, refresh_frequency(&geometry, self.config.refresh_rate));
        let encoder = LineEncoder::new(&GAMMA_TABLE, geometry, self.config.address_mode);

        self.signals.reset();
        let task = RefreshTask::new(
            self.port,
            self.signals,
            self.frames,
            frame,
            encoder,
            resources,
            refresh_clock,
            self.config.init_fm6124,
        );
        self.port
            .start(head, ClockDivider::for_frequency(base, PREAMBLE_CLOCK_HZ));
        self.state = State::Running;
        debug!("hub75: refresh started");
        Some(task)
    }

    /// Stops DMA and tells the task to exit. The task keeps the DMA memory
    /// until it has observed the stop.
    pub fn end_transaction(&mut self) {
        if self.state != State::Running {
            return;
        }
        self.port.stop();
        self.signals.notify(Notification::Stop);
        self.state = State::Stopping;
        debug!("hub75: refresh stopping");
    }

    /// Stops the refresh, waits for the task to exit and frees the DMA
    /// memory. The frame stays bound.
    pub async fn release(&mut self) {
        self.end_transaction();
        if self.state == State::Stopping {
            drop(self.signals.reclaim().await);
            if let Some(frame) = self.frames.try_reclaim() {
                self.frame = Some(frame);
            }
            self.state = State::Idle;
        }
        self.resources = None;
        self.layout = None;
        debug!("hub75: released");
    }

    /// Whether a refresh has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Takes the DMA memory and the frame back once the task has exited.
    fn try_reclaim(&mut self) -> bool {
        let Some(resources) = self.signals.try_reclaim() else {
            return false;
        };
        self.resources = Some(resources);
        if let Some(frame) = self.frames.try_reclaim() {
            self.frame = Some(frame);
        }
        self.state = State::Idle;
        true
    }
}

impl<P: HardwarePort, F: FrameSource> Drop for Hub75<'_, P, F> {
    fn drop(&mut self) {
        if self.state == State::Running {
            self.port.stop();
            self.signals.notify(Notification::Stop);
            debug!("hub75: dropped while refreshing, DMA stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use embassy_futures::block_on;
    use embedded_graphics::pixelcolor::RgbColor;

    use super::*;
    use crate::clock::BASE_CLOCK_HZ;
    use crate::framebuffer::Color;
    use crate::port::sim::SimPort;
    use crate::Rgb565FrameBuffer;
    use crate::BUFFER_SLOT_COUNT;

    type Frame = Rgb565FrameBuffer<64, 32>;

    #[test]
    fn test_refresh_frequency() {
        let geometry = PanelGeometry::new(64, 32).unwrap();
        assert_eq!(refresh_frequency(&geometry, 120), 1_720_320);
    }

    #[test]
    fn test_init_requires_image_buffer() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let frames = FrameExchange::<Frame>::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        assert!(!hub75.init());
        assert!(hub75.interrupt_handler().is_none());
        assert!(hub75.begin_transaction().is_none());
        assert!(hub75.image_buffer_mut().is_none());
    }

    #[test]
    fn test_init_reports_port_failure() {
        let port = SimPort {
            fail_configure: true,
            ..SimPort::default()
        };
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.set_image_buffer(&mut frame);
        assert!(!hub75.init());
        assert!(hub75.begin_transaction().is_none());
    }

    #[test]
    fn test_init_rejects_bad_geometry() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Rgb565FrameBuffer::<6, 4>::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.set_image_buffer(&mut frame);
        assert!(!hub75.init());
        assert_eq!(port.configured.get(), 0);
    }

    #[test]
    fn test_brightness_and_config() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let frames = FrameExchange::<Frame>::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.configure(Config::default().with_brightness(10));
        assert_eq!(hub75.brightness(), 10);
        hub75.set_brightness(200);
        assert_eq!(signals.brightness(), 200);
    }

    #[test]
    fn test_full_lifecycle() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.configure(Config::default().with_refresh_rate(120));
        hub75.set_image_buffer(&mut frame);
        assert!(hub75.init());
        assert_eq!(port.configured.get(), 1);

        let handler = hub75.interrupt_handler().unwrap();
        let mut task = hub75.begin_transaction().unwrap();
        assert!(hub75.is_running());
        assert!(hub75.begin_transaction().is_none());
        assert!(hub75.image_buffer_mut().is_none());
        assert_eq!(
            port.clock.get(),
            Some(ClockDivider::for_frequency(BASE_CLOCK_HZ, PREAMBLE_CLOCK_HZ))
        );
        let front = task.resources().unwrap().buffer(BufferId::Front);
        assert_eq!(front.column(7, 6).bits() & 0x3F, 0x3F);

        port.send_line(task.resources().unwrap().ring());
        handler.on_interrupt();
        assert!(block_on(task.prepare()));
        assert_eq!(
            port.clock.get(),
            Some(ClockDivider::for_frequency(BASE_CLOCK_HZ, 1_720_320))
        );

        for _ in 0..4 {
            port.send_line(task.resources().unwrap().ring());
            handler.on_interrupt();
            assert!(block_on(task.next_line()));
        }

        hub75.end_transaction();
        assert!(!port.running.get());
        assert!(!hub75.is_running());
        assert!(!block_on(task.next_line()));
        drop(task);

        block_on(hub75.release());
        assert!(hub75.interrupt_handler().is_none());
        assert!(hub75.begin_transaction().is_none());
        assert!(hub75.image_buffer_mut().is_some());
    }

    #[test]
    fn test_redraw_while_running() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut first = Frame::new();
        let mut second = Frame::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.set_image_buffer(&mut first);
        assert!(hub75.init());
        let handler = hub75.interrupt_handler().unwrap();
        let mut task = hub75.begin_transaction().unwrap();
        port.send_line(task.resources().unwrap().ring());
        handler.on_interrupt();
        assert!(block_on(task.prepare()));

        second.set_pixel(0, 1, Color::WHITE);
        frames.present(&mut second);
        // DMA finishes the front buffer; line 1 goes into it.
        port.send_line(task.resources().unwrap().ring());
        handler.on_interrupt();
        assert!(block_on(task.next_line()));
        let front = task.resources().unwrap().buffer(BufferId::Front);
        assert!((0..BUFFER_SLOT_COUNT).any(|slot| front.column(slot, 0).grn1()));

        let first = frames.try_take_back().expect("previous frame returned");
        first.set_pixel(0, 2, Color::RED);
        frames.present(first);

        // Line 2 comes from the frame redrawn after the refresh started.
        port.send_line(task.resources().unwrap().ring());
        handler.on_interrupt();
        assert!(block_on(task.next_line()));
        assert_eq!(task.line(), 2);
        let back = task.resources().unwrap().buffer(BufferId::Back);
        let column: Vec<_> = (0..BUFFER_SLOT_COUNT).map(|slot| back.column(slot, 0)).collect();
        assert!(column.iter().any(|word| word.red1()));
        assert!(column.iter().all(|word| !word.grn1() && !word.blu1()));

        let second = frames.try_take_back().expect("white frame returned");
        assert_eq!(second.get_pixel(0, 1), Color::WHITE);
        hub75.end_transaction();
        drop(task);
        block_on(hub75.release());
        assert_eq!(hub75.image_buffer_mut().unwrap().get_pixel(0, 2), Color::RED);
    }

    #[test]
    fn test_drop_while_running_stops_dma() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.set_image_buffer(&mut frame);
        assert!(hub75.init());

        let mut task = hub75.begin_transaction().unwrap();
        assert!(port.running.get());
        drop(hub75);
        assert!(!port.running.get());
        assert!(signals.is_stopping());
        assert!(!block_on(task.next_line()));
        drop(task);
        assert!(signals.try_reclaim().is_some());
    }

    #[test]
    fn test_drop_idle_leaves_port_alone() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.set_image_buffer(&mut frame);
        assert!(hub75.init());
        drop(hub75);
        assert!(!signals.is_stopping());
        assert_eq!(port.head.get(), 0);
    }

    #[test]
    fn test_restart_after_stop() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.set_image_buffer(&mut frame);
        assert!(hub75.init());

        let task = hub75.begin_transaction().unwrap();
        hub75.end_transaction();
        assert!(signals.is_stopping());
        // The task still holds the memory.
        assert!(hub75.begin_transaction().is_none());
        drop(task);

        let task = hub75.begin_transaction().unwrap();
        assert!(port.running.get());
        assert!(!signals.is_stopping());
        drop(task);
        block_on(hub75.release());
    }

    #[test]
    fn test_release_without_start() {
        let port = SimPort::default();
        let signals = RefreshSignals::new();
        let mut frame = Frame::new();
        let frames = FrameExchange::new();
        let mut hub75 = Hub75::new(&port, &signals, &frames);
        hub75.set_image_buffer(&mut frame);
        assert!(hub75.init());
        block_on(hub75.release());
        assert!(hub75.begin_transaction().is_none());
        assert!(hub75.init());
    }
}
