//! Continuous BCM refresh of a 64x32 HUB75 panel from the I2S peripheral of
//! an `esp32`.
//!
//! Keeps the panel refreshed from an interrupt executor while the main task
//! animates a square over color ramps, swapping frames with the refresh, and
//! slowly cycles the brightness.
//!
//! Folowing pins are used:
//! - R1  => GPIO16
//! - G1  => GPIO4
//! - B1  => GPIO17
//! - R2  => GPIO18
//! - G2  => GPIO5
//! - B2  => GPIO19
//! - A   => GPIO15
//! - B   => GPIO13
//! - C   => GPIO12
//! - D   => GPIO14
//! - E   => GPIO2
//! - OE  => GPIO25
//! - CLK => GPIO27
//! - LAT => GPIO26
//!
//! Note that you most likely need level converters 3.3v to 5v for all HUB75
//! signals
#![no_std]
#![no_main]

use core::cell::Cell;

use critical_section::Mutex;
use embassy_executor::task;
use embassy_executor::Spawner;
use embassy_time::Duration;
use embassy_time::Timer;
use embedded_graphics::geometry::Point;
use embedded_graphics::geometry::Size;
use embedded_graphics::mono_font::ascii::FONT_5X7;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::primitives::Primitive;
use embedded_graphics::primitives::PrimitiveStyle;
use embedded_graphics::primitives::Rectangle;
use embedded_graphics::text::Text;
use embedded_graphics::Drawable;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::interrupt::InterruptHandler as IsrHandler;
use esp_hal::interrupt::Priority;
use esp_hal::system::CpuControl;
use esp_hal::system::Stack;
use esp_hal::timer::timg::TimerGroup;
use esp_hal_embassy::Executor;
use esp_hal_embassy::InterruptExecutor;
use esp_hub75_bcm::refresh::InterruptHandler;
use esp_hub75_bcm::refresh::RefreshTask;
use esp_hub75_bcm::Config;
use esp_hub75_bcm::FrameExchange;
use esp_hub75_bcm::Hub75;
use esp_hub75_bcm::Hub75Pins16;
use esp_hub75_bcm::I2sParallelPort;
use esp_hub75_bcm::RefreshSignals;
use esp_hub75_bcm::Rgb565FrameBuffer;
use log::info;

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

const COLS: usize = 64;
const ROWS: usize = 32;
const HEAP_SIZE: usize = 32 * 1024;
const APP_CORE_STACK_SIZE: usize = 8192;

type Port = I2sParallelPort<'static>;
type Frame = Rgb565FrameBuffer<COLS, ROWS>;

static SIGNALS: RefreshSignals = RefreshSignals::new();
static FRAMES: FrameExchange<'static, Frame> = FrameExchange::new();
static HANDLER: Mutex<Cell<Option<InterruptHandler<'static, Port>>>> =
    Mutex::new(Cell::new(None));

#[esp_hal::handler]
#[esp_hal::ram]
fn on_i2s() {
    let handler = critical_section::with(|cs| HANDLER.borrow(cs).get());
    if let Some(handler) = handler {
        handler.on_interrupt();
    }
}

#[task]
async fn refresh_task(task: RefreshTask<'static, Port, Frame>) {
    info!("refresh_task: starting!");
    task.run().await;
    info!("refresh_task: done");
}

fn executor_priority(level: u8) -> Priority {
    match level {
        0 | 1 => Priority::Priority1,
        2 => Priority::Priority2,
        _ => Priority::Priority3,
    }
}

fn draw(fb: &mut Frame, step: usize) {
    const STEP: u8 = (256 / COLS) as u8;
    fb.clear();
    for x in 0..COLS {
        let level = (x as u8) * STEP;
        for y in 0..8 {
            fb.set_pixel(x, y, Rgb565::new(level >> 3, 0, 0));
        }
        for y in 8..16 {
            fb.set_pixel(x, y, Rgb565::new(0, level >> 2, 0));
        }
        for y in 16..24 {
            fb.set_pixel(x, y, Rgb565::new(0, 0, level >> 3));
        }
    }
    // Bounce a square across the ramps.
    let span = COLS - 8;
    let x = if (step / span) % 2 == 0 {
        step % span
    } else {
        span - step % span
    };
    Rectangle::new(Point::new(x as i32, 4), Size::new(8, 16))
        .into_styled(PrimitiveStyle::with_fill(Rgb565::WHITE))
        .draw(fb)
        .unwrap();
    let style = MonoTextStyle::new(&FONT_5X7, Rgb565::YELLOW);
    Text::new("HUB75 BCM", Point::new(1, 30), style)
        .draw(fb)
        .unwrap();
}

#[esp_hal_embassy::main]
async fn main(_spawner: Spawner) {
    esp_println::logger::init_logger(log::LevelFilter::Info);
    info!("Main starting!");
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(size: HEAP_SIZE);

    let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    let software_interrupt = sw_ints.software_interrupt2;

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    info!("init embassy");
    esp_hal_embassy::init(timg0.timer0);

    let fb = mk_static!(Frame, Frame::new());
    draw(fb, 0);
    let mut back = mk_static!(Frame, Frame::new());

    let pins: Hub75Pins16 = Hub75Pins16 {
        red1: peripherals.GPIO16.into(),
        grn1: peripherals.GPIO4.into(),
        blu1: peripherals.GPIO17.into(),
        red2: peripherals.GPIO18.into(),
        grn2: peripherals.GPIO5.into(),
        blu2: peripherals.GPIO19.into(),
        addr0: peripherals.GPIO15.into(),
        addr1: peripherals.GPIO13.into(),
        addr2: peripherals.GPIO12.into(),
        addr3: peripherals.GPIO14.into(),
        addr4: peripherals.GPIO2.into(),
        blank: peripherals.GPIO25.into(),
        clock: peripherals.GPIO27.into(),
        latch: peripherals.GPIO26.into(),
    };
    let port = mk_static!(
        Port,
        I2sParallelPort::new(
            peripherals.I2S0,
            peripherals.DMA_I2S0,
            pins,
            IsrHandler::new(on_i2s, Priority::Priority3),
        )
    );
    let port: &'static Port = port;

    let mut hub75 = Hub75::new(port, &SIGNALS, &FRAMES);
    hub75.configure(Config::default().with_refresh_rate(120).with_brightness(96));
    hub75.set_image_buffer(fb);
    if !hub75.init() {
        panic!("hub75 init failed");
    }
    let handler = hub75.interrupt_handler();
    critical_section::with(|cs| HANDLER.borrow(cs).set(handler));

    let priority = executor_priority(hub75.config().task_priority);
    let task = hub75
        .begin_transaction()
        .expect("refresh did not start");

    let mut cpu_control = CpuControl::new(peripherals.CPU_CTRL);
    let _guard = if hub75.config().task_core == Some(1) {
        info!("refresh on the app core");
        let app_core_stack = mk_static!(Stack<APP_CORE_STACK_SIZE>, Stack::new());
        let cpu1_fnctn = move || {
            let hp_executor = mk_static!(
                InterruptExecutor<2>,
                InterruptExecutor::new(software_interrupt)
            );
            hp_executor.start(priority).spawn(refresh_task(task)).ok();
            let lp_executor = mk_static!(Executor, Executor::new());
            lp_executor.run(|_| {});
        };
        Some(
            cpu_control
                .start_app_core(app_core_stack, cpu1_fnctn)
                .unwrap(),
        )
    } else {
        let hp_executor = mk_static!(
            InterruptExecutor<2>,
            InterruptExecutor::new(software_interrupt)
        );
        hp_executor.start(priority).spawn(refresh_task(task)).ok();
        None
    };

    let mut level = hub75.brightness();
    let mut rising = true;
    let mut step = 0;
    loop {
        step += 1;
        draw(back, step);
        back = FRAMES.swap(back).await;
        Timer::after(Duration::from_millis(30)).await;
        match (rising, level) {
            (true, 255) => rising = false,
            (false, 16) => rising = true,
            (true, _) => level += 1,
            (false, _) => level -= 1,
        }
        hub75.set_brightness(level);
    }
}
