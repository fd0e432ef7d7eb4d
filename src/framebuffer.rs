//! Source frames for the refresh.
//!
//! The refresh only needs to read whole lines of native RGB565 pixels, which
//! is what [`FrameSource`] describes. [`Rgb565FrameBuffer`] is a plain in-RAM
//! implementation that `embedded-graphics` can draw into.

use core::convert::Infallible;

use embedded_graphics::draw_target::DrawTarget;
use embedded_graphics::geometry::OriginDimensions;
use embedded_graphics::geometry::Point;
use embedded_graphics::geometry::Size;
use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::pixelcolor::IntoStorage;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::Pixel;

/// Color type accepted by [`Rgb565FrameBuffer`].
pub type Color = Rgb565;

/// A frame the refresh can read line by line.
///
/// Lines hold `line_size()` pixels in native RGB565: red in bits 11..=15,
/// green in 5..=10, blue in 0..=4.
pub trait FrameSource {
    /// Pixels of line `index`. Must hold at least `line_size()` entries.
    fn line_buffer(&self, index: usize) -> &[u16];

    /// Pixels per line.
    fn line_size(&self) -> usize;

    /// Lines in the frame.
    fn total_lines(&self) -> usize;
}

impl<T: FrameSource + ?Sized> FrameSource for &T {
    fn line_buffer(&self, index: usize) -> &[u16] {
        (**self).line_buffer(index)
    }

    fn line_size(&self) -> usize {
        (**self).line_size()
    }

    fn total_lines(&self) -> usize {
        (**self).total_lines()
    }
}

/// Frame buffer of `COLS` x `ROWS` RGB565 pixels.
pub struct Rgb565FrameBuffer<const COLS: usize, const ROWS: usize> {
    data: [[u16; COLS]; ROWS],
}

impl<const COLS: usize, const ROWS: usize> Default for Rgb565FrameBuffer<COLS, ROWS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const COLS: usize, const ROWS: usize> Rgb565FrameBuffer<COLS, ROWS> {
    /// Create a new, black frame buffer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: [[0; COLS]; ROWS],
        }
    }

    /// Clear the frame buffer to black.
    pub fn clear(&mut self) {
        for row in &mut self.data {
            row.fill(0);
        }
    }

    /// Set a pixel in the frame buffer
    pub fn set_pixel(&mut self, x: usize, y: usize, color: Color) {
        self.data[y][x] = color.into_storage();
    }

    /// Get a pixel from the frame buffer
    #[must_use]
    pub fn get_pixel(&self, x: usize, y: usize) -> Color {
        Color::from(RawU16::new(self.data[y][x]))
    }

    /// Raw pixels of a row.
    #[must_use]
    pub fn get_row(&self, y: usize) -> &[u16; COLS] {
        &self.data[y]
    }
}

impl<const COLS: usize, const ROWS: usize> FrameSource for Rgb565FrameBuffer<COLS, ROWS> {
    fn line_buffer(&self, index: usize) -> &[u16] {
        &self.data[index]
    }

    fn line_size(&self) -> usize {
        COLS
    }

    fn total_lines(&self) -> usize {
        ROWS
    }
}

impl<const COLS: usize, const ROWS: usize> OriginDimensions for Rgb565FrameBuffer<COLS, ROWS> {
    fn size(&self) -> Size {
        Size::new(COLS as u32, ROWS as u32)
    }
}

impl<const COLS: usize, const ROWS: usize> DrawTarget for Rgb565FrameBuffer<COLS, ROWS> {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(Point { x, y }, color) in pixels {
            let (Ok(x), Ok(y)) = (usize::try_from(x), usize::try_from(y)) else {
                continue;
            };
            if x < COLS && y < ROWS {
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl<const COLS: usize, const ROWS: usize> defmt::Format for Rgb565FrameBuffer<COLS, ROWS> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Rgb565FrameBuffer<{}, {}>", COLS, ROWS);
    }
}

impl<const COLS: usize, const ROWS: usize> core::fmt::Debug for Rgb565FrameBuffer<COLS, ROWS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rgb565FrameBuffer")
            .field("cols", &COLS)
            .field("rows", &ROWS)
            .finish_non_exhaustive()
    }
}
