//! Bus clock divisor.
//!
//! The I2S module clock is derived from an 80 MHz base as
//! `base / (n + b / a)` with an 8-bit integer part and 6-bit fractional
//! numerator and denominator.

use bitfield::bitfield;

/// Base clock feeding the bus clock divider.
pub const BASE_CLOCK_HZ: u32 = 80_000_000;

/// Rate used while the panel driver registers are written.
pub const PREAMBLE_CLOCK_HZ: u32 = 400_000;

const MAX_INTEGER: u32 = 255;
const MAX_FRACTION: u32 = 63;
/// Below this divisor the fractional part is not applied.
const MIN_FRACTIONAL_INTEGER: u32 = 4;

bitfield! {
    /// Module clock configuration register value.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ClockRegister(u32);
    impl Debug;
    /// Enables the divided clock.
    pub clk_en, set_clk_en: 20;
    /// Fractional denominator.
    pub div_a, set_div_a: 19, 14;
    /// Fractional numerator.
    pub div_b, set_div_b: 13, 8;
    /// Integer divisor.
    pub div_num, set_div_num: 7, 0;
}

#[cfg(feature = "defmt")]
impl defmt::Format for ClockRegister {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ClockRegister({=u32:#x})", self.0)
    }
}

/// Integer plus fractional divisor of the base clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider {
    /// Integer part.
    pub n: u32,
    /// Fractional denominator.
    pub a: u32,
    /// Fractional numerator.
    pub b: u32,
}

impl ClockDivider {
    /// Closest divider of `base` that produces `target`.
    ///
    /// The fraction `b / a` is reduced and then scaled down until `a` fits
    /// its 6-bit field. Divisors of 4 or less, and divisors clamped at 255,
    /// use no fraction.
    #[must_use]
    pub fn for_frequency(base: u32, target: u32) -> Self {
        let target = target.max(1);
        let n = (base / target).clamp(1, MAX_INTEGER);
        let mut a = 1;
        let mut b = 0;

        let delta = base.saturating_sub(target.saturating_mul(n));
        if n > MIN_FRACTIONAL_INTEGER && n < MAX_INTEGER && delta != 0 {
            let g = gcd(target, delta);
            a = target / g;
            b = delta / g;
            let d = a / MAX_FRACTION + 1;
            a /= d;
            b /= d;
        }
        Self { n, a, b }
    }

    /// Frequency this divider produces from `base`.
    #[must_use]
    pub fn frequency(&self, base: u32) -> u32 {
        let a = u64::from(self.a.max(1));
        let divisor = u64::from(self.n) * a + u64::from(self.b);
        (u64::from(base) * a / divisor.max(1)) as u32
    }

    /// Register value with the clock enabled.
    #[must_use]
    pub fn register(&self) -> ClockRegister {
        let mut reg = ClockRegister(0);
        reg.set_clk_en(true);
        reg.set_div_num(self.n);
        reg.set_div_a(self.a);
        reg.set_div_b(self.b);
        reg
    }
}

fn gcd(mut x: u32, mut y: u32) -> u32 {
    while y != 0 {
        let r = x % y;
        x = y;
        y = r;
    }
    x.max(1)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_even_division_has_no_fraction() {
        let div = ClockDivider::for_frequency(BASE_CLOCK_HZ, 10_000_000);
        assert_eq!(div, ClockDivider { n: 8, a: 1, b: 0 });
        assert_eq!(div.frequency(BASE_CLOCK_HZ), 10_000_000);
    }

    #[test]
    fn test_preamble_clock() {
        let div = ClockDivider::for_frequency(BASE_CLOCK_HZ, PREAMBLE_CLOCK_HZ);
        assert_eq!(div, ClockDivider { n: 200, a: 1, b: 0 });
    }

    #[test]
    fn test_small_divisor_skips_fraction() {
        let div = ClockDivider::for_frequency(BASE_CLOCK_HZ, 19_000_000);
        assert_eq!(div.n, 4);
        assert_eq!((div.a, div.b), (1, 0));
    }

    #[test]
    fn test_fractional_divider() {
        let div = ClockDivider::for_frequency(BASE_CLOCK_HZ, 1_234_567);
        assert_eq!(div, ClockDivider { n: 64, a: 62, b: 50 });
    }

    #[test]
    fn test_fraction_within_rounding_bound() {
        for target in [
            1_000_003u32,
            1_234_567,
            1_720_320,
            2_150_400,
            3_333_333,
            5_000_001,
            7_777_777,
            12_345_678,
        ] {
            let div = ClockDivider::for_frequency(BASE_CLOCK_HZ, target);
            assert!(div.a <= MAX_FRACTION && div.b <= MAX_FRACTION, "{div:?}");
            assert!(div.b <= div.a, "{div:?}");
            let actual = div.frequency(BASE_CLOCK_HZ);
            let error = (f64::from(actual) - f64::from(target)).abs() / f64::from(target);
            assert!(
                error <= 1.0 / (8.0 * f64::from(div.n)),
                "target {target} got {actual} with {div:?}"
            );
        }
    }

    #[test]
    fn test_scaled_fraction_keeps_denominator() {
        // Coprime targets give the largest denominators before scaling.
        for target in (1_000_001u32..1_000_401).chain(3_999_601..4_000_001) {
            let div = ClockDivider::for_frequency(BASE_CLOCK_HZ, target);
            assert!(div.a >= 1 && div.a <= MAX_FRACTION, "{div:?}");
            assert!(div.b <= div.a, "{div:?}");
        }
    }

    #[test]
    fn test_slow_target_clamps_integer() {
        let div = ClockDivider::for_frequency(BASE_CLOCK_HZ, 100_000);
        assert_eq!(div, ClockDivider { n: 255, a: 1, b: 0 });
    }

    #[test]
    fn test_register_layout() {
        let reg = ClockDivider { n: 64, a: 62, b: 50 }.register();
        assert_eq!(reg.0, 1 << 20 | 62 << 14 | 50 << 8 | 64);
        assert!(reg.clk_en());
        assert_eq!(reg.div_num(), 64);
    }
}
