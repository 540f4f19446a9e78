/// Utility functions for rounding control quantities.
///
/// Rounds a floating-point number to the specified number of decimal places.
pub fn round_f64(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

/// Burn rates travel as tenths of mB/t; convert with explicit rounding
/// so `9.99999` commits as `100` tenths, not `99`.
pub fn mb_to_tenths(mb_per_tick: f64) -> u32 {
    if mb_per_tick <= 0.0 {
        return 0;
    }
    (mb_per_tick * 10.0).round() as u32
}

pub fn tenths_to_mb(tenths: u32) -> f64 {
    tenths as f64 / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_tenths() {
        assert_eq!(round_f64(1.2499, 1), 1.2);
        assert_eq!(round_f64(1.25, 1), 1.3);
        assert_eq!(round_f64(-0.04, 1), -0.0);
    }

    #[test]
    fn tenths_conversion() {
        assert_eq!(mb_to_tenths(10.0), 100);
        assert_eq!(mb_to_tenths(9.99999), 100);
        assert_eq!(mb_to_tenths(-1.0), 0);
        assert!((tenths_to_mb(45) - 4.5).abs() < 1e-12);
    }
}
