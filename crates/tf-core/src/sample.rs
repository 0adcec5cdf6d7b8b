//! Sample types and level conversions

/// Type alias for internal DSP samples (always f64 for maximum precision)
pub type Sample = f64;

/// Magnitude floor applied before dB conversion to avoid -inf
pub const MAG_FLOOR: f64 = 1e-10;

/// Convert a linear magnitude to decibels re 1.0
///
/// Magnitudes are clipped to [`MAG_FLOOR`] so silence maps to a finite
/// floor (-200 dB) instead of -inf.
#[inline]
pub fn linear_to_db(magnitude: f64) -> f64 {
    20.0 * magnitude.max(MAG_FLOOR).log10()
}

/// Convert decibels to a linear magnitude
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_round_trip() {
        for db in [-60.0, -12.0, 0.0, 6.0] {
            let linear = db_to_linear(db);
            assert!((linear_to_db(linear) - db).abs() < 1e-9);
        }
    }

    #[test]
    fn test_db_floor_is_finite() {
        assert!(linear_to_db(0.0).is_finite());
        assert_eq!(linear_to_db(0.0), linear_to_db(MAG_FLOOR));
    }
}
