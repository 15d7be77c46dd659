use serde::{Deserialize, Serialize};

/// Linear raw-to-percent mapping between two ADC calibration endpoints.
///
/// `raw_min` maps to 0% and `raw_max` to 100%. The endpoints may be given in
/// either order: a resistive humidity probe reads a *lower* raw value when
/// wetter, so its scale runs from a high dry endpoint down to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentScale {
    pub raw_min: u16,
    pub raw_max: u16,
}

impl PercentScale {
    pub const fn new(raw_min: u16, raw_max: u16) -> Self {
        Self { raw_min, raw_max }
    }

    /// Position of `raw` within the calibrated span, as a percentage.
    ///
    /// The input is clamped into the endpoint range first, so the result is
    /// always within [0, 100]. A zero-width span is rejected up front by
    /// `CalibrationConfig::validate`.
    pub fn percent(&self, raw: u16) -> f32 {
        let low = self.raw_min.min(self.raw_max);
        let high = self.raw_min.max(self.raw_max);
        let clamped = raw.clamp(low, high);

        let span = f32::from(self.raw_max) - f32::from(self.raw_min);
        (f32::from(clamped) - f32::from(self.raw_min)) / span * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_gas_endpoints_linearly() {
        let scale = PercentScale::new(100, 3500);

        assert_eq!(scale.percent(100), 0.0);
        assert_eq!(scale.percent(3500), 100.0);
        assert_eq!(scale.percent(1800), 50.0);
    }

    #[test]
    fn reversed_endpoints_map_wet_to_full_scale() {
        let scale = PercentScale::new(4095, 0);

        assert_eq!(scale.percent(4095), 0.0);
        assert_eq!(scale.percent(0), 100.0);
    }

    #[test]
    fn clamps_raw_outside_the_span() {
        let gas = PercentScale::new(100, 3500);
        assert_eq!(gas.percent(0), 0.0);
        assert_eq!(gas.percent(4095), 100.0);

        let humidity = PercentScale::new(4095, 0);
        assert_eq!(humidity.percent(u16::MAX), 0.0);
    }

    #[test]
    fn output_stays_within_percent_range() {
        let scale = PercentScale::new(50, 800);

        for raw in (0..=4095).step_by(7) {
            let percent = scale.percent(raw);
            assert!(
                (0.0..=100.0).contains(&percent),
                "raw {raw} mapped to {percent}"
            );
        }
    }
}
