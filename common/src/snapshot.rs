use serde::Serialize;

use crate::config::CalibrationConfig;

/// Average reported when no probe on either one-wire bus produced a reading.
/// Preserved verbatim for compatibility with existing consumers.
pub const AVG_TEMP_DISCONNECTED_C: f32 = -999.0;

/// Raw channel values captured in a single pass over the sensor suite.
///
/// A `None` temperature means the probe on that bus was absent or failed to
/// answer; the analog channels always carry a raw ADC count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSample {
    pub temp1_c: Option<f32>,
    pub temp2_c: Option<f32>,
    pub mq1_raw: u16,
    pub mq2_raw: u16,
    pub humidity1_raw: u16,
    pub humidity2_raw: u16,
}

/// Fixed-shape payload served for every snapshot request.
///
/// Field presence never varies: a disconnected probe serializes as `null`,
/// never as a missing key or an error response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReadingSnapshot {
    #[serde(rename = "temp1_C")]
    pub temp1_c: Option<f32>,
    #[serde(rename = "temp2_C")]
    pub temp2_c: Option<f32>,
    #[serde(rename = "avg_temp_C")]
    pub avg_temp_c: f32,
    pub mq1_raw: u16,
    pub mq1_percent: f32,
    pub mq2_raw: u16,
    pub mq2_percent: f32,
    pub humidity1_raw: u16,
    pub humidity1_percent: f32,
    pub humidity2_raw: u16,
    pub humidity2_percent: f32,
    pub avg_humidity: f32,
    pub timestamp_ms: u64,
}

impl ReadingSnapshot {
    pub fn build(sample: &SensorSample, calibration: &CalibrationConfig, timestamp_ms: u64) -> Self {
        let mut temp_sum = 0.0_f32;
        let mut temp_count = 0_u32;
        for temp in [sample.temp1_c, sample.temp2_c].into_iter().flatten() {
            temp_sum += temp;
            temp_count += 1;
        }
        let avg_temp_c = if temp_count > 0 {
            temp_sum / temp_count as f32
        } else {
            AVG_TEMP_DISCONNECTED_C
        };

        let mq1_percent = calibration.mq1.percent(sample.mq1_raw);
        let mq2_percent = calibration.mq2.percent(sample.mq2_raw);
        let humidity1_percent = calibration.humidity.percent(sample.humidity1_raw);
        let humidity2_percent = calibration.humidity.percent(sample.humidity2_raw);
        let avg_humidity = (humidity1_percent + humidity2_percent) / 2.0;

        Self {
            temp1_c: sample.temp1_c,
            temp2_c: sample.temp2_c,
            avg_temp_c,
            mq1_raw: sample.mq1_raw,
            mq1_percent,
            mq2_raw: sample.mq2_raw,
            mq2_percent,
            humidity1_raw: sample.humidity1_raw,
            humidity1_percent,
            humidity2_raw: sample.humidity2_raw,
            humidity2_percent,
            avg_humidity,
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> SensorSample {
        SensorSample {
            temp1_c: Some(21.5),
            temp2_c: Some(20.5),
            mq1_raw: 1800,
            mq2_raw: 425,
            humidity1_raw: 4095,
            humidity2_raw: 0,
        }
    }

    #[test]
    fn averages_both_connected_probes() {
        let snapshot = ReadingSnapshot::build(&sample(), &CalibrationConfig::default(), 1_000);

        assert_eq!(snapshot.avg_temp_c, 21.0);
        assert_eq!(snapshot.temp1_c, Some(21.5));
        assert_eq!(snapshot.temp2_c, Some(20.5));
    }

    #[test]
    fn single_probe_average_equals_that_probe() {
        let mut one_probe = sample();
        one_probe.temp1_c = None;

        let snapshot = ReadingSnapshot::build(&one_probe, &CalibrationConfig::default(), 1_000);

        assert_eq!(snapshot.temp1_c, None);
        assert_eq!(snapshot.avg_temp_c, 20.5);
    }

    #[test]
    fn disconnected_probes_report_sentinel_average() {
        let mut no_probes = sample();
        no_probes.temp1_c = None;
        no_probes.temp2_c = None;

        let snapshot = ReadingSnapshot::build(&no_probes, &CalibrationConfig::default(), 1_000);

        assert_eq!(snapshot.avg_temp_c, AVG_TEMP_DISCONNECTED_C);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["temp1_C"], serde_json::Value::Null);
        assert_eq!(value["temp2_C"], serde_json::Value::Null);
        assert_eq!(value["avg_temp_C"], serde_json::json!(-999.0));
    }

    #[test]
    fn scales_analog_channels_and_averages_humidity() {
        let snapshot = ReadingSnapshot::build(&sample(), &CalibrationConfig::default(), 1_000);

        assert_eq!(snapshot.mq1_percent, 50.0);
        assert_eq!(snapshot.mq2_percent, 50.0);
        assert_eq!(snapshot.humidity1_percent, 0.0);
        assert_eq!(snapshot.humidity2_percent, 100.0);
        assert_eq!(snapshot.avg_humidity, 50.0);
    }

    #[test]
    fn serializes_the_fixed_field_set() {
        let snapshot = ReadingSnapshot::build(&sample(), &CalibrationConfig::default(), 42);
        let value = serde_json::to_value(&snapshot).unwrap();

        let mut keys: Vec<_> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();

        assert_eq!(
            keys,
            vec![
                "avg_humidity",
                "avg_temp_C",
                "humidity1_percent",
                "humidity1_raw",
                "humidity2_percent",
                "humidity2_raw",
                "mq1_percent",
                "mq1_raw",
                "mq2_percent",
                "mq2_raw",
                "temp1_C",
                "temp2_C",
                "timestamp_ms",
            ]
        );
        assert_eq!(value["timestamp_ms"], serde_json::json!(42));
    }

    #[test]
    fn field_set_is_identical_when_sensors_fail() {
        let healthy = ReadingSnapshot::build(&sample(), &CalibrationConfig::default(), 0);
        let degraded = ReadingSnapshot::build(
            &SensorSample::default(),
            &CalibrationConfig::default(),
            0,
        );

        let healthy_keys: Vec<_> = serde_json::to_value(&healthy)
            .unwrap()
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        let degraded_keys: Vec<_> = serde_json::to_value(&degraded)
            .unwrap()
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();

        assert_eq!(healthy_keys, degraded_keys);
    }
}
