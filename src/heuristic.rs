//! Rule-based irrigation estimate and synthetic sensor logs
//!
//! The field logger labels every reading with a piecewise rule over
//! temperature and humidity. The same rule drives the synthetic generator,
//! which writes logs in the logger's own CSV layout.

use chrono::{Duration, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::data::SensorReading;
use crate::error::{PipelineError, PipelineResult};

/// Minutes added or removed by temperature band (°C).
pub fn temperature_factor(temperature: f64) -> f64 {
    if temperature < 15.0 {
        -2.0
    } else if temperature < 25.0 {
        0.0
    } else if temperature < 30.0 {
        3.0
    } else if temperature < 35.0 {
        5.0
    } else if temperature < 40.0 {
        15.0
    } else {
        48.0
    }
}

/// Minutes added or removed by relative humidity band (%).
pub fn humidity_factor(humidity: f64) -> f64 {
    if humidity > 80.0 {
        -8.0
    } else if humidity >= 60.0 {
        -6.0
    } else if humidity >= 40.0 {
        0.0
    } else if humidity >= 20.0 {
        3.0
    } else {
        5.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrrigationRule {
    pub base_minutes: f64,
    /// No irrigation at or above this humidity
    pub humidity_limit: f64,
}

impl Default for IrrigationRule {
    fn default() -> Self {
        Self {
            base_minutes: 1.0,
            humidity_limit: 40.0,
        }
    }
}

impl IrrigationRule {
    /// Band-adjusted minutes, floored at zero, ignoring the humidity limit.
    pub fn raw_minutes(&self, temperature: f64, humidity: f64) -> f64 {
        (self.base_minutes + temperature_factor(temperature) + humidity_factor(humidity)).max(0.0)
    }

    /// Minutes the logger records for one reading.
    pub fn minutes(&self, temperature: f64, humidity: f64) -> f64 {
        if humidity >= self.humidity_limit {
            0.0
        } else {
            self.raw_minutes(temperature, humidity)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub rows: usize,
    pub start: NaiveDateTime,
    pub interval_minutes: i64,
    pub seed: u64,
    /// Std deviation of temperature noise (°C)
    pub temperature_noise: f64,
    /// Std deviation of humidity noise (percentage points)
    pub humidity_noise: f64,
}

/// Seeded generator of logger-style readings with a daily temperature cycle
pub struct SyntheticLogGenerator {
    config: GeneratorConfig,
    rule: IrrigationRule,
    rng: StdRng,
    temperature_noise: Normal<f64>,
    humidity_noise: Normal<f64>,
}

impl SyntheticLogGenerator {
    pub fn new(config: GeneratorConfig, rule: IrrigationRule) -> PipelineResult<Self> {
        if config.interval_minutes <= 0 {
            return Err(PipelineError::Config(format!(
                "interval_minutes must be positive, got {}",
                config.interval_minutes
            )));
        }
        let noise = |std: f64| {
            Normal::new(0.0, std)
                .map_err(|e| PipelineError::Config(format!("invalid noise level {}: {}", std, e)))
        };
        Ok(Self {
            temperature_noise: noise(config.temperature_noise)?,
            humidity_noise: noise(config.humidity_noise)?,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            rule,
        })
    }

    fn reading_at(&mut self, timestamp: NaiveDateTime) -> SensorReading {
        let hour = timestamp.hour() as f64 + timestamp.minute() as f64 / 60.0;
        // Coolest near 03:00, warmest near 15:00
        let daily = (2.0 * PI * (hour - 9.0) / 24.0).sin();
        let temperature = 22.0 + 9.0 * daily + self.temperature_noise.sample(&mut self.rng);
        let humidity = (60.0 - 2.0 * (temperature - 22.0) + self.humidity_noise.sample(&mut self.rng))
            .clamp(5.0, 100.0);

        // DHT-style one decimal place
        let temperature = (temperature * 10.0).round() / 10.0;
        let humidity = (humidity * 10.0).round() / 10.0;

        SensorReading {
            timestamp,
            temperature: Some(temperature),
            humidity: Some(humidity),
            irrigation_minutes: Some(self.rule.minutes(temperature, humidity)),
        }
    }

    pub fn generate(&mut self) -> Vec<SensorReading> {
        let step = Duration::minutes(self.config.interval_minutes);
        let mut timestamp = self.config.start;
        let mut readings = Vec::with_capacity(self.config.rows);
        for _ in 0..self.config.rows {
            readings.push(self.reading_at(timestamp));
            timestamp += step;
        }
        readings
    }
}

#[derive(Serialize)]
struct LoggerRow {
    #[serde(rename = "temperatura")]
    temperature: Option<f64>,
    #[serde(rename = "humidade")]
    humidity: Option<f64>,
    #[serde(rename = "data")]
    timestamp: String,
    #[serde(rename = "rega_necessaria_min")]
    irrigation_minutes: Option<f64>,
}

/// Renders readings in the field logger's CSV layout.
pub fn to_logger_csv(readings: &[SensorReading]) -> PipelineResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for r in readings {
        writer.serialize(LoggerRow {
            temperature: r.temperature,
            humidity: r.humidity,
            timestamp: r.timestamp.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            irrigation_minutes: r.irrigation_minutes,
        })?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| PipelineError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::data::parse_sensor_csv;
    use chrono::NaiveDate;
    use rstest::rstest;

    #[rstest]
    #[case(10.0, -2.0)]
    #[case(15.0, 0.0)]
    #[case(24.9, 0.0)]
    #[case(25.0, 3.0)]
    #[case(30.0, 5.0)]
    #[case(35.0, 15.0)]
    #[case(40.0, 48.0)]
    fn test_temperature_bands(#[case] t: f64, #[case] factor: f64) {
        assert_eq!(temperature_factor(t), factor);
    }

    #[rstest]
    #[case(85.0, -8.0)]
    #[case(80.0, -6.0)]
    #[case(60.0, -6.0)]
    #[case(59.9, 0.0)]
    #[case(40.0, 0.0)]
    #[case(20.0, 3.0)]
    #[case(19.9, 5.0)]
    fn test_humidity_bands(#[case] h: f64, #[case] factor: f64) {
        assert_eq!(humidity_factor(h), factor);
    }

    #[rstest]
    #[case(32.0, 20.0, 9.0)]
    #[case(38.0, 10.0, 21.0)]
    #[case(10.0, 30.0, 2.0)]
    #[case(20.0, 70.0, 0.0)]
    #[case(45.0, 39.0, 52.0)]
    fn test_rule_minutes(#[case] t: f64, #[case] h: f64, #[case] minutes: f64) {
        assert_eq!(IrrigationRule::default().minutes(t, h), minutes);
    }

    #[test]
    fn test_raw_minutes_floor_at_zero() {
        assert_eq!(IrrigationRule::default().raw_minutes(5.0, 95.0), 0.0);
    }

    fn generator(seed: u64) -> SyntheticLogGenerator {
        SyntheticLogGenerator::new(
            GeneratorConfig {
                rows: 48,
                start: NaiveDate::from_ymd_opt(2025, 5, 16)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                interval_minutes: 60,
                seed,
                temperature_noise: 1.5,
                humidity_noise: 5.0,
            },
            IrrigationRule::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_generator_is_seeded_and_labelled() {
        let a = generator(7).generate();
        let b = generator(7).generate();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
        for r in &a {
            let (t, h) = (r.temperature.unwrap(), r.humidity.unwrap());
            assert_eq!(r.irrigation_minutes, Some(IrrigationRule::default().minutes(t, h)));
            assert!((5.0..=100.0).contains(&h));
        }
        assert_eq!(a[1].timestamp - a[0].timestamp, Duration::hours(1));
    }

    #[test]
    fn test_logger_csv_reads_back() {
        let readings = generator(3).generate();
        let text = to_logger_csv(&readings).unwrap();
        assert!(text.starts_with("temperatura,humidade,data,rega_necessaria_min\n"));

        let formats = Config::default().data.timestamp_formats;
        let (parsed, has_label) = parse_sensor_csv(&text, &formats, "synthetic").unwrap();
        assert!(has_label);
        assert_eq!(parsed, readings);
    }

    #[test]
    fn test_rejects_bad_interval() {
        let mut config = generator(1).config.clone();
        config.interval_minutes = 0;
        assert!(SyntheticLogGenerator::new(config, IrrigationRule::default()).is_err());
    }
}
