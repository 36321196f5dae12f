//! Feature engineering for irrigation models
//!
//! Turns parsed sensor readings into a model-ready [`Table`]: calendar parts,
//! their cyclical sin/cos encodings and, when weather observations are
//! available, fused weather fields with derived indices.

use chrono::{Datelike, Duration, Timelike};
use std::f64::consts::PI;
use tracing::{info, warn};

use crate::data::{SensorLog, SensorReading, Table, WeatherObservation};
use crate::error::{PipelineError, PipelineResult};

pub mod selection;
pub mod weather;

pub use selection::{FeatureSet, FeatureSpec, PreparedData};
pub use weather::{FusionOutcome, WeatherFuser};

pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";
pub const LABEL: &str = "irrigation_minutes";

pub const YEAR: &str = "ano";
pub const MONTH: &str = "mes";
pub const DAY: &str = "dia";
pub const HOUR: &str = "hora";

pub const MONTH_PERIOD: f64 = 12.0;
pub const DAY_PERIOD: f64 = 31.0;
pub const HOUR_PERIOD: f64 = 24.0;

/// Cyclical (sin, cos) encoding of `unit` on a circle of length `period`.
///
/// The unit is reduced modulo the period first, so `unit` and
/// `unit + k * period` encode to bit-identical pairs.
pub fn cyclical(unit: f64, period: f64) -> (f64, f64) {
    let angle = 2.0 * PI * unit.rem_euclid(period) / period;
    (angle.sin(), angle.cos())
}

fn push_cyclical(
    table: &mut Table,
    prefix: &str,
    units: &[f64],
    period: f64,
) -> PipelineResult<()> {
    let (sin, cos): (Vec<f64>, Vec<f64>) = units.iter().map(|&u| cyclical(u, period)).unzip();
    table.insert_dense(format!("{}_sin", prefix), sin)?;
    table.insert_dense(format!("{}_cos", prefix), cos)?;
    Ok(())
}

/// Builds the sensor part of the engineered table.
///
/// The timestamp is kept as the table's row key; the label column is only
/// present when `with_label` is set.
pub fn engineer_readings(readings: &[SensorReading], with_label: bool) -> PipelineResult<Table> {
    if readings.is_empty() {
        return Err(PipelineError::InsufficientData(
            "no sensor readings to engineer".to_string(),
        ));
    }

    let mut table = Table::new(readings.iter().map(|r| r.timestamp).collect());
    table.insert_column(TEMPERATURE, readings.iter().map(|r| r.temperature).collect())?;
    table.insert_column(HUMIDITY, readings.iter().map(|r| r.humidity).collect())?;
    if with_label {
        table.insert_column(LABEL, readings.iter().map(|r| r.irrigation_minutes).collect())?;
    }

    let ts = table.timestamps().to_vec();
    let months: Vec<f64> = ts.iter().map(|t| t.month() as f64).collect();
    let days: Vec<f64> = ts.iter().map(|t| t.day() as f64).collect();
    let hours: Vec<f64> = ts.iter().map(|t| t.hour() as f64).collect();

    table.insert_dense(YEAR, ts.iter().map(|t| t.year() as f64).collect())?;
    table.insert_dense(MONTH, months.clone())?;
    table.insert_dense(DAY, days.clone())?;
    table.insert_dense(HOUR, hours.clone())?;

    push_cyclical(&mut table, MONTH, &months, MONTH_PERIOD)?;
    push_cyclical(&mut table, DAY, &days, DAY_PERIOD)?;
    push_cyclical(&mut table, HOUR, &hours, HOUR_PERIOD)?;

    Ok(table)
}

/// Engineered table and whether weather columns were fused into it
#[derive(Debug, Clone)]
pub struct Engineered {
    pub table: Table,
    pub weather_fused: bool,
}

/// Feature engineer with optional weather fusion
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    fuser: WeatherFuser,
}

impl FeatureEngineer {
    pub fn new(fusion_tolerance: Duration) -> Self {
        Self {
            fuser: WeatherFuser::new(fusion_tolerance),
        }
    }

    pub fn engineer(
        &self,
        log: &SensorLog,
        weather: Option<&[WeatherObservation]>,
    ) -> PipelineResult<Table> {
        Ok(self.engineer_with_status(log, weather)?.table)
    }

    /// Like [`engineer`](Self::engineer), also reporting whether any weather
    /// observation was fused in.
    pub fn engineer_with_status(
        &self,
        log: &SensorLog,
        weather: Option<&[WeatherObservation]>,
    ) -> PipelineResult<Engineered> {
        let table = engineer_readings(&log.readings, log.has_label)?;
        match weather {
            Some(observations) => {
                let outcome = self.fuser.fuse(&table, observations)?;
                if outcome.matched == 0 {
                    warn!(
                        rows = outcome.table.len(),
                        observations = observations.len(),
                        "no sensor row has weather within tolerance, running sensor-only"
                    );
                    return Ok(Engineered {
                        table: outcome.table,
                        weather_fused: false,
                    });
                }
                let unmatched = outcome.table.len() - outcome.matched;
                if unmatched > 0 {
                    warn!(
                        unmatched,
                        matched = outcome.matched,
                        "sensor rows without weather within tolerance"
                    );
                }
                info!(
                    rows = outcome.table.len(),
                    columns = outcome.table.columns().len(),
                    "features engineered with weather"
                );
                Ok(Engineered {
                    table: outcome.table,
                    weather_fused: true,
                })
            }
            None => {
                info!(
                    rows = table.len(),
                    columns = table.columns().len(),
                    "features engineered"
                );
                Ok(Engineered {
                    table,
                    weather_fused: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn reading(ts: NaiveDateTime, t: f64, h: f64, label: f64) -> SensorReading {
        SensorReading {
            timestamp: ts,
            temperature: Some(t),
            humidity: Some(h),
            irrigation_minutes: Some(label),
        }
    }

    #[test]
    fn test_engineered_columns() {
        let readings = vec![
            reading(at(2025, 5, 16, 3), 20.0, 70.0, 4.0),
            reading(at(2025, 12, 31, 23), 32.0, 20.0, 22.0),
        ];
        let table = engineer_readings(&readings, true).unwrap();

        assert_eq!(
            table.column_names(),
            vec![
                "temperature", "humidity", "irrigation_minutes", "ano", "mes", "dia", "hora",
                "mes_sin", "mes_cos", "dia_sin", "dia_cos", "hora_sin", "hora_cos",
            ]
        );
        assert_eq!(table.column(YEAR).unwrap(), &[Some(2025.0), Some(2025.0)]);
        assert_eq!(table.column(HOUR).unwrap(), &[Some(3.0), Some(23.0)]);
        assert_eq!(table.timestamps()[0], at(2025, 5, 16, 3));
    }

    #[test]
    fn test_without_label() {
        let readings = vec![reading(at(2025, 1, 1, 0), 10.0, 50.0, 0.0)];
        let table = engineer_readings(&readings, false).unwrap();
        assert!(!table.has_column(LABEL));
    }

    #[test]
    fn test_empty_readings_rejected() {
        assert!(matches!(
            engineer_readings(&[], true),
            Err(PipelineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_weather_status_follows_matches() {
        let log = SensorLog {
            readings: vec![reading(at(2025, 5, 16, 3), 20.0, 70.0, 4.0)],
            has_label: true,
            sources: vec![],
        };
        let engineer = FeatureEngineer::new(Duration::hours(1));
        let near = WeatherObservation {
            timestamp: at(2025, 5, 16, 4),
            temperature: Some(18.0),
            ..Default::default()
        };
        let far = WeatherObservation {
            timestamp: at(2025, 5, 17, 4),
            ..near.clone()
        };

        let fused = engineer.engineer_with_status(&log, Some(&[near][..])).unwrap();
        assert!(fused.weather_fused);
        assert!(fused.table.has_column(weather::TEMPERATURE_WEATHER));

        let missed = engineer.engineer_with_status(&log, Some(&[far][..])).unwrap();
        assert!(!missed.weather_fused);
        assert!(missed.table.has_column(TEMPERATURE));
        assert!(!missed.table.has_column(weather::PRECIPITATION));

        let plain = engineer.engineer_with_status(&log, None).unwrap();
        assert!(!plain.weather_fused);
    }

    #[test]
    fn test_december_close_to_january() {
        let (s12, c12) = cyclical(12.0, MONTH_PERIOD);
        let (s1, c1) = cyclical(1.0, MONTH_PERIOD);
        let (s6, c6) = cyclical(6.0, MONTH_PERIOD);
        let near = ((s12 - s1).powi(2) + (c12 - c1).powi(2)).sqrt();
        let far = ((s12 - s6).powi(2) + (c12 - c6).powi(2)).sqrt();
        assert!(near < far);
    }

    #[test]
    fn test_cyclical_pairs_co_occur() {
        let readings = vec![reading(at(2024, 2, 29, 12), 25.0, 45.0, 1.0)];
        let table = engineer_readings(&readings, true).unwrap();
        for unit in [MONTH, DAY, HOUR] {
            assert!(table.has_column(&format!("{unit}_sin")));
            assert!(table.has_column(&format!("{unit}_cos")));
        }
    }

    proptest! {
        #[test]
        fn prop_hour_encoding_is_periodic(h in 0u32..10_000) {
            let h = h as f64;
            prop_assert_eq!(cyclical(h, HOUR_PERIOD), cyclical(h % 24.0, HOUR_PERIOD));
        }

        #[test]
        fn prop_month_and_day_encoding_are_periodic(u in 0u32..10_000) {
            let u = u as f64;
            prop_assert_eq!(cyclical(u, MONTH_PERIOD), cyclical(u % 12.0, MONTH_PERIOD));
            prop_assert_eq!(cyclical(u, DAY_PERIOD), cyclical(u % 31.0, DAY_PERIOD));
        }

        #[test]
        fn prop_encoding_on_unit_circle(u in 0.0f64..1000.0) {
            let (s, c) = cyclical(u, HOUR_PERIOD);
            prop_assert!((s * s + c * c - 1.0).abs() < 1e-12);
        }
    }
}
