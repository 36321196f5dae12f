//! Nearest-timestamp fusion of weather observations into sensor rows
//!
//! Each sensor row gets the closest weather observation whose timestamp is
//! within the tolerance (inclusive). Rows without such an observation keep
//! their weather fields missing; no sensor row is ever dropped. On equal
//! distance the earlier observation wins, and among observations sharing a
//! timestamp the first one in input order wins.

use chrono::{Duration, NaiveDateTime};

use super::TEMPERATURE;
use crate::data::{Table, WeatherObservation};
use crate::error::PipelineResult;

pub const TEMPERATURE_SENSOR: &str = "temperature_sensor";
pub const TEMPERATURE_WEATHER: &str = "temperature_weather";
pub const HUMIDITY_WEATHER: &str = "humidity_weather";
pub const BAROMETRIC_PRESSURE: &str = "barometric_pressure";
pub const PRECIPITATION: &str = "precipitation";
pub const SOLAR_RADIATION: &str = "solar_radiation";
pub const UV_INDEX: &str = "uv_index";
pub const WIND_DIRECTION: &str = "wind_direction";
pub const WIND_SPEED: &str = "wind_speed";
pub const EVAP_PROXY: &str = "evap_proxy";
pub const WEATHER_STRESS: &str = "weather_stress";

/// Fused table plus how many rows found a weather match
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub table: Table,
    pub matched: usize,
}

#[derive(Debug, Clone)]
pub struct WeatherFuser {
    tolerance: Duration,
}

impl Default for WeatherFuser {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}

/// Index of the observation nearest to `target` within `tolerance`.
///
/// `sorted` must be ascending. Equal distance resolves to the earlier
/// timestamp; duplicates resolve to the first of the run.
pub fn nearest_within(
    sorted: &[NaiveDateTime],
    target: NaiveDateTime,
    tolerance: Duration,
) -> Option<usize> {
    let after = sorted.partition_point(|&t| t < target);

    let before = if after > 0 {
        let ts = sorted[after - 1];
        Some(sorted.partition_point(|&t| t < ts))
    } else {
        None
    };
    let after = (after < sorted.len()).then_some(after);

    let pick = match (before, after) {
        (Some(b), Some(a)) => {
            if target - sorted[b] <= sorted[a] - target {
                b
            } else {
                a
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    let distance = if sorted[pick] <= target {
        target - sorted[pick]
    } else {
        sorted[pick] - target
    };
    (distance <= tolerance).then_some(pick)
}

fn column_of(
    matches: &[Option<&WeatherObservation>],
    get: fn(&WeatherObservation) -> Option<f64>,
) -> Vec<Option<f64>> {
    matches.iter().map(|m| m.and_then(get)).collect()
}

fn indicator(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// `temperature_weather * 0.5 - precipitation * 5`
pub fn evap_proxy(temperature_weather: f64, precipitation: f64) -> f64 {
    temperature_weather * 0.5 - precipitation * 5.0
}

/// `2·[temp > 30] + 1.5·[humidity < 30] − 3·[precipitation > 0]`
pub fn weather_stress(temperature_weather: f64, humidity_weather: f64, precipitation: f64) -> f64 {
    2.0 * indicator(temperature_weather > 30.0) + 1.5 * indicator(humidity_weather < 30.0)
        - 3.0 * indicator(precipitation > 0.0)
}

impl WeatherFuser {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Fuses `weather` into `sensor`. The output is sorted by timestamp and has
    /// exactly as many rows as `sensor`. When no row finds an observation the
    /// table keeps its sensor-only columns.
    pub fn fuse(&self, sensor: &Table, weather: &[WeatherObservation]) -> PipelineResult<FusionOutcome> {
        let mut table = sensor.sorted_by_timestamp();

        let mut observations: Vec<&WeatherObservation> = weather.iter().collect();
        observations.sort_by_key(|w| w.timestamp);
        let stamps: Vec<NaiveDateTime> = observations.iter().map(|w| w.timestamp).collect();

        let matches: Vec<Option<&WeatherObservation>> = table
            .timestamps()
            .iter()
            .map(|&t| nearest_within(&stamps, t, self.tolerance).map(|i| observations[i]))
            .collect();
        let matched = matches.iter().filter(|m| m.is_some()).count();
        // Nothing to fuse: keep the sensor-only layout
        if matched == 0 {
            return Ok(FusionOutcome { table, matched });
        }

        // Only a literal name clash triggers the sensor/weather rename.
        let weather_temperature = if table.rename_column(TEMPERATURE, TEMPERATURE_SENSOR) {
            TEMPERATURE_WEATHER
        } else {
            TEMPERATURE
        };

        table.insert_column(BAROMETRIC_PRESSURE, column_of(&matches, |w| w.barometric_pressure))?;
        table.insert_column(PRECIPITATION, column_of(&matches, |w| w.precipitation))?;
        table.insert_column(HUMIDITY_WEATHER, column_of(&matches, |w| w.relative_humidity))?;
        table.insert_column(SOLAR_RADIATION, column_of(&matches, |w| w.solar_radiation))?;
        table.insert_column(weather_temperature, column_of(&matches, |w| w.temperature))?;
        table.insert_column(UV_INDEX, column_of(&matches, |w| w.uv_index))?;
        table.insert_column(WIND_DIRECTION, column_of(&matches, |w| w.wind_direction))?;
        table.insert_column(WIND_SPEED, column_of(&matches, |w| w.wind_speed))?;

        add_derived_indices(&mut table)?;

        Ok(FusionOutcome { table, matched })
    }
}

/// Adds `evap_proxy` and `weather_stress` when their input columns exist.
/// Per row, a value is only produced when every input cell is present.
fn add_derived_indices(table: &mut Table) -> PipelineResult<()> {
    let (Some(temp), Some(rain)) = (table.column(TEMPERATURE_WEATHER), table.column(PRECIPITATION))
    else {
        return Ok(());
    };

    let evap: Vec<Option<f64>> = temp
        .iter()
        .zip(rain)
        .map(|(t, p)| Some(evap_proxy((*t)?, (*p)?)))
        .collect();

    let stress: Vec<Option<f64>> = match table.column(HUMIDITY_WEATHER) {
        Some(hum) => temp
            .iter()
            .zip(rain)
            .zip(hum)
            .map(|((t, p), h)| Some(weather_stress((*t)?, (*h)?, (*p)?)))
            .collect(),
        None => vec![None; temp.len()],
    };

    table.insert_column(EVAP_PROXY, evap)?;
    table.insert_column(WEATHER_STRESS, stress)?;
    Ok(())
}
