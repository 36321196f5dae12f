//! Sensor and weather log ingestion
//!
//! Sensor logs are comma- or semicolon-separated text with a header row. A
//! glob may match several files; their rows are concatenated in path order.
//! Weather observations are optional and only loaded when the file exists.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

pub mod table;

pub use table::{Column, Table};

/// Header names accepted for the label column
pub const LABEL_HEADERS: [&str; 2] = ["irrigation_minutes", "rega_necessaria_min"];
/// Header names accepted for the sensor temperature column
pub const TEMPERATURE_HEADERS: [&str; 2] = ["temperature", "temperatura"];
/// Header names accepted for the sensor humidity column
pub const HUMIDITY_HEADERS: [&str; 2] = ["humidity", "humidade"];

/// One logged sensor row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub irrigation_minutes: Option<f64>,
}

/// Result of loading one or more sensor logs
#[derive(Debug, Clone)]
pub struct SensorLog {
    pub readings: Vec<SensorReading>,
    /// Whether any input carried a label column
    pub has_label: bool,
    pub sources: Vec<PathBuf>,
}

/// One external weather station row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub timestamp: NaiveDateTime,
    pub barometric_pressure: Option<f64>,
    pub precipitation: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub solar_radiation: Option<f64>,
    pub temperature: Option<f64>,
    pub uv_index: Option<f64>,
    pub wind_direction: Option<f64>,
    pub wind_speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSensorRow {
    #[serde(alias = "data")]
    timestamp: String,
    #[serde(alias = "temperatura", default)]
    temperature: Option<f64>,
    #[serde(alias = "humidade", default)]
    humidity: Option<f64>,
    #[serde(alias = "rega_necessaria_min", default)]
    irrigation_minutes: Option<f64>,
}

// Weather cells that fail to parse as numbers are treated as missing.
#[derive(Debug, Deserialize)]
struct RawWeatherRow {
    timestamp: String,
    #[serde(alias = "barometricpressure", default, deserialize_with = "csv::invalid_option")]
    barometric_pressure: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    precipitation: Option<f64>,
    #[serde(alias = "relativehumidity", default, deserialize_with = "csv::invalid_option")]
    relative_humidity: Option<f64>,
    #[serde(alias = "solarradiation", default, deserialize_with = "csv::invalid_option")]
    solar_radiation: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    temperature: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    uv_index: Option<f64>,
    #[serde(alias = "winddirection", default, deserialize_with = "csv::invalid_option")]
    wind_direction: Option<f64>,
    #[serde(alias = "windspeed", default, deserialize_with = "csv::invalid_option")]
    wind_speed: Option<f64>,
}

/// Parses a timestamp with the first matching format.
pub fn parse_timestamp(value: &str, formats: &[String]) -> PipelineResult<NaiveDateTime> {
    let trimmed = value.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| PipelineError::parse("timestamp", trimmed))
}

/// Picks `;` when the header line has more semicolons than commas.
pub fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or_default();
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn reader_for(content: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(content))
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes())
}

/// Parses sensor rows from in-memory CSV text.
///
/// Returns the readings and whether the header carries a label column.
/// A header without temperature or humidity is rejected; empty cells in
/// those columns are kept as missing. Unparseable timestamps or numbers abort
/// the whole read.
pub fn parse_sensor_csv(
    content: &str,
    formats: &[String],
    source: &str,
) -> PipelineResult<(Vec<SensorReading>, bool)> {
    let mut reader = reader_for(content);
    let headers = reader.headers()?.clone();
    let has_header = |names: &[&str]| headers.iter().any(|h| names.contains(&h));
    for (names, column) in [(TEMPERATURE_HEADERS, "temperature"), (HUMIDITY_HEADERS, "humidity")] {
        if !has_header(&names) {
            debug!(source, ?headers, "sensor header lacks {}", column);
            return Err(PipelineError::MissingColumn(column.to_string()));
        }
    }
    let has_label = has_header(&LABEL_HEADERS);

    let mut readings = Vec::new();
    for (row, record) in reader.deserialize::<RawSensorRow>().enumerate() {
        let raw = record.map_err(|e| {
            PipelineError::parse(format!("{} row {}", source, row + 1), e.to_string())
        })?;
        let timestamp = parse_timestamp(&raw.timestamp, formats).map_err(|_| {
            PipelineError::parse(format!("{} row {} timestamp", source, row + 1), &raw.timestamp)
        })?;
        readings.push(SensorReading {
            timestamp,
            temperature: raw.temperature,
            humidity: raw.humidity,
            irrigation_minutes: raw.irrigation_minutes,
        });
    }
    Ok((readings, has_label))
}

/// Parses weather rows from in-memory CSV text.
pub fn parse_weather_csv(
    content: &str,
    formats: &[String],
    source: &str,
) -> PipelineResult<Vec<WeatherObservation>> {
    let mut reader = reader_for(content);
    let mut observations = Vec::new();
    for (row, record) in reader.deserialize::<RawWeatherRow>().enumerate() {
        let raw = record.map_err(|e| {
            PipelineError::parse(format!("{} row {}", source, row + 1), e.to_string())
        })?;
        let timestamp = parse_timestamp(&raw.timestamp, formats).map_err(|_| {
            PipelineError::parse(format!("{} row {} timestamp", source, row + 1), &raw.timestamp)
        })?;
        observations.push(WeatherObservation {
            timestamp,
            barometric_pressure: raw.barometric_pressure,
            precipitation: raw.precipitation,
            relative_humidity: raw.relative_humidity,
            solar_radiation: raw.solar_radiation,
            temperature: raw.temperature,
            uv_index: raw.uv_index,
            wind_direction: raw.wind_direction,
            wind_speed: raw.wind_speed,
        });
    }
    Ok(observations)
}

/// Expands `pattern` and concatenates every matching sensor log.
pub fn load_sensor_logs(pattern: &str, formats: &[String]) -> PipelineResult<SensorLog> {
    let paths = glob::glob(pattern)
        .map_err(|e| PipelineError::Config(format!("invalid sensor glob '{}': {}", pattern, e)))?
        .collect::<Result<Vec<PathBuf>, glob::GlobError>>()
        .map_err(|e| PipelineError::Io(e.into()))?;

    if paths.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "no sensor logs match '{}'",
            pattern
        )));
    }

    let mut readings = Vec::new();
    let mut has_label = false;
    for path in &paths {
        let content = std::fs::read_to_string(path)?;
        let (mut rows, labelled) = parse_sensor_csv(&content, formats, &path.display().to_string())?;
        debug!(path = %path.display(), rows = rows.len(), labelled, "sensor log read");
        has_label |= labelled;
        readings.append(&mut rows);
    }

    info!(files = paths.len(), rows = readings.len(), "sensor logs loaded");
    Ok(SensorLog {
        readings,
        has_label,
        sources: paths,
    })
}

/// Loads weather observations, or `None` when the file does not exist.
pub fn load_weather(path: &Path, formats: &[String]) -> PipelineResult<Option<Vec<WeatherObservation>>> {
    if !path.exists() {
        info!(path = %path.display(), "no weather file, running sensor-only");
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let observations = parse_weather_csv(&content, formats, &path.display().to_string())?;
    info!(path = %path.display(), rows = observations.len(), "weather observations loaded");
    Ok(Some(observations))
}
