//! Feature/target selection
//!
//! A [`FeatureSpec`] is an ordered list of candidate columns, each marked
//! required or optional. Resolving it against an engineered [`Table`] yields
//! the run's [`FeatureSet`]: the candidates that are actually present, in
//! candidate order. The feature set is persisted and reused verbatim for
//! inference.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::weather::{
    BAROMETRIC_PRESSURE, EVAP_PROXY, HUMIDITY_WEATHER, PRECIPITATION, SOLAR_RADIATION,
    TEMPERATURE_SENSOR, TEMPERATURE_WEATHER, WEATHER_STRESS, WIND_SPEED,
};
use super::{DAY, HOUR, HUMIDITY, LABEL, MONTH, TEMPERATURE, YEAR};
use crate::data::Table;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::Matrix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCandidate {
    pub name: String,
    pub required: bool,
}

impl FeatureCandidate {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub candidates: Vec<FeatureCandidate>,
    /// Groups of optional candidates of which at least one must be present
    pub one_of: Vec<Vec<String>>,
    pub label: String,
}

/// Outcome of resolving a [`FeatureSpec`] against a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub feature_set: FeatureSet,
    /// Optional candidates absent from the table
    pub skipped: Vec<String>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        let sensor = [
            FeatureCandidate::optional(TEMPERATURE),
            FeatureCandidate::optional(TEMPERATURE_SENSOR),
            FeatureCandidate::required(HUMIDITY),
        ];
        let time = [
            YEAR, MONTH, DAY, HOUR, "mes_sin", "mes_cos", "hora_sin", "hora_cos",
        ]
        .map(FeatureCandidate::required);
        let weather = [
            PRECIPITATION,
            BAROMETRIC_PRESSURE,
            SOLAR_RADIATION,
            TEMPERATURE_WEATHER,
            HUMIDITY_WEATHER,
            WIND_SPEED,
            EVAP_PROXY,
            WEATHER_STRESS,
        ]
        .map(FeatureCandidate::optional);

        Self {
            candidates: sensor.into_iter().chain(time).chain(weather).collect(),
            // Fusion renames the sensor reading to `temperature_sensor`
            one_of: vec![vec![TEMPERATURE.to_string(), TEMPERATURE_SENSOR.to_string()]],
            label: LABEL.to_string(),
        }
    }
}

impl FeatureSpec {
    pub fn resolve(&self, table: &Table) -> PipelineResult<Resolution> {
        let mut names = Vec::new();
        let mut skipped = Vec::new();
        for candidate in &self.candidates {
            if table.has_column(&candidate.name) {
                names.push(candidate.name.clone());
            } else if candidate.required {
                return Err(PipelineError::MissingColumn(candidate.name.clone()));
            } else {
                skipped.push(candidate.name.clone());
            }
        }
        for group in &self.one_of {
            if let Some(first) = group.first() {
                if !group.iter().any(|name| names.contains(name)) {
                    return Err(PipelineError::MissingColumn(first.clone()));
                }
            }
        }
        if !skipped.is_empty() {
            debug!(?skipped, "optional features not available");
        }
        Ok(Resolution {
            feature_set: FeatureSet::new(names),
            skipped,
        })
    }

    /// Resolves the feature set and extracts the feature matrix and label.
    pub fn prepare(&self, table: &Table) -> PipelineResult<PreparedData> {
        let labels = table
            .column(&self.label)
            .ok_or_else(|| PipelineError::MissingColumn(self.label.clone()))?;
        let target = labels
            .iter()
            .enumerate()
            .map(|(row, v)| v.ok_or(PipelineError::MissingLabel { row }))
            .collect::<PipelineResult<Vec<f64>>>()?;

        let Resolution {
            feature_set,
            skipped,
        } = self.resolve(table)?;
        let features = feature_set.matrix(table)?;

        Ok(PreparedData {
            features,
            target,
            feature_set,
            skipped,
        })
    }
}

/// Feature matrix (missing cells as NaN), label vector and the resolved order
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub features: Matrix,
    pub target: Vec<f64>,
    pub feature_set: FeatureSet,
    pub skipped: Vec<String>,
}

/// Frozen, ordered list of model input columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(Vec<String>);

impl FeatureSet {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }

    /// Comma-joined form written next to the model artifacts.
    pub fn to_text(&self) -> String {
        self.0.join(",")
    }

    pub fn from_text(text: &str) -> Self {
        Self(
            text.trim()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Reindexes `table` to exactly this column order. Missing cells become
    /// NaN; a missing column is an error.
    pub fn matrix(&self, table: &Table) -> PipelineResult<Matrix> {
        let columns = self
            .0
            .iter()
            .map(|name| table.require(name))
            .collect::<PipelineResult<Vec<_>>>()?;

        let rows = table.len();
        let mut data = Vec::with_capacity(rows * columns.len());
        for row in 0..rows {
            data.extend(columns.iter().map(|c| c[row].unwrap_or(f64::NAN)));
        }
        Matrix::new(rows, columns.len(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SensorReading;
    use crate::features::engineer_readings;
    use chrono::NaiveDate;

    fn scenario_table() -> Table {
        let ts = |h| {
            NaiveDate::from_ymd_opt(2025, 5, 16)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
        };
        let readings = vec![
            SensorReading {
                timestamp: ts(8),
                temperature: Some(20.0),
                humidity: Some(70.0),
                irrigation_minutes: Some(4.0),
            },
            SensorReading {
                timestamp: ts(14),
                temperature: Some(32.0),
                humidity: Some(20.0),
                irrigation_minutes: Some(22.0),
            },
        ];
        engineer_readings(&readings, true).unwrap()
    }

    #[test]
    fn test_sensor_only_feature_set() {
        let table = scenario_table();
        let prepared = FeatureSpec::default().prepare(&table).unwrap();
        assert_eq!(
            prepared.feature_set.names(),
            &[
                "temperature", "humidity", "ano", "mes", "dia", "hora", "mes_sin", "mes_cos",
                "hora_sin", "hora_cos",
            ]
        );
        assert_eq!(prepared.target, vec![4.0, 22.0]);
        assert_eq!(prepared.features.nrows(), 2);
        assert_eq!(prepared.features.row(1)[0], 32.0);
        assert!(prepared.skipped.contains(&"evap_proxy".to_string()));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let table = scenario_table();
        let spec = FeatureSpec::default();
        let a = spec.resolve(&table).unwrap();
        let b = spec.resolve(&table).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_label_column_is_fatal() {
        let mut table = scenario_table();
        table.drop_column(LABEL);
        assert!(matches!(
            FeatureSpec::default().prepare(&table),
            Err(PipelineError::MissingColumn(name)) if name == LABEL
        ));
    }

    #[test]
    fn test_missing_label_value_is_fatal() {
        let mut table = scenario_table();
        table.insert_column(LABEL, vec![Some(1.0), None]).unwrap();
        assert!(matches!(
            FeatureSpec::default().prepare(&table),
            Err(PipelineError::MissingLabel { row: 1 })
        ));
    }

    #[test]
    fn test_missing_required_feature_is_fatal() {
        let mut table = scenario_table();
        table.drop_column(HUMIDITY);
        assert!(matches!(
            FeatureSpec::default().resolve(&table),
            Err(PipelineError::MissingColumn(name)) if name == HUMIDITY
        ));
    }

    #[test]
    fn test_temperature_needs_sensor_or_fused_name() {
        let mut table = scenario_table();
        table.drop_column(TEMPERATURE);
        assert!(matches!(
            FeatureSpec::default().resolve(&table),
            Err(PipelineError::MissingColumn(name)) if name == TEMPERATURE
        ));

        let mut fused = scenario_table();
        assert!(fused.rename_column(TEMPERATURE, TEMPERATURE_SENSOR));
        let resolution = FeatureSpec::default().resolve(&fused).unwrap();
        assert_eq!(resolution.feature_set.names()[0], TEMPERATURE_SENSOR);
        assert!(resolution.skipped.contains(&TEMPERATURE.to_string()));
    }

    #[test]
    fn test_reindex_follows_feature_order_and_marks_missing() {
        let mut table = scenario_table();
        table.insert_column(HUMIDITY, vec![None, Some(20.0)]).unwrap();
        let set = FeatureSet::new(vec![HUMIDITY.to_string(), TEMPERATURE.to_string()]);
        let m = set.matrix(&table).unwrap();
        assert!(m.row(0)[0].is_nan());
        assert_eq!(m.row(0)[1], 20.0);
        assert_eq!(m.row(1), &[20.0, 32.0]);

        let unknown = FeatureSet::new(vec!["soil_moisture".to_string()]);
        assert!(unknown.matrix(&table).is_err());
    }

    #[test]
    fn test_text_round_trip() {
        let set = FeatureSet::new(vec!["temperature".into(), "humidity".into()]);
        assert_eq!(set.to_text(), "temperature,humidity");
        assert_eq!(FeatureSet::from_text("temperature, humidity\n"), set);
    }
}
