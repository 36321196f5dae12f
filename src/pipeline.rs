//! Training run driver
//!
//! Stages run strictly in order and the first error aborts the run:
//! load → engineer → select features → split → fit preprocessing → train →
//! evaluate → report and persist → export.
//!
//! The `predict` and `generate` drivers reuse the same configuration.

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::data::{load_sensor_logs, load_weather, Table};
use crate::error::{PipelineError, PipelineResult};
use crate::features::{FeatureEngineer, FeatureSpec};
use crate::heuristic::{to_logger_csv, GeneratorConfig, SyntheticLogGenerator};
use crate::ml::evaluation::{ModelEvaluator, RunReport};
use crate::ml::export::Exporter;
use crate::ml::inference::{InferenceEngine, Prediction};
use crate::ml::models::ModelRegistry;
use crate::ml::persistence::{save_artifacts, write_atomic};
use crate::ml::preprocess::Preprocessor;
use crate::ml::training::{train_test_split, ModelTrainer};

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub report_path: PathBuf,
    pub export_path: PathBuf,
}

/// Loads the configured inputs and runs every stage.
pub fn run(config: &Config) -> PipelineResult<RunOutcome> {
    let formats = &config.data.timestamp_formats;
    let log = load_sensor_logs(&config.data.sensor_glob, formats)?;
    let weather = load_weather(&config.data.weather_path, formats)?;

    let engineer = FeatureEngineer::new(config.fusion_tolerance());
    let engineered = engineer.engineer_with_status(&log, weather.as_deref())?;
    train_on_table(config, &engineered.table, engineered.weather_fused)
}

/// Runs every stage after feature engineering.
pub fn train_on_table(
    config: &Config,
    table: &Table,
    weather_fused: bool,
) -> PipelineResult<RunOutcome> {
    let prepared = FeatureSpec::default().prepare(table)?;
    if !prepared.skipped.is_empty() {
        warn!(skipped = ?prepared.skipped, "optional features absent from this run");
    }
    info!(
        rows = prepared.target.len(),
        features = ?prepared.feature_set.names(),
        "feature set resolved"
    );

    let split = train_test_split(
        prepared.target.len(),
        config.training.test_size,
        config.training.random_state,
    )?;
    let x_train = prepared.features.select_rows(&split.train);
    let x_test = prepared.features.select_rows(&split.test);
    let y_train: Vec<f64> = split.train.iter().map(|&i| prepared.target[i]).collect();
    let y_test: Vec<f64> = split.test.iter().map(|&i| prepared.target[i]).collect();
    info!(
        train_rows = y_train.len(),
        test_rows = y_test.len(),
        "data split"
    );

    let (preprocessor, x_train) = Preprocessor::fit_transform(&x_train)?;
    let x_test = preprocessor.transform(&x_test)?;

    let registry = ModelRegistry::from_specs(&config.models)?;
    let fitted = ModelTrainer::new(&config.training).train_all(registry, &x_train, &y_train)?;
    let evaluation = ModelEvaluator::evaluate(fitted, &x_test, &y_test)?;

    let report = RunReport {
        generated_at: Utc::now(),
        rows: prepared.target.len(),
        train_rows: y_train.len(),
        test_rows: y_test.len(),
        weather_fused,
        feature_set: prepared.feature_set.clone(),
        skipped_features: prepared.skipped.clone(),
        models: evaluation
            .models()
            .iter()
            .map(|m| RunReport::model_report(m, &prepared.feature_set))
            .collect(),
        selected: evaluation.best().name().to_string(),
    };
    let report_path = config.artifacts.model_dir.join(&config.artifacts.report_file);
    report.write(&report_path)?;

    let best = evaluation.into_best();
    save_artifacts(
        &config.artifacts.model_dir,
        &best,
        &preprocessor,
        &prepared.feature_set,
    )?;

    // Last stage: a refusal here leaves the saved artifacts intact
    let export_path =
        Exporter::new(&config.artifacts.export_dir).export(&best, &prepared.feature_set)?;

    info!(
        model = %best.name(),
        rmse = %format!("{:.4}", best.test.rmse),
        export = %export_path.display(),
        "training run complete"
    );
    Ok(RunOutcome {
        report,
        report_path,
        export_path,
    })
}

/// Scores the sensor logs matching `input` with the saved bundle, writing a
/// CSV of predictions to `output` when given.
pub fn predict(
    config: &Config,
    input: &str,
    output: Option<&Path>,
) -> PipelineResult<Vec<Prediction>> {
    let formats = &config.data.timestamp_formats;
    let mut log = load_sensor_logs(input, formats)?;
    // Labels in the input are not needed for scoring
    log.has_label = false;
    let weather = load_weather(&config.data.weather_path, formats)?;

    let engine = InferenceEngine::load(
        &config.artifacts.model_dir,
        FeatureEngineer::new(config.fusion_tolerance()),
    )?;
    let predictions = engine.predict_log(&log, weather.as_deref())?;

    if let Some(path) = output {
        write_atomic(path, predictions_csv(&predictions)?.as_bytes())?;
        info!(path = %path.display(), rows = predictions.len(), "predictions written");
    }
    Ok(predictions)
}

#[derive(Serialize)]
struct PredictionRow {
    timestamp: String,
    irrigation_minutes: String,
}

pub fn predictions_csv(predictions: &[Prediction]) -> PipelineResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for p in predictions {
        writer.serialize(PredictionRow {
            timestamp: p.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            irrigation_minutes: format!("{:.2}", p.irrigation_minutes),
        })?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| PipelineError::Serialization(e.to_string()))
}

/// Writes a seeded synthetic sensor log labelled with the configured rule.
pub fn generate(
    config: &Config,
    path: &Path,
    rows: usize,
    seed: u64,
    start: NaiveDateTime,
) -> PipelineResult<usize> {
    let mut generator = SyntheticLogGenerator::new(
        GeneratorConfig {
            rows,
            start,
            interval_minutes: 60,
            seed,
            temperature_noise: 1.5,
            humidity_noise: 5.0,
        },
        config.heuristic,
    )?;
    let readings = generator.generate();
    write_atomic(path, to_logger_csv(&readings)?.as_bytes())?;
    info!(path = %path.display(), rows = readings.len(), seed, "synthetic log written");
    Ok(readings.len())
}
