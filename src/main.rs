use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use irrigation_trainer::{config, pipeline, telemetry};
use config::Config;
use std::path::Path;
use telemetry::init_tracing;
use tracing::{error, info};

const USAGE: &str = "usage:
  irrigation-trainer train
  irrigation-trainer predict <input-glob> [output.csv]
  irrigation-trainer generate <output.csv> [rows] [seed]";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        anyhow::bail!("{}", USAGE);
    };

    let cfg = Config::load()?;

    match command.as_str() {
        "train" => {
            info!(
                sensors = %cfg.data.sensor_glob,
                models = cfg.models.len(),
                "starting training run"
            );
            match pipeline::run(&cfg) {
                Ok(outcome) => {
                    info!(
                        selected = %outcome.report.selected,
                        report = %outcome.report_path.display(),
                        export = %outcome.export_path.display(),
                        "done"
                    );
                }
                Err(e) => {
                    error!(error = %e, "training run failed");
                    return Err(e.into());
                }
            }
        }
        "predict" => {
            let input = args.get(1).context(USAGE)?;
            let output = args.get(2).map(Path::new);
            let predictions = pipeline::predict(&cfg, input, output)?;
            if output.is_none() {
                print!("{}", pipeline::predictions_csv(&predictions)?);
            }
        }
        "generate" => {
            let path = args.get(1).context(USAGE)?;
            let rows = match args.get(2) {
                Some(raw) => raw.parse().with_context(|| format!("invalid row count {:?}", raw))?,
                None => 24 * 30,
            };
            let seed = match args.get(3) {
                Some(raw) => raw.parse().with_context(|| format!("invalid seed {:?}", raw))?,
                None => cfg.training.random_state,
            };
            let start = (Utc::now() - Duration::hours(rows as i64)).naive_utc();
            pipeline::generate(&cfg, Path::new(path), rows, seed, start)?;
        }
        other => anyhow::bail!("unknown command {:?}\n{}", other, USAGE),
    }

    Ok(())
}
