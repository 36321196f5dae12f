pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod heuristic;
pub mod ml;
pub mod pipeline;
pub mod telemetry;
