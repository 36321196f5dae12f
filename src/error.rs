use thiserror::Error;

/// Errors raised by the training and inference pipeline.
///
/// Every stage propagates these unchanged to the run driver; nothing below
/// the driver retries or swallows them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Parse error in {context}: could not parse {value:?}")]
    Parse { context: String, value: String },

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Missing label value at row {row}")]
    MissingLabel { row: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Model '{model}' failed to fit: {reason}")]
    ModelFit { model: String, reason: String },

    #[error("Model '{model}' is not fitted")]
    NotFitted { model: String },

    #[error("Unsupported export for model '{model}' (kind: {kind})")]
    UnsupportedExport { model: String, kind: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub fn parse(context: impl Into<String>, value: impl Into<String>) -> Self {
        PipelineError::Parse {
            context: context.into(),
            value: value.into(),
        }
    }

    pub fn fit(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PipelineError::ModelFit {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<bincode::Error> for PipelineError {
    fn from(err: bincode::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<tempfile::PersistError> for PipelineError {
    fn from(err: tempfile::PersistError) -> Self {
        PipelineError::Io(err.error)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::parse("timestamp (row 3)", "31/31/2024");
        assert_eq!(
            err.to_string(),
            "Parse error in timestamp (row 3): could not parse \"31/31/2024\""
        );

        let err = PipelineError::MissingColumn("irrigation_minutes".to_string());
        assert!(err.to_string().contains("irrigation_minutes"));

        let err = PipelineError::fit("decision_tree", "empty training set");
        assert_eq!(
            err.to_string(),
            "Model 'decision_tree' failed to fit: empty training set"
        );
    }
}
