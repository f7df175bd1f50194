//! Error types for stage initialisation and stage queries.

use cf_core::StageKind;
use cf_params::ParamError;
use cf_table::TableError;
use thiserror::Error;

/// Five-way failure taxonomy shared by every stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Numerical,
    Dependency,
    OutOfRange,
    InsufficientData,
}

/// Failure raised by a stage, during `init` or during a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("{stage}: configuration error: {message}")]
    Configuration { stage: StageKind, message: String },

    #[error("{stage}: numerical failure: {message}")]
    Numerical { stage: StageKind, message: String },

    #[error("{stage}: {needs} is not ready")]
    Dependency { stage: StageKind, needs: StageKind },

    #[error("{stage}: {source}")]
    Query {
        stage: StageKind,
        #[source]
        source: TableError,
    },
}

pub type StageResult<T> = Result<T, StageError>;

impl StageError {
    pub fn config(stage: StageKind, message: impl Into<String>) -> Self {
        StageError::Configuration {
            stage,
            message: message.into(),
        }
    }

    pub fn numerical(stage: StageKind, message: impl Into<String>) -> Self {
        StageError::Numerical {
            stage,
            message: message.into(),
        }
    }

    /// Adapter for `map_err` on table queries.
    pub fn query(stage: StageKind) -> impl Fn(TableError) -> StageError {
        move |source| StageError::Query { stage, source }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Configuration { stage, .. }
            | StageError::Numerical { stage, .. }
            | StageError::Dependency { stage, .. }
            | StageError::Query { stage, .. } => *stage,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Configuration { .. } => ErrorKind::Configuration,
            StageError::Numerical { .. } => ErrorKind::Numerical,
            StageError::Dependency { .. } => ErrorKind::Dependency,
            StageError::Query { source, .. } => match source {
                TableError::OutOfRange { .. } => ErrorKind::OutOfRange,
                TableError::InsufficientData { .. } => ErrorKind::InsufficientData,
                // asking for a column or axis the stage never built
                _ => ErrorKind::Dependency,
            },
        }
    }
}

/// Attach a stage to lower-level errors raised while a stage initialises.
pub(crate) trait InStage<T> {
    fn in_stage(self, stage: StageKind) -> StageResult<T>;
}

impl<T> InStage<T> for Result<T, ParamError> {
    fn in_stage(self, stage: StageKind) -> StageResult<T> {
        self.map_err(|e| StageError::config(stage, e.to_string()))
    }
}

impl<T> InStage<T> for Result<T, TableError> {
    fn in_stage(self, stage: StageKind) -> StageResult<T> {
        self.map_err(|e| StageError::numerical(stage, e.to_string()))
    }
}

impl<T> InStage<T> for Result<T, cf_core::CoreError> {
    fn in_stage(self, stage: StageKind) -> StageResult<T> {
        self.map_err(|e| StageError::numerical(stage, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_kinds_follow_table_error() {
        let e = StageError::query(StageKind::Background)(TableError::OutOfRange {
            axis: "z".into(),
            value: 1e12,
            min: 0.0,
            max: 1e9,
        });
        assert_eq!(e.kind(), ErrorKind::OutOfRange);
        assert_eq!(e.stage(), StageKind::Background);
        let e = StageError::query(StageKind::Spectra)(TableError::UnknownColumn {
            name: "TT".into(),
        });
        assert_eq!(e.kind(), ErrorKind::Dependency);
    }

    #[test]
    fn messages_name_the_stage() {
        let e = StageError::config(StageKind::Thermodynamics, "YHe must lie in [0, 1)");
        assert_eq!(
            e.to_string(),
            "thermodynamics: configuration error: YHe must lie in [0, 1)"
        );
        let e = StageError::Dependency {
            stage: StageKind::Spectra,
            needs: StageKind::Transfer,
        };
        assert_eq!(e.to_string(), "spectra: transfer is not ready");
    }

    #[test]
    fn param_errors_become_configuration() {
        let r: Result<f64, ParamError> = Err(ParamError::Malformed {
            name: "h".into(),
            value: "abc".into(),
            expected: "a number",
        });
        let e = r.in_stage(StageKind::Background).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }
}
