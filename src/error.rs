use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Which of the two input exports a table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Mother,
    Loose,
}

impl fmt::Display for TableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRole::Mother => f.write_str("mother"),
            TableRole::Loose => f.write_str("loose"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document store not configured: {0}")]
    NotConfigured(String),

    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("document store error: {0}")]
    Backend(String),

    #[error("malformed document {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{role} table is missing required columns: {}", missing.join(", "))]
    Schema { role: TableRole, missing: Vec<String> },

    #[error("{0} table has no data rows")]
    EmptyInput(TableRole),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to read workbook {}: {source}", path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("upload {0} not found")]
    UploadNotFound(String),

    #[error("upload {id} is a {actual} file, expected {expected}")]
    UploadKindMismatch {
        id: String,
        expected: TableRole,
        actual: TableRole,
    },

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("work queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures while assembling a dashboard view from stored artifacts.
#[derive(Error, Debug)]
pub enum ViewError {
    #[error("no completed data available")]
    NoCompletedJob,

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {0} has no processed records")]
    NoRecords(Uuid),

    #[error("{artifact} artifact missing for job {job_id}")]
    ArtifactMissing { job_id: Uuid, artifact: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_lists_every_missing_column() {
        let err = PipelineError::Schema {
            role: TableRole::Loose,
            missing: vec!["CEP".to_string(), "Atraso".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "loose table is missing required columns: CEP, Atraso"
        );
    }

    #[test]
    fn store_errors_pass_through_transparently() {
        let err: PipelineError = StoreError::Unavailable("connection refused".to_string()).into();
        assert_eq!(err.to_string(), "document store unavailable: connection refused");
    }
}
