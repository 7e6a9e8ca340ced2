use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Schema drift in '{source_id}' ({year}): {detail}")]
    SchemaDrift {
        source_id: String,
        year: i32,
        detail: String,
    },

    #[error("Reference table '{0}' is missing")]
    MissingReference(String),

    #[error("Reference table '{table}' has {found} columns, expected {expected}")]
    ReferenceShape {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("Reference table '{table}' row {row}: {details}")]
    ReferenceValue {
        table: String,
        row: usize,
        details: String,
    },

    #[error("Malformed {kind} code '{code}': {details}")]
    MalformedCode {
        kind: &'static str,
        code: String,
        details: String,
    },

    #[error("Duplicate fact for {path} / {region} / {year}: join fan-out upstream")]
    DuplicateFact {
        path: String,
        region: String,
        year: i32,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Fact table invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Rule catalog error: {0}")]
    Catalog(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ReconcileError {
    pub(crate) fn drift(source_id: &str, year: i32, detail: impl Into<String>) -> Self {
        Self::SchemaDrift {
            source_id: source_id.to_string(),
            year,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
