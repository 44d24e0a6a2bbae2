use thiserror::Error;

/// Problems with the uploaded file itself. Always fatal to the ingestion call.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Missing required column '{column}'. Found headers: {found:?}")]
    MissingColumn {
        column: &'static str,
        found: Vec<String>,
    },

    #[error("Line {line}: empty '{column}' value")]
    EmptyField { line: u64, column: &'static str },

    #[error("Line {line}: invalid '{column}' value '{value}', expected {expected}")]
    InvalidNumber {
        line: u64,
        column: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Line {line}: invalid date '{value}', expected DD/MM/YY or DD/MM/YYYY")]
    InvalidDate { line: u64, value: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("File has no header row")]
    NoHeader,

    #[error("Invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
}

impl From<calamine::Error> for InputError {
    fn from(err: calamine::Error) -> Self {
        InputError::Workbook(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// A single row violated a store constraint. Recoverable: the row is skipped.
    #[error("Row rejected: {reason}")]
    Rejected { reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_row_rejection(&self) -> bool {
        matches!(self, StoreError::Rejected { .. })
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type EngineResult<T> = Result<T, EngineError>;
