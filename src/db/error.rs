use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    /// `elapsed_ms` is 0 when the deadline was enforced server side
    /// (statement_timeout) rather than by the client-side race.
    #[error("Operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: Box<DbError>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Timeout,
    Validation,
    Unknown,
}

impl ErrorKind {
    /// Validation failures are surfaced immediately; everything else may be
    /// retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Validation)
    }

    /// Maps a PostgreSQL SQLSTATE code to a retry class.
    ///
    /// Class 08 plus the shutdown and saturation codes are connection
    /// failures, 57014 is a cancelled statement, and the data, constraint
    /// and syntax classes are caller mistakes. Anything unrecognized stays
    /// Unknown and keeps its retry budget.
    pub fn from_sqlstate(code: &str) -> ErrorKind {
        match code {
            "53300" | "57P01" | "57P02" | "57P03" => ErrorKind::Connection,
            "57014" => ErrorKind::Timeout,
            _ => match code.get(..2) {
                Some("08") => ErrorKind::Connection,
                Some("22") | Some("23") | Some("42") => ErrorKind::Validation,
                _ => ErrorKind::Unknown,
            },
        }
    }
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Connection(_) => ErrorKind::Connection,
            DbError::Timeout { .. } => ErrorKind::Timeout,
            // Configuration faults are non-retryable, same as validation.
            DbError::Validation(_) | DbError::Configuration(_) => ErrorKind::Validation,
            DbError::Unknown(_) => ErrorKind::Unknown,
            DbError::RetriesExhausted { source, .. } => source.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => DbError::Connection(format!("io failure: {e}")),
            sqlx::Error::Tls(e) => DbError::Connection(format!("tls failure: {e}")),
            sqlx::Error::Protocol(e) => DbError::Connection(format!("protocol violation: {e}")),
            sqlx::Error::PoolTimedOut => {
                DbError::Connection("timed out waiting for a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => DbError::Connection("connection pool is closed".to_string()),
            sqlx::Error::WorkerCrashed => {
                DbError::Connection("connection worker crashed".to_string())
            }
            sqlx::Error::Configuration(e) => DbError::Configuration(e.to_string()),
            sqlx::Error::RowNotFound => {
                DbError::Validation("query expected a row but none was returned".to_string())
            }
            sqlx::Error::ColumnNotFound(name) => {
                DbError::Validation(format!("column not found: {name}"))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::Validation(format!("failed to decode column {index}: {source}"))
            }
            sqlx::Error::Decode(e) => DbError::Validation(format!("decode failure: {e}")),
            sqlx::Error::Database(db) => {
                let message = db.to_string();
                match db.code().as_deref().map(ErrorKind::from_sqlstate) {
                    Some(ErrorKind::Connection) => DbError::Connection(message),
                    Some(ErrorKind::Timeout) => DbError::Timeout {
                        operation: "statement".to_string(),
                        elapsed_ms: 0,
                    },
                    Some(ErrorKind::Validation) => DbError::Validation(message),
                    _ => DbError::Unknown(message),
                }
            }
            other => DbError::Unknown(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Validation(format!("payload serialization failed: {err}"))
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
