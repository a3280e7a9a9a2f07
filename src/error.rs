use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reason a generated statement was refused by the safety validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The oracle output contained more than one SQL statement.
    MultipleStatements,
    /// No parseable SQL statement was found in the oracle output.
    NoStatementFound,
    /// The statement is not a read query (INSERT, DROP, PRAGMA, ...).
    DisallowedStatementType(String),
    /// A referenced table or column does not exist in the schema.
    UnknownIdentifier(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MultipleStatements => {
                write!(f, "multiple SQL statements are not allowed")
            }
            RejectReason::NoStatementFound => {
                write!(f, "no SQL statement found in the response")
            }
            RejectReason::DisallowedStatementType(verb) => {
                write!(f, "statement type '{}' is not allowed; only read queries are permitted", verb)
            }
            RejectReason::UnknownIdentifier(name) => {
                write!(f, "identifier '{}' does not exist in the database schema", name)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Schema extraction error: {0}")]
    Schema(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Oracle transport error: {0}")]
    OracleTransport(String),

    #[error("Oracle call timed out after {0}s")]
    OracleTimeout(u64),

    #[error("Statement rejected: {0}")]
    Rejected(RejectReason),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Query timed out after {0}s")]
    QueryTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
