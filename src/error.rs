//! Typed errors for query dispatch, statement execution and transaction control.

use crate::action::Action;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The execution context carries no database connection.
    #[error("configuration: {0}")]
    Configuration(String),

    /// `Mandatory` propagation was requested outside any transaction.
    #[error("no active transaction for mandatory propagation")]
    NoActiveTransaction,

    /// A statement failed in the underlying execution engine.
    #[error("statement failed: {0}")]
    Statement(#[from] sqlx::Error),

    /// A commit/rollback/savepoint operation itself failed. When a unit of
    /// work had already failed before the control operation did, its error
    /// is preserved in `work` so neither is lost.
    #[error("transaction control '{op}' failed: {source}")]
    TransactionControl {
        op: &'static str,
        #[source]
        source: sqlx::Error,
        work: Option<Box<Error>>,
    },

    #[error("resource '{0}' is not registered")]
    UnknownResource(String),

    #[error("action {action} not authorized for resource '{resource}'")]
    Forbidden { resource: String, action: Action },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("no row in '{resource}' for key '{key}'")]
    NotFound { resource: String, key: String },

    /// Adapter failure annotated with the dispatch context.
    #[error("{action} {resource}{}: {source}", .key.as_deref().map(|k| format!(" key={k}")).unwrap_or_default())]
    Execution {
        resource: String,
        action: Action,
        key: Option<String>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn control(op: &'static str, source: sqlx::Error, work: Option<Error>) -> Self {
        Error::TransactionControl {
            op,
            source,
            work: work.map(Box::new),
        }
    }

    /// The unit-of-work error preserved by a failed transaction-control
    /// operation, if any.
    pub fn work_error(&self) -> Option<&Error> {
        match self {
            Error::TransactionControl { work, .. } => work.as_deref(),
            _ => None,
        }
    }
}
