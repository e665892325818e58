/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Error taxonomy (§7): an internal `Error` carrying full context, and a public `SyncApiError`
//! that callers across the FFI boundary match on. `GetErrorHandling` bridges the two, the same
//! two-layer pattern this crate family uses for its public APIs.

use crate::ids::BackendId;
use crate::transport::TransportError;
use error_support::{ErrorHandling, GetErrorHandling};

pub type Result<T> = std::result::Result<T, Error>;
pub type ApiResult<T> = std::result::Result<T, SyncApiError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("vault is locked")]
    VaultLocked,
    #[error("network error (retryable={retryable})")]
    NetworkError { retryable: bool },
    #[error("server error {status}: {message}")]
    ServerError { status: u16, message: String },
    #[error("decryption failed for {table}.{column}")]
    CryptoFailed { table: String, column: String },
    /// Quarantined to pending-columns; recovered transparently, never surfaced as an error.
    #[error("schema mismatch for {table}.{column}")]
    SchemaMismatch { table: String, column: String },
    /// An HLC-dominated drop; purely internal bookkeeping, never surfaced.
    #[error("conflict resolved in favor of the stored value")]
    ConflictResolved,
    #[error("backend {0} is disabled")]
    BackendDisabled(BackendId),
    #[error("backend {0} is unknown")]
    BackendUnknown(BackendId),
    #[error("operation cancelled")]
    Cancelled,
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("database open error: {0}")]
    OpenDatabase(#[from] sql_support::open_database::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
    #[error("malformed HLC: {0}")]
    HlcParse(#[from] crate::hlc::HlcParseError),
}

impl From<interrupt_support::Interrupted> for Error {
    fn from(_: interrupt_support::Interrupted) -> Self {
        Error::Cancelled
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unauthorized => Error::NotAuthenticated,
            TransportError::Network { retryable } => Error::NetworkError { retryable },
            TransportError::Server { status, message } => Error::ServerError { status, message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncApiError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("vault is locked")]
    VaultLocked,
    #[error("network error")]
    NetworkError { retryable: bool },
    #[error("server error {status}: {message}")]
    ServerError { status: u16, message: String },
    #[error("decryption failed for {table}.{column}")]
    CryptoFailed { table: String, column: String },
    #[error("backend is disabled")]
    BackendDisabled,
    #[error("backend is unknown")]
    BackendUnknown,
    #[error("operation cancelled")]
    Cancelled,
    #[error("unexpected internal error: {reason}")]
    UnexpectedError { reason: String },
}

impl GetErrorHandling for Error {
    type ExternalError = SyncApiError;

    fn get_error_handling(&self) -> ErrorHandling<SyncApiError> {
        match self {
            Error::NotAuthenticated => {
                ErrorHandling::log(SyncApiError::NotAuthenticated, log::Level::Info)
            }
            Error::VaultLocked => ErrorHandling::log(SyncApiError::VaultLocked, log::Level::Info),
            Error::NetworkError { retryable } => ErrorHandling::log(
                SyncApiError::NetworkError {
                    retryable: *retryable,
                },
                log::Level::Warn,
            ),
            Error::ServerError { status, message } => ErrorHandling::report(
                SyncApiError::ServerError {
                    status: *status,
                    message: message.clone(),
                },
                log::Level::Warn,
                "sync-core-server-error".to_string(),
            ),
            Error::CryptoFailed { table, column } => ErrorHandling::report(
                SyncApiError::CryptoFailed {
                    table: table.clone(),
                    column: column.clone(),
                },
                log::Level::Error,
                "sync-core-crypto-failed".to_string(),
            ),
            // These two never reach a caller in correct operation; treat arrival here as a bug.
            Error::SchemaMismatch { table, column } => ErrorHandling::unexpected(
                SyncApiError::UnexpectedError {
                    reason: format!("unhandled schema mismatch for {table}.{column}"),
                },
                Some("sync-core-unexpected-schema-mismatch"),
            ),
            Error::ConflictResolved => ErrorHandling::unexpected(
                SyncApiError::UnexpectedError {
                    reason: "unhandled conflict-resolved".to_string(),
                },
                Some("sync-core-unexpected-conflict-resolved"),
            ),
            Error::BackendDisabled(_) => {
                ErrorHandling::log(SyncApiError::BackendDisabled, log::Level::Info)
            }
            Error::BackendUnknown(_) => {
                ErrorHandling::log(SyncApiError::BackendUnknown, log::Level::Warn)
            }
            Error::Cancelled => ErrorHandling::passthrough(SyncApiError::Cancelled),
            Error::Sql(e) => ErrorHandling::report(
                SyncApiError::UnexpectedError {
                    reason: e.to_string(),
                },
                log::Level::Error,
                "sync-core-sql-error".to_string(),
            ),
            Error::OpenDatabase(e) => ErrorHandling::report(
                SyncApiError::UnexpectedError {
                    reason: e.to_string(),
                },
                log::Level::Error,
                "sync-core-open-database-error".to_string(),
            ),
            Error::Json(e) => ErrorHandling::report(
                SyncApiError::UnexpectedError {
                    reason: e.to_string(),
                },
                log::Level::Error,
                "sync-core-json-error".to_string(),
            ),
            Error::Crypto(e) => ErrorHandling::report(
                SyncApiError::UnexpectedError {
                    reason: e.to_string(),
                },
                log::Level::Error,
                "sync-core-crypto-error".to_string(),
            ),
            Error::HlcParse(e) => ErrorHandling::report(
                SyncApiError::UnexpectedError {
                    reason: e.to_string(),
                },
                log::Level::Error,
                "sync-core-hlc-parse-error".to_string(),
            ),
        }
    }
}

pub fn to_api_error(e: Error) -> SyncApiError {
    error_support::convert_log_report_error(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_passes_through_unreported() {
        let public = to_api_error(Error::Cancelled);
        assert_eq!(public, SyncApiError::Cancelled);
    }

    #[test]
    fn crypto_failed_preserves_table_and_column() {
        let public = to_api_error(Error::CryptoFailed {
            table: "notes".to_string(),
            column: "body".to_string(),
        });
        assert_eq!(
            public,
            SyncApiError::CryptoFailed {
                table: "notes".to_string(),
                column: "body".to_string(),
            }
        );
    }
}
