//! Error kinds (§7) and the internal logging helper the rest of the crate
//! calls through the `try_db!` macro, in the same spirit as the teacher's
//! `error.rs` (log at the point of failure, return a typed error upward).

use std::panic::Location;

use tracing::error;

#[inline]
#[track_caller]
pub(crate) fn log(source: &dyn std::error::Error) {
    let location = Location::caller();
    let span_trace = tracing_error::SpanTrace::capture();

    error!(
        target: "skystore_meta",
        %location,
        error = %source,
        "span trace:\n{span_trace}"
    );
}

/// One variant per error kind in §7; the HTTP status mapping lives in
/// [`ApiError::status_code`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error")]
    Db(#[from] sqlx::Error),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Conflict(_) => 409,
            ApiError::NotFound(_) => 404,
            ApiError::MethodNotAllowed(_) => 405,
            ApiError::BadRequest(_) => 400,
            ApiError::Internal(_) => 500,
            ApiError::Db(_) => 500,
        }
    }

    pub fn body(&self) -> String {
        match self {
            ApiError::Db(e) => {
                log(e);
                "internal database error".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

macro_rules! try_db {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(err) => {
                crate::error::log(&err);
                return Err(crate::error::ApiError::from(err));
            }
        }
    };
}

pub(crate) use try_db;
