//! Error kinds shared by every fallible component (store, transport, oracle,
//! dispatcher). One enum rather than per-module errors so call sites can
//! match on a specific variant (e.g. `hub::build` on `HubError::Config`)
//! instead of string-sniffing.

/// The one error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("llm oracle error: {0}")]
    Llm(String),

    #[error("unknown option '{choice}' for item '{item}'")]
    UnknownOption { item: String, choice: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type HubResult<T> = Result<T, HubError>;
