use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The ways a script can run to completion and still break its contract with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractBreach {
    /// No global `generate` function after the script's top level ran.
    MissingEntryPoint,
    /// `generate` returned zero or several values.
    ReturnCount(usize),
    /// The returned value is a plain Lua value, not a host object at all.
    NotAHandle,
    /// The returned value is a host object, but not a tabulation.
    WrongHandle,
}

impl std::fmt::Display for ContractBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEntryPoint => write!(f, "generate() is not defined"),
            Self::ReturnCount(n) => write!(f, "generate() returned {n} values, expected 1"),
            Self::NotAHandle => write!(f, "generate() didn't even return a host object"),
            Self::WrongHandle => write!(f, "generate() didn't return a tabulation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TabulateError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Not found")]
    NotFound,
    #[error("Compile error: {0}")]
    Compile(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Contract violation: {0}")]
    ContractViolation(ContractBreach),
    #[error("Script exceeded its deadline")]
    Timeout,
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TabulateError>;

impl TabulateError {
    /// Stable numeric id exposed to clients in the error envelope.
    pub fn error_id(&self) -> i64 {
        match self {
            Self::NotSignedIn => 1,
            Self::Validation(_) => 3,
            Self::NotFound => 4,
            Self::Compile(_) => 10,
            Self::Runtime(_) => 11,
            Self::ContractViolation(_) => 12,
            Self::Timeout => 13,
            Self::Persistence(_) | Self::Config(_) | Self::Internal(_) => 999,
        }
    }

    /// The only text a client ever sees; details stay in the server log.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotSignedIn => "Not Signed In",
            Self::Validation(_) => "Invalid Request",
            Self::NotFound => "Not Found",
            Self::Compile(_) => "Report script failed to compile",
            Self::Runtime(_) => "Report script raised an error",
            Self::ContractViolation(_) => "Report script returned an invalid result",
            Self::Timeout => "Report script exceeded its time limit",
            Self::Persistence(_) | Self::Config(_) | Self::Internal(_) => "Internal Error",
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error_id: self.error_id(),
            error_string: self.public_message().to_string(),
        }
    }
}

/// `{errorId, errorString}` body returned for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error_id: i64,
    pub error_string: String,
}

// Helper conversions
impl From<rusqlite::Error> for TabulateError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for TabulateError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_hides_internal_detail() {
        let e = TabulateError::Runtime("[string \"report\"]:3: attempt to call a nil value (global 'io')".into());
        let env = e.envelope();
        assert_eq!(env.error_id, 11);
        assert!(!env.error_string.contains("io"));

        let e = TabulateError::Persistence("database is locked".into());
        assert_eq!(e.envelope().error_id, 999);
        assert_eq!(e.envelope().error_string, "Internal Error");
    }

    #[test]
    fn contract_breaches_share_one_kind() {
        for breach in [
            ContractBreach::MissingEntryPoint,
            ContractBreach::ReturnCount(2),
            ContractBreach::NotAHandle,
            ContractBreach::WrongHandle,
        ] {
            assert_eq!(TabulateError::ContractViolation(breach).error_id(), 12);
        }
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let json = serde_json::to_string(&TabulateError::NotFound.envelope()).unwrap();
        assert_eq!(json, r#"{"errorId":4,"errorString":"Not Found"}"#);
    }
}
