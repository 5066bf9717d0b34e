use serde::{Deserialize, Serialize};

use crate::error::{Result, TabulateError};
use crate::ledger::UserId;

pub type ReportId = i64;

/// The maximum length (in bytes) a report's Lua source may be. Sources of
/// this length or longer are rejected before they reach storage or the sandbox.
pub const LUA_MAX_LENGTH: usize = 65536;

/// A stored report definition. `id` and `owner_user_id` are assigned by the
/// server; whatever a client sends in them is ignored on create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(default)]
    pub id: ReportId,
    #[serde(default)]
    pub owner_user_id: UserId,
    pub name: String,
    pub script_source: String,
}

impl Report {
    pub fn draft(name: impl Into<String>, script_source: impl Into<String>) -> Self {
        Self {
            id: 0,
            owner_user_id: 0,
            name: name.into(),
            script_source: script_source.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.script_source.len() >= LUA_MAX_LENGTH {
            return Err(TabulateError::Validation(format!(
                "script source is {} bytes, limit is {}",
                self.script_source.len(),
                LUA_MAX_LENGTH - 1
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportList {
    pub reports: Vec<Report>,
}
