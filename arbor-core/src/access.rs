//! Access/quota collaborator seam.
//!
//! The runner asks for authorization before an expensive run and reports usage
//! after a successful one. Policy lives with the implementor.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Analyze,
    Ask,
}

/// Identity of whoever triggered an operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Caller {
    pub passphrase: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
        }
    }
}

pub trait AccessControl: Send + Sync {
    /// Fails with `ArborError::AccessDenied` when `caller` may not perform
    /// `action` on `snapshot_id`. A successful check may hold the allowance
    /// until [`record_usage`](Self::record_usage) or [`release`](Self::release).
    fn authorize(&self, caller: &Caller, action: Action, snapshot_id: &str) -> crate::Result<()>;

    /// Called once per successful run or answer.
    fn record_usage(&self, caller: &Caller, action: Action, snapshot_id: &str);

    /// Called instead of `record_usage` when an authorized operation did not
    /// complete.
    fn release(&self, _caller: &Caller, _action: Action, _snapshot_id: &str) {}
}

/// Permits everything and records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn authorize(
        &self,
        _caller: &Caller,
        _action: Action,
        _snapshot_id: &str,
    ) -> crate::Result<()> {
        Ok(())
    }

    fn record_usage(&self, _caller: &Caller, _action: Action, _snapshot_id: &str) {}
}
