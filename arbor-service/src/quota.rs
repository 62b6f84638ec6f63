//! Passphrase quota: an admin passphrase without limits plus numbered
//! evaluator passphrases (`<class_name>1` ..= `<class_name>N`) with small
//! analyze and question allowances.
//!
//! Usage lives in the node index database, so restarts keep it. A check
//! reserves the allowance in the same transaction that counts it.

use arbor_core::config::AccessConfig;
use arbor_core::{AccessControl, Action, ArborError, Caller, NodeIndex};
use std::sync::Arc;
use tracing::{info, warn};

enum Role {
    Admin,
    Evaluator(String),
}

pub struct PassphraseQuota {
    config: AccessConfig,
    index: Arc<NodeIndex>,
}

impl PassphraseQuota {
    pub fn new(config: AccessConfig, index: Arc<NodeIndex>) -> Self {
        Self { config, index }
    }

    fn role(&self, caller: &Caller) -> Option<Role> {
        let pass = caller.passphrase.as_deref()?.trim();
        if pass.is_empty() {
            return None;
        }
        if !self.config.admin_passphrase.is_empty() && pass == self.config.admin_passphrase {
            return Some(Role::Admin);
        }
        let class = self.config.class_name.trim();
        if class.is_empty() {
            return None;
        }
        let slot: u32 = pass.strip_prefix(class)?.parse().ok()?;
        (1..=self.config.evaluator_slots)
            .contains(&slot)
            .then(|| Role::Evaluator(pass.to_string()))
    }

    fn limit(&self, action: Action) -> u32 {
        match action {
            Action::Analyze => self.config.crawl_limit,
            Action::Ask => self.config.question_limit,
        }
    }
}

impl AccessControl for PassphraseQuota {
    fn authorize(
        &self,
        caller: &Caller,
        action: Action,
        snapshot_id: &str,
    ) -> arbor_core::Result<()> {
        let evaluator = match self.role(caller) {
            Some(Role::Admin) => return Ok(()),
            Some(Role::Evaluator(name)) => name,
            None => return Err(ArborError::AccessDenied("unknown passphrase".into())),
        };

        if self
            .index
            .reserve_usage(&evaluator, action, snapshot_id, self.limit(action))?
        {
            return Ok(());
        }
        Err(ArborError::AccessDenied(format!(
            "{} quota exhausted",
            match action {
                Action::Analyze => "analysis",
                Action::Ask => "question",
            }
        )))
    }

    fn record_usage(&self, caller: &Caller, action: Action, snapshot_id: &str) {
        let Some(Role::Evaluator(name)) = self.role(caller) else {
            return;
        };
        match self.index.confirm_usage(&name, action, snapshot_id) {
            Ok(()) => info!(?action, snapshot_id, "recorded evaluator usage"),
            Err(e) => warn!(?action, snapshot_id, error = %e, "failed to record evaluator usage"),
        }
    }

    fn release(&self, caller: &Caller, action: Action, snapshot_id: &str) {
        let Some(Role::Evaluator(name)) = self.role(caller) else {
            return;
        };
        if let Err(e) = self.index.release_usage(&name, action, snapshot_id) {
            warn!(?action, snapshot_id, error = %e, "failed to release evaluator usage");
        }
    }
}
