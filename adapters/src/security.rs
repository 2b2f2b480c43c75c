//! Security collaborator interface

use crate::{types::*, Result};
use async_trait::async_trait;

/// PIN verification and risk assessment
#[async_trait]
pub trait SecurityProvider: Send + Sync {
    /// Check a PIN for the owner
    async fn verify_pin(&self, owner_id: &str, pin: &str) -> Result<bool>;

    /// Opaque risk decision for an operation
    async fn assess_risk(&self, context: &RiskContext) -> Result<RiskDecision>;
}
