//! Security gate shared by chain transfers and off-ramps

use crate::types::SecurityChecks;
use crate::{Error, Result};
use adapters::{RiskContext, RiskDecision, SecurityProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the gate still needs before the transaction is authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// All present checks pass
    Authorized,
    /// PIN not yet verified
    AwaitingPin,
    /// PIN verified, MFA outstanding
    AwaitingMfa,
}

/// Result of a gate step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    /// Checks to store on the transaction
    pub checks: Option<SecurityChecks>,
    /// Where the transaction stands
    pub decision: GateDecision,
}

/// Result of an authorize or MFA call, for either transaction kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationOutcome {
    /// Transaction reference
    pub reference: String,
    /// What is still outstanding
    pub decision: GateDecision,
    /// Status after the call
    pub status: String,
}

/// PIN/MFA gate backed by the security collaborator
#[derive(Clone)]
pub struct SecurityGate {
    security: Arc<dyn SecurityProvider>,
}

impl std::fmt::Debug for SecurityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityGate").finish_non_exhaustive()
    }
}

impl SecurityGate {
    /// Create a gate
    pub fn new(security: Arc<dyn SecurityProvider>) -> Self {
        Self { security }
    }

    /// Checks a new transaction starts with, given the risk decision
    pub fn checks_for(decision: RiskDecision) -> Result<Option<SecurityChecks>> {
        match decision {
            RiskDecision::Allow => Ok(Some(SecurityChecks {
                pin_verified: false,
                mfa_verified: None,
            })),
            RiskDecision::Challenge => Ok(Some(SecurityChecks {
                pin_verified: false,
                mfa_verified: Some(false),
            })),
            RiskDecision::Block => Err(Error::RiskBlocked),
        }
    }

    /// Ask the risk collaborator and derive the initial checks
    pub async fn assess(&self, context: &RiskContext) -> Result<Option<SecurityChecks>> {
        let decision = self
            .security
            .assess_risk(context)
            .await
            .map_err(Error::provider)?;

        if decision == RiskDecision::Block {
            warn!(owner_id = %context.owner_id, operation = %context.operation, "Risk policy blocked operation");
        } else {
            debug!(owner_id = %context.owner_id, decision = ?decision, "Risk assessed");
        }
        Self::checks_for(decision)
    }

    /// Where a transaction with these checks stands
    pub fn standing(checks: Option<SecurityChecks>) -> GateDecision {
        match checks {
            None => GateDecision::Authorized,
            Some(c) if !c.pin_verified => GateDecision::AwaitingPin,
            Some(SecurityChecks {
                mfa_verified: Some(false),
                ..
            }) => GateDecision::AwaitingMfa,
            Some(_) => GateDecision::Authorized,
        }
    }

    /// Verify the PIN step.
    ///
    /// A wrong PIN rejects this attempt only; the stored checks are untouched
    /// and the owner may try again.
    pub async fn verify_pin(
        &self,
        owner_id: &str,
        checks: Option<SecurityChecks>,
        pin: Option<&str>,
    ) -> Result<GateOutcome> {
        let Some(mut current) = checks else {
            return Ok(GateOutcome {
                checks: None,
                decision: GateDecision::Authorized,
            });
        };

        if !current.pin_verified {
            let pin = pin.ok_or_else(|| {
                Error::Validation("This transaction requires a user pin.".to_string())
            })?;

            let valid = self
                .security
                .verify_pin(owner_id, pin)
                .await
                .map_err(Error::provider)?;
            if !valid {
                warn!(owner_id, "PIN rejected");
                return Err(Error::PinRejected);
            }
            current.pin_verified = true;
            info!(owner_id, "PIN verified");
        }

        Ok(GateOutcome {
            checks: Some(current),
            decision: Self::standing(Some(current)),
        })
    }

    /// Fold a gate step into the checks currently stored on a transaction.
    ///
    /// Verified flags only ever turn on, and the stored value decides whether
    /// MFA is required, so two steps computed from the same snapshot both land.
    pub fn merge(
        stored: Option<SecurityChecks>,
        step: Option<SecurityChecks>,
    ) -> Option<SecurityChecks> {
        let stored = stored?;
        let Some(step) = step else {
            return Some(stored);
        };
        Some(SecurityChecks {
            pin_verified: stored.pin_verified || step.pin_verified,
            mfa_verified: stored
                .mfa_verified
                .map(|done| done || step.mfa_verified == Some(true)),
        })
    }

    /// Record an externally verified MFA result
    pub fn confirm_mfa(checks: Option<SecurityChecks>) -> Result<GateOutcome> {
        let mut current = checks.ok_or_else(|| {
            Error::Validation("transaction does not require MFA".to_string())
        })?;
        if current.mfa_verified.is_none() {
            return Err(Error::Validation(
                "transaction does not require MFA".to_string(),
            ));
        }
        current.mfa_verified = Some(true);

        Ok(GateOutcome {
            checks: Some(current),
            decision: Self::standing(Some(current)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::mock::MockSecurity;
    use rust_decimal::Decimal;

    fn gate() -> (SecurityGate, Arc<MockSecurity>) {
        let security = Arc::new(MockSecurity::new("1234"));
        (SecurityGate::new(security.clone()), security)
    }

    fn context() -> RiskContext {
        RiskContext {
            owner_id: "alice".into(),
            operation: "transfer".into(),
            amount: Decimal::ONE,
            asset: None,
            destination: None,
            signals: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_policy_from_risk() {
        let (gate, security) = gate();
        let checks = gate.assess(&context()).await.unwrap().unwrap();
        assert_eq!(checks.mfa_verified, None);

        security.set_decision(RiskDecision::Challenge);
        let checks = gate.assess(&context()).await.unwrap().unwrap();
        assert_eq!(checks.mfa_verified, Some(false));

        security.set_decision(RiskDecision::Block);
        assert!(matches!(gate.assess(&context()).await, Err(Error::RiskBlocked)));
    }

    #[tokio::test]
    async fn test_no_checks_is_authorized() {
        let (gate, _) = gate();
        let outcome = gate.verify_pin("alice", None, None).await.unwrap();
        assert_eq!(outcome.decision, GateDecision::Authorized);
    }

    #[tokio::test]
    async fn test_pin_then_mfa() {
        let (gate, _) = gate();
        let checks = SecurityGate::checks_for(RiskDecision::Challenge).unwrap();

        assert!(matches!(
            gate.verify_pin("alice", checks, None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            gate.verify_pin("alice", checks, Some("0000")).await,
            Err(Error::PinRejected)
        ));

        let outcome = gate.verify_pin("alice", checks, Some("1234")).await.unwrap();
        assert_eq!(outcome.decision, GateDecision::AwaitingMfa);

        let done = SecurityGate::confirm_mfa(outcome.checks).unwrap();
        assert_eq!(done.decision, GateDecision::Authorized);
    }

    #[tokio::test]
    async fn test_merge_keeps_concurrent_steps() {
        let (gate, _) = gate();
        let stored = SecurityGate::checks_for(RiskDecision::Challenge).unwrap();

        // both steps start from the same snapshot
        let pin = gate.verify_pin("alice", stored, Some("1234")).await.unwrap();
        let mfa = SecurityGate::confirm_mfa(stored).unwrap();

        let after_mfa = SecurityGate::merge(stored, mfa.checks);
        assert_eq!(SecurityGate::standing(after_mfa), GateDecision::AwaitingPin);
        let after_both = SecurityGate::merge(after_mfa, pin.checks);
        assert_eq!(
            after_both,
            Some(SecurityChecks {
                pin_verified: true,
                mfa_verified: Some(true),
            })
        );
        assert_eq!(SecurityGate::standing(after_both), GateDecision::Authorized);

        assert_eq!(SecurityGate::merge(None, pin.checks), None);
        assert_eq!(SecurityGate::merge(after_mfa, None), after_mfa);
    }

    #[test]
    fn test_mfa_before_pin() {
        let checks = SecurityGate::checks_for(RiskDecision::Challenge).unwrap();
        let outcome = SecurityGate::confirm_mfa(checks).unwrap();
        assert_eq!(outcome.decision, GateDecision::AwaitingPin);

        let allow = SecurityGate::checks_for(RiskDecision::Allow).unwrap();
        assert!(SecurityGate::confirm_mfa(allow).is_err());
    }
}
