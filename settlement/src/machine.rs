//! Transaction state machines
//!
//! Each machine is a pure `transition(current, event)` function. Handlers read
//! the current status, ask the machine for the next one and store it only when
//! the move is legal, so a replayed webhook never rewinds a transaction.

use crate::types::{MerchantStatus, OfframpStatus, TransferStatus};
use crate::{Error, Result};
use adapters::CanonicalStatus;
use std::fmt::Display;

fn invalid(from: impl Display, to: impl Display) -> Error {
    Error::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Events that move a chain transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// Security gate passed
    Authorized,
    /// Cancelled by the owner
    Cancelled,
    /// Authorization window elapsed
    Expired,
    /// Balance move done without leaving the platform
    SettledInternally,
    /// Accepted by the custodial provider
    SubmittedToProvider,
    /// Provider confirmed success
    Confirmed,
    /// Provider reported failure
    Failed,
    /// Sender balance restored
    Refunded,
}

impl Display for TransferEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Chain transfer lifecycle.
///
/// Valid transitions:
/// - Initiated → Authorized (Authorized)
/// - Initiated | Authorized → Cancelled (Cancelled, Expired)
/// - Authorized → Completed (SettledInternally)
/// - Authorized → Pending (SubmittedToProvider)
/// - Pending → Completed (Confirmed)
/// - Pending → Failed (Failed)
/// - Failed → Refunded (Refunded)
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainTransferMachine;

impl ChainTransferMachine {
    /// Next status, or `InvalidTransition`
    pub fn transition(current: TransferStatus, event: TransferEvent) -> Result<TransferStatus> {
        use TransferEvent as E;
        use TransferStatus as S;

        let next = match (current, event) {
            (S::Initiated, E::Authorized) => S::Authorized,
            (S::Initiated | S::Authorized, E::Cancelled | E::Expired) => S::Cancelled,
            (S::Authorized, E::SettledInternally) => S::Completed,
            (S::Authorized, E::SubmittedToProvider) => S::Pending,
            (S::Pending, E::Confirmed) => S::Completed,
            (S::Pending, E::Failed) => S::Failed,
            (S::Failed, E::Refunded) => S::Refunded,
            _ => return Err(invalid(current, event)),
        };

        tracing::debug!(from = %current, to = %next, event = %event, "Chain transfer transition");
        Ok(next)
    }
}

/// Events that move an off-ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfframpEvent {
    /// Security gate passed
    Authorized,
    /// Processing started, crypto leg outstanding
    AwaitingDeposit,
    /// Crypto received in custody
    Funded,
    /// Crypto leg failed
    FundingFailed,
    /// Liquidity provider status
    Payout(CanonicalStatus),
    /// Cancelled by the owner
    Cancelled,
    /// Authorization window elapsed
    Expired,
    /// Crypto returned
    Refunded,
}

impl Display for OfframpEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfframpEvent::Payout(status) => write!(f, "Payout({})", status),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Off-ramp lifecycle.
///
/// Payout statuses only move forward: Funded → Pending → Transit → Completed,
/// skipping allowed; Failed is reachable from any of the in-flight states.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfframpMachine;

impl OfframpMachine {
    /// Next status, or `InvalidTransition`
    pub fn transition(current: OfframpStatus, event: OfframpEvent) -> Result<OfframpStatus> {
        use CanonicalStatus as C;
        use OfframpEvent as E;
        use OfframpStatus as S;

        let next = match (current, event) {
            (S::Initiated, E::Authorized) => S::Authorized,
            (S::Authorized, E::AwaitingDeposit) => S::AwaitingDeposit,
            (S::AwaitingDeposit, E::Funded) => S::Funded,
            (S::AwaitingDeposit, E::FundingFailed) => S::Failed,

            (S::Funded, E::Payout(C::Pending)) => S::Pending,
            (S::Funded | S::Pending, E::Payout(C::Transit)) => S::Transit,
            (S::Funded | S::Pending | S::Transit, E::Payout(C::Completed)) => S::Completed,
            (S::Funded | S::Pending | S::Transit, E::Payout(C::Failed)) => S::Failed,

            (S::Failed, E::Refunded) => S::Refunded,
            (S::Initiated | S::Authorized | S::AwaitingDeposit, E::Cancelled | E::Expired) => {
                S::Cancelled
            }
            _ => return Err(invalid(current, event)),
        };

        tracing::debug!(from = %current, to = %next, event = %event, "Off-ramp transition");
        Ok(next)
    }
}

/// Events that move a merchant transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerchantEvent {
    /// Off-ramp bound
    Authorized,
    /// Payout in flight
    Processing,
    /// Payout delivered
    Completed,
    /// Payout failed
    Failed,
    /// Returned
    Refunded,
    /// Cancelled
    Cancelled,
}

impl Display for MerchantEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Merchant settlement lifecycle, mirroring the bound off-ramp
#[derive(Debug, Clone, Copy, Default)]
pub struct MerchantMachine;

impl MerchantMachine {
    /// Next status, or `InvalidTransition`
    pub fn transition(current: MerchantStatus, event: MerchantEvent) -> Result<MerchantStatus> {
        use MerchantEvent as E;
        use MerchantStatus as S;

        let next = match (current, event) {
            (S::Initiated, E::Authorized) => S::Authorized,
            (S::Authorized | S::Processing, E::Processing) => S::Processing,
            (S::Authorized | S::Processing, E::Completed) => S::Completed,
            (S::Authorized | S::Processing, E::Failed) => S::Failed,
            (S::Completed, E::Refunded) => S::Refunded,
            (S::Initiated | S::Authorized, E::Cancelled) => S::Cancelled,
            _ => return Err(invalid(current, event)),
        };

        tracing::debug!(from = %current, to = %next, event = %event, "Merchant transition");
        Ok(next)
    }

    /// Merchant event mirroring a payout status
    pub fn mirror_event(status: CanonicalStatus) -> MerchantEvent {
        match status {
            CanonicalStatus::Pending | CanonicalStatus::Transit => MerchantEvent::Processing,
            CanonicalStatus::Completed => MerchantEvent::Completed,
            CanonicalStatus::Failed => MerchantEvent::Failed,
        }
    }
}
