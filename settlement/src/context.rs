//! Components shared by the orchestrators

use crate::config::Config;
use crate::gate::SecurityGate;
use crate::metrics::CONSISTENCY_ALERTS_TOTAL;
use crate::outbox::{Outbox, OutboxTask};
use crate::store::TransactionStore;
use crate::types::OwnerRef;
use crate::wallets::WalletBook;
use crate::Result;
use adapters::{CustodialWalletProvider, Notifier, ProviderRegistry, SecurityProvider, UserType};
use chrono::{DateTime, Duration, Utc};
use ledger_core::{AccountId, AccountOrigin, Ledger, NewEntry};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// External systems the engine is wired to
#[derive(Clone)]
pub struct Collaborators {
    /// Custodial wallet provider
    pub custody: Arc<dyn CustodialWalletProvider>,
    /// PIN verification and risk decisions
    pub security: Arc<dyn SecurityProvider>,
    /// Liquidity providers by id
    pub liquidity: ProviderRegistry,
    /// Owner-facing notifications
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("custody", &self.custody.provider_id())
            .finish_non_exhaustive()
    }
}

/// Everything an orchestrator reads or writes
pub struct Context {
    /// Engine configuration
    pub config: Config,
    /// Double-entry ledger
    pub ledger: Ledger,
    /// Tracked wallets and balances
    pub wallets: WalletBook,
    /// Transactions
    pub store: TransactionStore,
    /// Background corrections
    pub outbox: Outbox,
    /// PIN/MFA gate
    pub gate: SecurityGate,
    /// Custodial wallet provider
    pub custody: Arc<dyn CustodialWalletProvider>,
    /// Liquidity providers by id
    pub liquidity: ProviderRegistry,
    /// Owner-facing notifications
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("service", &self.config.service_name)
            .field("custody", &self.custody.provider_id())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Open the ledger and assemble empty books around the collaborators
    pub async fn open(config: Config, collaborators: Collaborators) -> Result<Self> {
        let ledger = Ledger::open(config.ledger.clone()).await?;
        Ok(Self {
            outbox: Outbox::new(config.outbox.clone()),
            gate: SecurityGate::new(collaborators.security),
            custody: collaborators.custody,
            liquidity: collaborators.liquidity,
            notifier: collaborators.notifier,
            wallets: WalletBook::new(),
            store: TransactionStore::new(),
            ledger,
            config,
        })
    }

    /// End of the authorization window for something created at `now`
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(self.config.transfer.authorization_window_mins)
    }

    /// Write entries (and optionally close) for a transaction whose funds
    /// already moved. A failed write is queued for retry and raised as an
    /// alert instead of failing the caller.
    pub async fn record_or_defer(
        &self,
        transaction_id: Uuid,
        entries: Vec<NewEntry>,
        memo: Option<String>,
        close: bool,
    ) {
        if close && self.outbox.has_deferred_ledger(transaction_id) {
            // closing now would strand the queued entries on a posted record
            debug!(transaction_id = %transaction_id, "Earlier ledger writes queued, close deferred behind them");
            self.outbox.enqueue(OutboxTask::RecordLedger {
                transaction_id,
                entries,
                memo,
                close,
            });
            return;
        }
        if let Err(e) = self.write_ledger(transaction_id, entries.clone(), memo.clone(), close).await {
            CONSISTENCY_ALERTS_TOTAL.inc();
            error!(
                alert = true,
                transaction_id = %transaction_id,
                error = %e,
                "Ledger write failed after funds moved, queued for retry"
            );
            self.outbox.enqueue(OutboxTask::RecordLedger {
                transaction_id,
                entries,
                memo,
                close,
            });
        }
    }

    /// Count and log a money-path inconsistency that needs an operator
    pub fn consistency_alert(&self, transaction_id: Uuid, detail: &str) {
        CONSISTENCY_ALERTS_TOTAL.inc();
        error!(alert = true, transaction_id = %transaction_id, detail, "Consistency alert");
    }

    /// Record entries and optionally close the record
    pub async fn write_ledger(
        &self,
        transaction_id: Uuid,
        entries: Vec<NewEntry>,
        memo: Option<String>,
        close: bool,
    ) -> Result<()> {
        if !entries.is_empty() {
            self.ledger.record_bulk(entries, transaction_id, memo).await?;
        }
        if close {
            self.ledger.close(transaction_id).await?;
        }
        Ok(())
    }
}

/// Ledger origin and account for an owner's liability line
pub fn owner_account(owner: &OwnerRef) -> (AccountOrigin, AccountId) {
    let origin = match owner.user_type {
        UserType::Regular => AccountOrigin::User,
        UserType::Merchant => AccountOrigin::Merchant,
    };
    (origin, AccountId::new(owner.id.clone()))
}
