//! Settlement Engine
//!
//! Ledger-backed orchestration of crypto transfers, custodial settlement,
//! fiat off-ramps and merchant payouts.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────┐      ┌───────────────┐
//! request ──▶│ SecurityGate │─────▶│ ChainTransfers│──┐
//!            └──────────────┘      └───────────────┘  │ settle
//!                                                     ▼
//! custody webhook ─────────────────────────▶ CustodyOrchestrator ──▶ custody provider
//!                                                     │ funded
//!                                                     ▼
//! merchant intent ──▶ MerchantSettlements ──▶ Offramps ──▶ LiquidityOrchestrator ──▶ payout
//!                                                     ▲
//! payout webhook ─────────────────────────────────────┘
//!
//!   Ledger (double entry)   WalletBook   TransactionStore   Outbox   Reaper
//! ```
//!
//! Every money movement is written to the ledger as a record keyed by the
//! owning transaction. Work that must follow a state change (balance sync,
//! refunds, funded off-ramp payouts, ledger retries) goes through the outbox
//! and is retried until it succeeds or is dead-lettered.
//!
//! # Example
//!
//! ```no_run
//! use adapters::{CustodialWalletProvider, Notifier, ProviderRegistry, SecurityProvider};
//! use settlement::{Collaborators, Config, SettlementEngine};
//! use std::sync::Arc;
//!
//! async fn run(
//!     custody: Arc<dyn CustodialWalletProvider>,
//!     security: Arc<dyn SecurityProvider>,
//!     notifier: Arc<dyn Notifier>,
//! ) -> settlement::Result<()> {
//!     let config = Config::from_env()?;
//!     settlement::telemetry::init(&config.telemetry);
//!
//!     let engine = SettlementEngine::new(
//!         config,
//!         Collaborators {
//!             custody,
//!             security,
//!             liquidity: ProviderRegistry::new(),
//!             notifier,
//!         },
//!     )
//!     .await?;
//!
//!     let report = engine.process_outbox().await;
//!     println!("{} outbox tasks done", report.succeeded);
//!
//!     engine.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod context;
pub mod custody;
pub mod engine;
pub mod error;
pub mod gate;
pub mod liquidity;
pub mod machine;
pub mod merchant;
pub mod metrics;
pub mod offramp;
pub mod outbox;
pub mod reaper;
pub mod store;
pub mod telemetry;
pub mod transfer;
pub mod types;
pub mod units;
pub mod wallets;

#[cfg(test)]
mod testkit;

// Re-exports
pub use config::Config;
pub use context::{Collaborators, Context};
pub use custody::CustodyOrchestrator;
pub use engine::{OutboxReport, SettlementEngine};
pub use error::{Error, Result};
pub use gate::{AuthorizationOutcome, GateDecision};
pub use liquidity::{LiquidityOrchestrator, QuoteOptions, QuoteSort};
pub use merchant::{MerchantIntent, MerchantSettlements};
pub use offramp::{OfframpRequest, Offramps};
pub use reaper::{Reaper, SweepReport};
pub use transfer::{AmountBasis, ChainTransfers, Recipient, TransferRequest};
pub use types::*;
