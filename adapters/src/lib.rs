//! # Settlement Adapters
//!
//! Contracts for the external systems the settlement engine depends on:
//! - Custodial wallet providers (addresses, balances, withdrawals, webhooks)
//! - Liquidity providers (quotes, fiat payouts, webhook status mapping)
//! - Security (PIN verification, risk decision)
//! - Notifications (fire-and-forget)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Settlement engine                      │
//! └────────────┬───────────────────────┬────────────────┘
//!              │                       │
//!     ┌────────▼─────────┐   ┌─────────▼──────────┐
//!     │ Custodial wallet │   │  ProviderRegistry  │
//!     │    provider      │   │  (liquidity, by id)│
//!     └──────────────────┘   └─────────┬──────────┘
//!                                      │
//!                           ┌──────────┼──────────┐
//!                       ┌───▼───┐  ┌───▼───┐  ┌───▼───┐
//!                       │  LP A │  │  LP B │  │  ...  │
//!                       └───────┘  └───────┘  └───────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod custody;
pub mod error;
pub mod liquidity;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod security;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use custody::CustodialWalletProvider;
pub use error::{Error, Result};
pub use liquidity::LiquidityProvider;
pub use notify::{LogNotifier, Notifier};
pub use registry::ProviderRegistry;
pub use security::SecurityProvider;
pub use types::*;
