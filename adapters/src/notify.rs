//! Notification collaborator interface

use crate::types::{BalanceChanged, MerchantPaymentCompleted};

/// Fire-and-forget notifications; the engine never waits for delivery.
pub trait Notifier: Send + Sync {
    /// A tracked wallet balance changed
    fn emit_balance_changed(&self, event: BalanceChanged);

    /// A merchant payment was paid out
    fn emit_merchant_payment_completed(&self, event: MerchantPaymentCompleted);
}

/// Notifier that only writes structured logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit_balance_changed(&self, event: BalanceChanged) {
        tracing::info!(
            owner_id = %event.owner_id,
            chain = %event.chain,
            assets = event.assets.len(),
            "Balance changed"
        );
    }

    fn emit_merchant_payment_completed(&self, event: MerchantPaymentCompleted) {
        tracing::info!(
            merchant_id = %event.merchant_id,
            reference = %event.reference,
            amount = %event.amount,
            currency = %event.currency,
            "Merchant payment completed"
        );
    }
}
