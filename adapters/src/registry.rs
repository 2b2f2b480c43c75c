//! Liquidity provider registry

use crate::{liquidity::LiquidityProvider, types::CryptoAsset, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Providers keyed by id, built once and injected where needed
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Arc<dyn LiquidityProvider>>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider with the same id
    pub async fn register(&self, provider: Arc<dyn LiquidityProvider>) {
        let id = provider.provider_id().to_string();
        let mut providers = self.providers.write().await;
        if providers.insert(id.clone(), provider).is_some() {
            info!(provider = %id, "Liquidity provider replaced");
        } else {
            info!(provider = %id, "Liquidity provider registered");
        }
    }

    /// Get a provider by id
    pub async fn get(&self, provider_id: &str) -> Result<Arc<dyn LiquidityProvider>> {
        let providers = self.providers.read().await;
        providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(provider_id.to_string()))
    }

    /// Providers that support the asset, ordered by id
    pub async fn supporting(&self, asset: &CryptoAsset) -> Vec<Arc<dyn LiquidityProvider>> {
        let providers = self.providers.read().await;
        let mut found: Vec<_> = providers
            .values()
            .filter(|p| p.supports_asset(asset))
            .cloned()
            .collect();
        drop(providers);
        found.sort_by(|a, b| a.provider_id().cmp(b.provider_id()));
        found
    }

    /// Registered ids, sorted
    pub async fn ids(&self) -> Vec<String> {
        let providers = self.providers.read().await;
        let mut ids: Vec<String> = providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered providers
    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    /// Whether no provider is registered
    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLiquidity;

    #[tokio::test]
    async fn test_register_and_filter() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MockLiquidity::new("yellow-card", &["ethereum.usdc"])))
            .await;
        registry
            .register(Arc::new(MockLiquidity::new("other", &["tron.usdt"])))
            .await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.ids().await, vec!["other", "yellow-card"]);

        let usdc = CryptoAsset::new("ethereum", "usdc");
        let found = registry.supporting(&usdc).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider_id(), "yellow-card");

        assert!(matches!(
            registry.get("missing").await,
            Err(Error::ProviderNotFound(_))
        ));
    }
}
