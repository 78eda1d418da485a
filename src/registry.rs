use std::sync::Arc;

use crate::cache::CacheStore;
use crate::cloud::CloudProvider;
use crate::cloud::aws::AwsProvider;
use crate::cloud::azure::AzureProvider;
use crate::cloud::gcp::GcpProvider;
use crate::command::CommandRunner;
use crate::config::Config;

const DISPLAY_ORDER: [&str; 3] = ["azure", "aws", "gcp"];

/// Providers in display order: Azure, AWS, GCP, then anything else in
/// registration order.
#[derive(Clone, Default)]
pub struct Registry {
    providers: Vec<Arc<dyn CloudProvider>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in providers sharing one runner and cache directory.
    pub fn with_defaults(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let cache = CacheStore::new(config.config_dir.clone(), config.cache_ttl);
        let mut registry = Self::new();
        registry.register(Arc::new(AzureProvider::new(
            runner.clone(),
            cache.clone(),
            config.azure_server_concurrency,
        )));
        registry.register(Arc::new(AwsProvider::new(
            runner.clone(),
            cache.clone(),
            config.aws_region_concurrency,
        )));
        registry.register(Arc::new(GcpProvider::new(runner, cache)));
        registry
    }

    /// Adds a provider; a provider with the same id replaces the old one.
    pub fn register(&mut self, provider: Arc<dyn CloudProvider>) {
        self.providers.retain(|p| p.id() != provider.id());
        self.providers.push(provider);
        self.providers.sort_by_key(|p| {
            DISPLAY_ORDER
                .iter()
                .position(|id| *id == p.id())
                .unwrap_or(DISPLAY_ORDER.len())
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CloudProvider>> {
        self.providers.iter()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn CloudProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn owner_of(&self, option_id: &str) -> Option<Arc<dyn CloudProvider>> {
        self.providers.iter().find(|p| p.owns_option(option_id)).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
