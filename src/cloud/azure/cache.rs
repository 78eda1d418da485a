use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AzureSqlServer, AzureSubscription, ID};
use crate::cache::{CacheEntry, CacheStore, now_unix};
use crate::model::AccountInfo;

/// On-disk Azure snapshot. Every field is optional so a partially written
/// database-only entry still loads.
///
/// Database lists carry their own timestamps: the file timestamp moves with
/// every server listing, database lists age on their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureCache {
    #[serde(default)]
    pub subscriptions: Vec<AzureSubscription>,
    #[serde(default)]
    pub servers_by_subscription: BTreeMap<String, Vec<AzureSqlServer>>,
    #[serde(default)]
    pub databases_by_server: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub database_timestamps: BTreeMap<String, f64>,
    #[serde(default)]
    pub account_username: Option<String>,
    #[serde(default)]
    pub account_tenant: Option<String>,
    #[serde(default)]
    pub current_subscription_index: Option<usize>,
}

impl AzureCache {
    pub fn account(&self) -> Option<AccountInfo> {
        let username = self.account_username.clone().filter(|u| !u.is_empty())?;
        Some(AccountInfo {
            username,
            display_name: None,
            tenant: self.account_tenant.clone(),
        })
    }

    /// Database list for one server if it was cached within `ttl`.
    pub fn databases(&self, server: &str, resource_group: &str, ttl: Duration) -> Option<&Vec<String>> {
        let key = server_key(server, resource_group);
        let stamped = *self.database_timestamps.get(&key)?;
        if now_unix() - stamped > ttl.as_secs_f64() {
            debug!("azure databases for {} expired", key);
            return None;
        }
        self.databases_by_server.get(&key)
    }

    /// Servers for `subscription_id` with any fresh database lists filled in.
    pub fn servers_for(&self, subscription_id: &str, ttl: Duration) -> Option<Vec<AzureSqlServer>> {
        let servers = self.servers_by_subscription.get(subscription_id)?;
        Some(
            servers
                .iter()
                .cloned()
                .map(|mut s| {
                    if s.databases.is_empty() {
                        if let Some(dbs) = self.databases(&s.name, &s.resource_group, ttl) {
                            s.databases = dbs.clone();
                        }
                    }
                    s
                })
                .collect(),
        )
    }
}

pub fn server_key(server: &str, resource_group: &str) -> String {
    format!("{server}:{resource_group}")
}

pub async fn load(store: &CacheStore) -> Option<AzureCache> {
    store.load::<AzureCache>(ID).await.map(|e| e.payload)
}

pub async fn cached_databases(store: &CacheStore, server: &str, resource_group: &str) -> Option<Vec<String>> {
    load(store).await?.databases(server, resource_group, store.ttl()).cloned()
}

/// Record one server's databases. Keeps the existing entry's timestamp; with
/// no usable entry a minimal one is started.
pub async fn cache_databases(store: &CacheStore, server: &str, resource_group: &str, databases: &[String]) {
    let mut entry = store
        .load::<AzureCache>(ID)
        .await
        .unwrap_or_else(|| CacheEntry::fresh(AzureCache::default()));
    let key = server_key(server, resource_group);
    entry.payload.database_timestamps.insert(key.clone(), now_unix());
    entry.payload.databases_by_server.insert(key, databases.to_vec());
    store.store_entry(ID, &entry).await;
}

pub struct Snapshot<'a> {
    pub subscriptions: &'a [AzureSubscription],
    pub servers: &'a [AzureSqlServer],
    pub subscription_id: &'a str,
    pub subscription_index: usize,
    pub account: Option<&'a AccountInfo>,
}

pub async fn cache_subscription_servers(store: &CacheStore, snap: Snapshot<'_>) {
    let mut entry = store
        .load::<AzureCache>(ID)
        .await
        .unwrap_or_else(|| CacheEntry::fresh(AzureCache::default()));
    entry.timestamp = now_unix();

    let cache = &mut entry.payload;
    cache.subscriptions = snap.subscriptions.to_vec();
    cache
        .servers_by_subscription
        .insert(snap.subscription_id.to_string(), snap.servers.to_vec());
    cache.current_subscription_index = Some(snap.subscription_index);
    if let Some(account) = snap.account {
        cache.account_username = Some(account.username.clone());
        cache.account_tenant = account.tenant.clone();
    }
    store.store_entry(ID, &entry).await;
}
