//! Discovery coordinator.
//!
//! One owner (the picker's event loop) holds every provider state. All CLI
//! work runs in spawned tasks that report back over an unbounded channel;
//! the owner applies those events in [`Orchestrator::drain`] or waits for
//! them in [`Orchestrator::settle`]. Each event carries the generation it was
//! spawned under and is dropped if the provider has moved on since.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::cloud::mock;
use crate::command::CommandRunner;
use crate::config::Config;
use crate::dispatch;
use crate::docker::{ContainerInspector, DetectedContainer, DockerState, DockerStatus};
use crate::model::{
    ConnectionConfig, Notice, PickerAction, PickerRow, ProviderState, ProviderStatus,
    SelectionResult,
};
use crate::registry::Registry;
use crate::rows;

#[derive(Debug)]
pub enum DiscoveryEvent {
    ProviderLoaded {
        provider: String,
        generation: u64,
        state: ProviderState,
    },
    LoginFinished {
        provider: String,
        generation: u64,
        ok: bool,
    },
    LogoutFinished {
        provider: String,
        generation: u64,
        ok: bool,
    },
    SubscriptionLoaded {
        provider: String,
        generation: u64,
        state: Option<ProviderState>,
        previous: ProviderState,
    },
    DatabasesLoaded {
        provider: String,
        generation: u64,
        server: String,
        resource_group: String,
        databases: Vec<String>,
    },
    ContainersScanned {
        generation: u64,
        status: DockerStatus,
        containers: Vec<DetectedContainer>,
    },
}

/// Run `fut` on its own task so a panic surfaces as a `JoinError` instead of
/// taking the reporting task down with it.
async fn guarded<T, F>(fut: F) -> Result<T, String>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    tokio::spawn(fut).await.map_err(|e| {
        if e.is_panic() {
            let payload = e.into_panic();
            payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".into())
        } else {
            e.to_string()
        }
    })
}

pub struct Orchestrator {
    registry: Registry,
    inspector: Arc<ContainerInspector>,
    config: Config,
    states: HashMap<String, Arc<ProviderState>>,
    docker: Arc<DockerState>,
    generations: HashMap<String, u64>,
    docker_generation: u64,
    loading_databases: HashSet<(String, String)>,
    pending: usize,
    tx: UnboundedSender<DiscoveryEvent>,
    rx: UnboundedReceiver<DiscoveryEvent>,
}

impl Orchestrator {
    pub fn new(config: Config, registry: Registry, runner: Arc<dyn CommandRunner>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry,
            inspector: Arc::new(ContainerInspector::new(runner)),
            config,
            states: HashMap::new(),
            docker: Arc::new(DockerState::default()),
            generations: HashMap::new(),
            docker_generation: 0,
            loading_databases: HashSet::new(),
            pending: 0,
            tx,
            rx,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current snapshot for a provider. Providers that never ran report the
    /// default (idle) state.
    pub fn state(&self, provider: &str) -> Arc<ProviderState> {
        self.states.get(provider).cloned().unwrap_or_default()
    }

    pub fn docker(&self) -> Arc<DockerState> {
        self.docker.clone()
    }

    /// Anything still in flight, including lazy database loads.
    pub fn is_busy(&self) -> bool {
        self.pending > 0
    }

    pub fn is_loading_databases(&self, server: &str, resource_group: &str) -> bool {
        self.loading_databases
            .contains(&(server.to_string(), resource_group.to_string()))
    }

    fn generation(&self, provider: &str) -> u64 {
        self.generations.get(provider).copied().unwrap_or(0)
    }

    fn next_generation(&mut self, provider: &str) -> u64 {
        let slot = self.generations.entry(provider.to_string()).or_insert(0);
        *slot += 1;
        *slot
    }

    fn set_state(&mut self, provider: &str, state: ProviderState) {
        self.states.insert(provider.to_string(), Arc::new(state));
    }

    fn mark_loading(&mut self, provider: &str) {
        let next = self.state(provider).reloading();
        self.set_state(provider, next);
    }

    fn spawn_reporting<F>(&mut self, task: F)
    where
        F: Future<Output = DiscoveryEvent> + Send + 'static,
    {
        self.pending += 1;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let event = task.await;
            if tx.send(event).is_err() {
                debug!("orchestrator gone, dropping discovery event");
            }
        });
    }

    /// Kick off a container scan and one discovery task per provider.
    pub fn start_discovery(&mut self, use_cache: bool) {
        if self.config.mock_cloud {
            info!("mock mode: serving sample discovery data");
            for (id, state) in mock::cloud_states() {
                self.next_generation(id);
                self.set_state(id, state);
            }
            self.docker_generation += 1;
            self.docker = Arc::new(mock::docker_state());
            return;
        }
        self.scan_containers();
        let ids: Vec<&'static str> = self.registry.ids();
        for id in ids {
            self.discover_provider(id, use_cache);
        }
    }

    pub fn discover_provider(&mut self, provider_id: &str, use_cache: bool) {
        let Some(provider) = self.registry.get(provider_id) else {
            return;
        };
        let generation = self.next_generation(provider_id);
        self.mark_loading(provider_id);
        debug!("discovering {} (generation {}, cache {})", provider_id, generation, use_cache);

        let provider_id = provider_id.to_string();
        self.spawn_reporting(async move {
            let worker = provider.clone();
            let state = match guarded(async move { worker.discover(use_cache).await }).await {
                Ok(state) => state,
                Err(msg) => {
                    warn!("{} discovery failed: {}", provider_id, msg);
                    ProviderState::error(msg)
                }
            };
            DiscoveryEvent::ProviderLoaded {
                provider: provider_id,
                generation,
                state,
            }
        });
    }

    pub fn scan_containers(&mut self) {
        if self.config.mock_cloud {
            self.docker = Arc::new(mock::docker_state());
            return;
        }
        self.docker_generation += 1;
        let generation = self.docker_generation;
        self.docker = Arc::new(self.docker.rescanning());

        let inspector = self.inspector.clone();
        self.spawn_reporting(async move {
            let (status, containers) = match guarded(async move { inspector.scan().await }).await {
                Ok(found) => found,
                Err(msg) => {
                    warn!("container scan failed: {}", msg);
                    (DockerStatus::NotRunning, Vec::new())
                }
            };
            DiscoveryEvent::ContainersScanned {
                generation,
                status,
                containers,
            }
        });
    }

    pub fn login(&mut self, provider_id: &str) -> Option<Notice> {
        let provider = self.registry.get(provider_id)?;
        if self.config.mock_cloud {
            return Some(Notice::Info("Mock mode: login skipped".into()));
        }
        let generation = self.next_generation(provider_id);
        self.mark_loading(provider_id);

        let name = provider.name();
        let provider_id = provider_id.to_string();
        self.spawn_reporting(async move {
            let worker = provider.clone();
            let ok = guarded(async move { worker.login().await }).await.unwrap_or(false);
            DiscoveryEvent::LoginFinished {
                provider: provider_id,
                generation,
                ok,
            }
        });
        Some(Notice::Info(format!("Logging in to {name}... complete the login in your browser")))
    }

    pub fn logout(&mut self, provider_id: &str) -> Option<Notice> {
        let provider = self.registry.get(provider_id)?;
        if self.config.mock_cloud {
            return Some(Notice::Info("Mock mode: logout skipped".into()));
        }
        let generation = self.next_generation(provider_id);
        self.mark_loading(provider_id);

        let provider_id = provider_id.to_string();
        self.spawn_reporting(async move {
            let worker = provider.clone();
            let ok = guarded(async move { worker.logout().await }).await.unwrap_or(false);
            DiscoveryEvent::LogoutFinished {
                provider: provider_id,
                generation,
                ok,
            }
        });
        None
    }

    /// Re-scope a provider to another subscription. Returns `false` when
    /// nothing was started: provider not available, index out of range, or
    /// already the active one.
    pub fn switch_subscription(&mut self, provider_id: &str, index: usize) -> bool {
        let Some(provider) = self.registry.get(provider_id) else {
            return false;
        };
        let previous = self.state(provider_id);
        if !previous.is_available() || previous.loading {
            return false;
        }
        let Some(extra) = previous.extra.azure() else {
            return false;
        };
        if index == extra.current_subscription_index || index >= extra.subscriptions.len() {
            return false;
        }
        if self.config.mock_cloud {
            return false;
        }

        let generation = self.next_generation(provider_id);
        self.mark_loading(provider_id);
        let previous = previous.as_ref().clone();
        let provider_id = provider_id.to_string();
        self.spawn_reporting(async move {
            let worker = provider.clone();
            let prev = previous.clone();
            let state = guarded(async move { worker.switch_subscription(&prev, index).await })
                .await
                .unwrap_or_else(|msg| {
                    warn!("subscription switch failed: {}", msg);
                    None
                });
            DiscoveryEvent::SubscriptionLoaded {
                provider: provider_id,
                generation,
                state,
                previous,
            }
        });
        true
    }

    /// Lazily list one server's databases. Returns `false` if a load for the
    /// same server is already in flight or the provider is not available.
    pub fn load_databases(&mut self, provider_id: &str, server: &str, resource_group: &str) -> bool {
        let Some(provider) = self.registry.get(provider_id) else {
            return false;
        };
        let state = self.state(provider_id);
        if !state.is_available() {
            return false;
        }
        let key = (server.to_string(), resource_group.to_string());
        if !self.loading_databases.insert(key) {
            debug!("database load for {} already in flight", server);
            return false;
        }

        let generation = self.generation(provider_id);
        let provider_id = provider_id.to_string();
        let server = server.to_string();
        let resource_group = resource_group.to_string();
        self.spawn_reporting(async move {
            let worker = provider.clone();
            let (srv, rg) = (server.clone(), resource_group.clone());
            let databases = guarded(async move { worker.load_databases(&state, &srv, &rg).await })
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            DiscoveryEvent::DatabasesLoaded {
                provider: provider_id,
                generation,
                server,
                resource_group,
                databases,
            }
        });
        true
    }

    /// Lazy loads for every server of an available state that has no
    /// databases yet.
    fn follow_up(&mut self, provider_id: &str) {
        let state = self.state(provider_id);
        if !state.is_available() {
            return;
        }
        let Some(extra) = state.extra.azure() else {
            return;
        };
        let empty: Vec<(String, String)> = extra
            .servers
            .iter()
            .filter(|s| s.databases.is_empty())
            .map(|s| (s.name.clone(), s.resource_group.clone()))
            .collect();
        for (server, rg) in empty {
            self.load_databases(provider_id, &server, &rg);
        }
    }

    fn is_stale(&self, provider: &str, generation: u64) -> bool {
        let stale = self.generation(provider) != generation;
        if stale {
            debug!("discarding stale {} event (generation {})", provider, generation);
        }
        stale
    }

    fn display_name(&self, provider: &str) -> String {
        self.registry
            .get(provider)
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| provider.to_string())
    }

    /// Fold one worker event into the owned state.
    pub fn apply(&mut self, event: DiscoveryEvent) -> Option<Notice> {
        self.pending = self.pending.saturating_sub(1);
        match event {
            DiscoveryEvent::ProviderLoaded {
                provider,
                generation,
                state,
            } => {
                if self.is_stale(&provider, generation) {
                    return None;
                }
                debug!("{} loaded: {:?}", provider, state.status);
                let failure = (state.status == Some(ProviderStatus::Error)).then(|| {
                    let detail = state.error.clone().unwrap_or_else(|| "discovery failed".into());
                    Notice::Error(format!("{}: {detail}", self.display_name(&provider)))
                });
                self.set_state(&provider, state);
                self.follow_up(&provider);
                failure
            }
            DiscoveryEvent::LoginFinished {
                provider,
                generation,
                ok,
            } => {
                if self.is_stale(&provider, generation) {
                    return None;
                }
                let name = self.display_name(&provider);
                if ok {
                    info!("{} login succeeded", provider);
                    self.discover_provider(&provider, false);
                    Some(Notice::Info(format!("Logged in to {name}")))
                } else {
                    self.set_state(&provider, ProviderState::with_status(ProviderStatus::NotLoggedIn));
                    Some(Notice::Error(format!("Login to {name} failed")))
                }
            }
            DiscoveryEvent::LogoutFinished {
                provider,
                generation,
                ok,
            } => {
                if self.is_stale(&provider, generation) {
                    return None;
                }
                let name = self.display_name(&provider);
                if ok {
                    self.set_state(&provider, ProviderState::with_status(ProviderStatus::NotLoggedIn));
                    Some(Notice::Info(format!("Logged out of {name}")))
                } else {
                    self.set_state(&provider, ProviderState::error(format!("Logout from {name} failed")));
                    Some(Notice::Error(format!("Logout from {name} failed")))
                }
            }
            DiscoveryEvent::SubscriptionLoaded {
                provider,
                generation,
                state,
                previous,
            } => {
                if self.is_stale(&provider, generation) {
                    return None;
                }
                match state {
                    Some(state) => {
                        let label = state
                            .extra
                            .azure()
                            .and_then(|e| e.current_subscription())
                            .map(|s| s.name.clone())
                            .unwrap_or_default();
                        self.set_state(&provider, state);
                        self.follow_up(&provider);
                        Some(Notice::Info(format!("Switched to {label}")))
                    }
                    None => {
                        self.set_state(&provider, previous);
                        Some(Notice::Error("Could not switch subscription".into()))
                    }
                }
            }
            DiscoveryEvent::DatabasesLoaded {
                provider,
                generation,
                server,
                resource_group,
                databases,
            } => {
                self.loading_databases
                    .remove(&(server.clone(), resource_group.clone()));
                if self.is_stale(&provider, generation) {
                    return None;
                }
                let provider_impl = self.registry.get(&provider)?;
                let empty = databases.is_empty();
                let current = self.state(&provider);
                if let Some(next) =
                    provider_impl.merge_databases(&current, &server, &resource_group, databases)
                {
                    self.set_state(&provider, next);
                }
                empty.then(|| Notice::Warning(format!("No databases found on {server}")))
            }
            DiscoveryEvent::ContainersScanned {
                generation,
                status,
                containers,
            } => {
                if generation != self.docker_generation {
                    debug!("discarding stale container scan (generation {})", generation);
                    return None;
                }
                self.docker = Arc::new(DockerState {
                    status: Some(status),
                    loading: false,
                    containers,
                });
                None
            }
        }
    }

    /// Apply everything that has arrived without waiting.
    pub fn drain(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            notices.extend(self.apply(event));
        }
        notices
    }

    /// Wait until nothing is in flight, including follow-up loads scheduled
    /// while applying.
    pub async fn settle(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while self.pending > 0 {
            match self.rx.recv().await {
                Some(event) => notices.extend(self.apply(event)),
                None => break,
            }
        }
        notices
    }

    pub fn rows(&self, saved: &[ConnectionConfig], filter: &str) -> Vec<PickerRow> {
        rows::picker_rows(
            &self.registry,
            &|id: &str| self.states.get(id).cloned(),
            &self.docker,
            saved,
            filter,
            &self.config,
        )
    }

    pub fn select(&self, action: PickerAction, option_id: &str, saved: &[ConnectionConfig]) -> SelectionResult {
        dispatch::dispatch(
            &self.registry,
            &|id: &str| self.states.get(id).cloned(),
            &self.docker,
            action,
            option_id,
            saved,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use crate::error::CommandError;
    use std::time::Duration;

    const AZ_SUBS: &str = r#"[{"id":"sub-a","name":"Alpha","isDefault":true},{"id":"sub-b","name":"Beta","isDefault":false}]"#;

    fn azure_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .ok("az account show --query", r#"{"user":"me@contoso.com","tenant":"Contoso"}"#)
            .ok("az account show", "{}")
            .ok("az account list", AZ_SUBS)
            .ok(
                "az sql server list --query [].{name:name, fqdn:fullyQualifiedDomainName, resourceGroup:resourceGroup, location:location, adminLogin:administratorLogin, state:state} -o json --subscription sub-a",
                r#"[{"name":"one","fqdn":"one.database.windows.net","resourceGroup":"rg","adminLogin":"admin"},
                    {"name":"two","fqdn":"two.database.windows.net","resourceGroup":"rg","adminLogin":"admin"}]"#,
            )
            .ok(
                "az sql server list",
                r#"[{"name":"beta-srv","fqdn":"beta-srv.database.windows.net","resourceGroup":"rg-b","adminLogin":"admin"}]"#,
            )
            .ok("az sql server ad-admin list", "[]")
            .ok("az sql db list --server one", r#"["master","orders"]"#)
            .ok("az sql db list", "[]")
            .ok("az logout", "")
            .fail("aws", CommandError::NotInstalled("aws".into()))
            .fail("gcloud", CommandError::NotInstalled("gcloud".into()))
            .fail("docker", CommandError::NotInstalled("docker".into()))
    }

    fn orchestrator(runner: Arc<ScriptedRunner>, dir: &std::path::Path) -> Orchestrator {
        let config = Config::with_dir(dir);
        let registry = Registry::with_defaults(&config, runner.clone());
        Orchestrator::new(config, registry, runner)
    }

    #[tokio::test]
    async fn test_discovery_settles_every_provider_and_auto_loads_databases() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(azure_runner());
        let mut orch = orchestrator(runner.clone(), dir.path());

        orch.start_discovery(true);
        assert!(orch.state("azure").loading);
        assert!(orch.docker().loading);
        let notices = orch.settle().await;
        assert_eq!(notices, vec![Notice::Warning("No databases found on two".into())]);

        assert_eq!(orch.state("aws").status, Some(ProviderStatus::CliNotInstalled));
        assert_eq!(orch.state("gcp").status, Some(ProviderStatus::CliNotInstalled));
        assert_eq!(orch.docker().status, Some(DockerStatus::NotInstalled));

        let azure = orch.state("azure");
        assert!(azure.is_available() && !azure.loading);
        let extra = azure.extra.azure().unwrap();
        assert_eq!(extra.server("one").unwrap().databases, vec!["orders".to_string()]);
        assert!(extra.server("two").unwrap().databases.is_empty());
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_stale_provider_result_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(Arc::new(azure_runner()), dir.path());

        // Generation 1 then 2; only 2 may land.
        orch.next_generation("aws");
        orch.next_generation("aws");
        orch.pending = 2;
        let old = orch.apply(DiscoveryEvent::ProviderLoaded {
            provider: "aws".into(),
            generation: 1,
            state: ProviderState::error("late"),
        });
        assert!(old.is_none());
        assert_eq!(orch.state("aws").status, None);

        orch.apply(DiscoveryEvent::ProviderLoaded {
            provider: "aws".into(),
            generation: 2,
            state: ProviderState::with_status(ProviderStatus::NotLoggedIn),
        });
        assert_eq!(orch.state("aws").status, Some(ProviderStatus::NotLoggedIn));
        assert_eq!(orch.pending, 0);

        orch.docker_generation = 3;
        orch.apply(DiscoveryEvent::ContainersScanned {
            generation: 2,
            status: DockerStatus::Available,
            containers: Vec::new(),
        });
        assert_eq!(orch.docker().status, None);
    }

    #[tokio::test]
    async fn test_database_loads_are_deduplicated_and_merged() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(azure_runner());
        let mut orch = orchestrator(runner.clone(), dir.path());
        orch.discover_provider("azure", true);
        orch.settle().await;

        // Drop the auto-loaded lists so the explicit request runs again.
        let bare = crate::cloud::azure::with_databases(&orch.state("azure"), "one", "rg", Vec::new()).unwrap();
        orch.set_state("azure", bare);
        crate::cloud::azure::cache::cache_databases(
            &crate::cache::CacheStore::new(dir.path(), Duration::from_secs(300)),
            "one",
            "rg",
            &["orders".to_string(), "audit".to_string()],
        )
        .await;

        assert!(orch.load_databases("azure", "one", "rg"));
        assert!(!orch.load_databases("azure", "one", "rg"));
        assert!(orch.is_loading_databases("one", "rg"));
        orch.settle().await;
        assert!(!orch.is_loading_databases("one", "rg"));

        let extra_state = orch.state("azure");
        let extra = extra_state.extra.azure().unwrap();
        assert_eq!(extra.server("one").unwrap().databases.len(), 2);

        assert!(orch.load_databases("azure", "two", "rg"));
        let notices = orch.settle().await;
        assert_eq!(notices, vec![Notice::Warning("No databases found on two".into())]);
    }

    #[tokio::test]
    async fn test_switch_subscription_guards_and_rescopes() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(Arc::new(azure_runner()), dir.path());
        assert!(!orch.switch_subscription("azure", 1), "not available yet");

        orch.discover_provider("azure", true);
        orch.settle().await;
        assert!(!orch.switch_subscription("azure", 0), "already active");
        assert!(!orch.switch_subscription("azure", 7), "out of range");
        assert!(!orch.switch_subscription("aws", 1));

        assert!(orch.switch_subscription("azure", 1));
        assert!(orch.state("azure").loading);
        let notices = orch.settle().await;
        assert_eq!(
            notices,
            vec![
                Notice::Info("Switched to Beta".into()),
                Notice::Warning("No databases found on beta-srv".into()),
            ]
        );
        let state = orch.state("azure");
        let extra = state.extra.azure().unwrap();
        assert_eq!(extra.current_subscription_index, 1);
        assert_eq!(extra.servers[0].name, "beta-srv");
    }

    #[tokio::test]
    async fn test_logout_and_failed_login_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(Arc::new(azure_runner()), dir.path());
        orch.discover_provider("azure", true);
        orch.settle().await;
        assert!(dir.path().join("azure_cache.json").exists());

        assert!(orch.logout("azure").is_none());
        assert!(orch.state("azure").loading);
        let notices = orch.settle().await;
        assert_eq!(notices, vec![Notice::Info("Logged out of Azure".into())]);
        assert_eq!(orch.state("azure").status, Some(ProviderStatus::NotLoggedIn));
        assert!(!dir.path().join("azure_cache.json").exists());

        // `az login` is unscripted and fails.
        assert!(orch.login("azure").is_some());
        let notices = orch.settle().await;
        assert_eq!(notices, vec![Notice::Error("Login to Azure failed".into())]);
        assert_eq!(orch.state("azure").status, Some(ProviderStatus::NotLoggedIn));

        assert!(orch.logout("nope").is_none());
    }

    #[tokio::test]
    async fn test_mock_mode_issues_no_commands() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut config = Config::with_dir(dir.path());
        config.mock_cloud = true;
        let registry = Registry::with_defaults(&config, runner.clone());
        let mut orch = Orchestrator::new(config, registry, runner.clone());

        orch.start_discovery(true);
        assert!(!orch.is_busy());
        assert!(orch.state("azure").is_available());
        assert!(orch.state("gcp").is_available());
        assert_eq!(orch.docker().containers.len(), 4);
        assert_eq!(runner.call_count(), 0);

        let rows = orch.rows(&[], "");
        assert!(rows.iter().any(|r| r.id.as_deref() == Some("aws:redshift:us-east-1:analytics-warehouse")));
        assert!(matches!(
            orch.select(PickerAction::Select, "gcp:sql:prod-mysql-api", &[]),
            SelectionResult::Connect(c) if c.db_type == "mysql"
        ));
    }

    struct Exploding;

    #[async_trait::async_trait]
    impl crate::cloud::CloudProvider for Exploding {
        fn id(&self) -> &'static str {
            "exploding"
        }
        fn name(&self) -> &'static str {
            "Exploding"
        }
        fn owns_option(&self, option_id: &str) -> bool {
            option_id.starts_with("boom:")
        }
        async fn status(&self) -> ProviderStatus {
            ProviderStatus::Available
        }
        async fn account(&self) -> Option<crate::model::AccountInfo> {
            None
        }
        async fn login(&self) -> bool {
            true
        }
        async fn logout(&self) -> bool {
            true
        }
        async fn discover(&self, _use_cache: bool) -> ProviderState {
            panic!("adapter exploded")
        }
        fn handle_action(
            &self,
            _action: PickerAction,
            _option_id: &str,
            _state: &ProviderState,
            _saved: &[ConnectionConfig],
        ) -> SelectionResult {
            SelectionResult::None
        }
        fn build_rows(&self, _state: &ProviderState, _saved: &[ConnectionConfig], _filter: &str) -> Vec<PickerRow> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_panicking_provider_ends_in_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let mut registry = Registry::new();
        registry.register(Arc::new(Exploding));
        let mut orch = Orchestrator::new(Config::with_dir(dir.path()), registry, runner);

        orch.discover_provider("exploding", true);
        let notices = orch.settle().await;
        let state = orch.state("exploding");
        assert_eq!(state.status, Some(ProviderStatus::Error));
        assert_eq!(state.error.as_deref(), Some("adapter exploded"));
        assert_eq!(notices, vec![Notice::Error("Exploding: adapter exploded".into())]);
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_error_message() {
        let boom = true;
        let result = guarded(async move {
            if boom {
                panic!("boom");
            }
        })
        .await;
        assert_eq!(result.unwrap_err(), "boom");
    }
}
