//! Azure SQL through the `az` CLI.
//!
//! Discovery covers subscriptions and the SQL servers of the active one.
//! Database lists are fetched lazily per server and cached separately.

pub mod cache;
pub mod discovery;
pub mod firewall;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use self::cache::Snapshot;
use super::{CloudProvider, account_action, account_label, connect_or_save};
use crate::cache::CacheStore;
use crate::command::{
    CommandRunner, IDENTITY_TIMEOUT, LOGIN_TIMEOUT, LOGOUT_TIMEOUT, run_json,
};
use crate::error::CommandError;
use crate::model::{
    AccountInfo, CloudResource, ConnectionConfig, PickerAction, PickerRow, ProviderExtra,
    ProviderState, ProviderStatus, RowKind, SelectionResult,
};
use crate::rows::{branch, continuation, fuzzy_matches, status_rows};

pub const ID: &str = "azure";
pub const ACCOUNT_ID: &str = "_azure_account";
pub const LOGIN_ID: &str = "_azure_login";
pub const SUBSCRIPTION_PREFIX: &str = "_azure_sub_";
pub const SERVER_PREFIX: &str = "_azure_server_";
pub const DATABASE_PREFIX: &str = "azure:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureSubscription {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureSqlServer {
    pub name: String,
    pub fqdn: String,
    pub resource_group: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub subscription_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub admin_login: Option<String>,
    #[serde(default = "ready")]
    pub state: String,
    #[serde(default)]
    pub has_entra_admin: bool,
    #[serde(default)]
    pub entra_only_auth: bool,
    #[serde(default)]
    pub databases: Vec<String>,
}

fn ready() -> String {
    "Ready".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Entra,
    Sql,
}

impl AuthMethod {
    fn tag(self) -> &'static str {
        match self {
            Self::Entra => "ad",
            Self::Sql => "sql",
        }
    }

    fn auth_type(self) -> &'static str {
        match self {
            Self::Entra => "ad_default",
            Self::Sql => "sql",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ad" => Some(Self::Entra),
            "sql" => Some(Self::Sql),
            _ => None,
        }
    }
}

impl AzureSqlServer {
    /// Entra needs a configured admin; SQL auth is off when the server is
    /// Entra-only.
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        let mut methods = Vec::with_capacity(2);
        if self.has_entra_admin {
            methods.push(AuthMethod::Entra);
        }
        if !self.entra_only_auth {
            methods.push(AuthMethod::Sql);
        }
        methods
    }

    fn auth_hint(&self) -> &'static str {
        if self.entra_only_auth {
            " [Entra only]"
        } else if !self.has_entra_admin {
            " [SQL only]"
        } else {
            ""
        }
    }

    fn matches(&self, server: &str, resource_group: &str) -> bool {
        self.name == server && self.resource_group == resource_group
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AzureExtra {
    pub subscriptions: Vec<AzureSubscription>,
    /// Servers of the active subscription. Shared so a database merge only
    /// copies the server it touches.
    pub servers: Vec<Arc<AzureSqlServer>>,
    pub current_subscription_index: usize,
}

impl AzureExtra {
    pub fn current_subscription(&self) -> Option<&AzureSubscription> {
        self.subscriptions.get(self.current_subscription_index)
    }

    pub fn server(&self, name: &str) -> Option<&AzureSqlServer> {
        self.servers.iter().find(|s| s.name == name).map(Arc::as_ref)
    }
}

/// First subscription flagged default, else the first one.
pub fn default_subscription_index(subscriptions: &[AzureSubscription]) -> usize {
    subscriptions.iter().position(|s| s.is_default).unwrap_or(0)
}

pub fn database_to_config(server: &AzureSqlServer, database: &str, auth: AuthMethod) -> ConnectionConfig {
    let username = match auth {
        AuthMethod::Sql => server.admin_login.clone().unwrap_or_default(),
        AuthMethod::Entra => String::new(),
    };
    let mut config = ConnectionConfig {
        name: format!("{}/{}", server.name, database),
        db_type: "mssql".into(),
        server: server.fqdn.clone(),
        port: "1433".into(),
        database: database.to_string(),
        username,
        password: None,
        source: Some(ID.into()),
        options: Default::default(),
    };
    config.options.insert("auth_type".into(), auth.auth_type().into());
    config.options.insert("azure_server_name".into(), server.name.clone());
    config
        .options
        .insert("azure_resource_group".into(), server.resource_group.clone());
    config
        .options
        .insert("azure_subscription_id".into(), server.subscription_id.clone());
    config
}

fn database_option_id(server: &str, database: &str, auth: AuthMethod) -> String {
    format!("{DATABASE_PREFIX}{server}:{database}:{}", auth.tag())
}

/// `azure:<server>:<database>:<ad|sql>`. Database names may contain `:`.
fn parse_database_option(option_id: &str) -> Option<(&str, &str, AuthMethod)> {
    let rest = option_id.strip_prefix(DATABASE_PREFIX)?;
    let (rest, tag) = rest.rsplit_once(':')?;
    let (server, database) = rest.split_once(':')?;
    Some((server, database, AuthMethod::from_tag(tag)?))
}

fn resources_from(subscriptions: &[AzureSubscription], servers: &[Arc<AzureSqlServer>]) -> Vec<CloudResource> {
    let mut resources: Vec<CloudResource> = subscriptions
        .iter()
        .map(|s| {
            CloudResource::new(ID, format!("sub_{}", s.id), s.name.clone(), "subscription")
                .with_meta("is_default", s.is_default)
        })
        .collect();
    for server in servers {
        let server_id = format!("server_{}_{}", server.resource_group, server.name);
        let mut node = CloudResource::new(ID, server_id.clone(), server.name.clone(), "sql_server")
            .with_meta("fqdn", server.fqdn.clone())
            .with_meta("resource_group", server.resource_group.clone())
            .with_meta("location", server.location.clone())
            .with_meta("state", server.state.clone())
            .with_meta("has_entra_admin", server.has_entra_admin)
            .with_meta("entra_only_auth", server.entra_only_auth);
        node.parent_id = Some(format!("sub_{}", server.subscription_id));
        for db in &server.databases {
            let mut child = CloudResource::new(
                ID,
                format!("db_{}_{}_{}", server.resource_group, server.name, db),
                db.clone(),
                "sql_database",
            );
            child.parent_id = Some(server_id.clone());
            node.children.push(child);
        }
        resources.push(node);
    }
    resources
}

pub(crate) fn available_state(
    account: Option<AccountInfo>,
    subscriptions: Vec<AzureSubscription>,
    servers: Vec<AzureSqlServer>,
    current_subscription_index: usize,
) -> ProviderState {
    let servers: Vec<Arc<AzureSqlServer>> = servers.into_iter().map(Arc::new).collect();
    ProviderState::available(
        account,
        resources_from(&subscriptions, &servers),
        ProviderExtra::Azure(AzureExtra {
            subscriptions,
            servers,
            current_subscription_index,
        }),
    )
}

/// Replace one server's databases, sharing every other server.
pub fn with_databases(
    state: &ProviderState,
    server: &str,
    resource_group: &str,
    databases: Vec<String>,
) -> Option<ProviderState> {
    let extra = state.extra.azure()?;
    let servers: Vec<Arc<AzureSqlServer>> = extra
        .servers
        .iter()
        .map(|s| {
            if s.matches(server, resource_group) {
                Arc::new(AzureSqlServer {
                    databases: databases.clone(),
                    ..s.as_ref().clone()
                })
            } else {
                s.clone()
            }
        })
        .collect();
    Some(ProviderState {
        resources: resources_from(&extra.subscriptions, &servers),
        extra: ProviderExtra::Azure(AzureExtra {
            servers,
            ..extra.clone()
        }),
        ..state.clone()
    })
}

pub struct AzureProvider {
    runner: Arc<dyn CommandRunner>,
    cache: CacheStore,
    concurrency: usize,
}

impl AzureProvider {
    pub fn new(runner: Arc<dyn CommandRunner>, cache: CacheStore, concurrency: usize) -> Self {
        Self {
            runner,
            cache,
            concurrency: concurrency.max(1),
        }
    }

    /// Status plus the CLI's error text when it is neither missing nor a
    /// login problem.
    async fn probe(&self) -> (ProviderStatus, Option<String>) {
        match self.runner.run("az", &["account", "show"], IDENTITY_TIMEOUT).await {
            Ok(_) => (ProviderStatus::Available, None),
            Err(CommandError::NotInstalled(_)) => (ProviderStatus::CliNotInstalled, None),
            Err(e) => {
                let detail = e.detail_lower();
                if detail.contains("az login") || detail.contains("not logged in") {
                    (ProviderStatus::NotLoggedIn, None)
                } else {
                    (ProviderStatus::Error, Some(e.to_string()))
                }
            }
        }
    }

    /// Full state straight from the snapshot file, when it covers the
    /// subscriptions and the active subscription's servers. The account is
    /// optional since its lookup may have failed when the snapshot was taken.
    async fn from_cache(&self) -> Option<ProviderState> {
        let cached = cache::load(&self.cache).await?;
        let account = cached.account();
        if cached.subscriptions.is_empty() {
            return None;
        }
        let index = cached
            .current_subscription_index
            .filter(|i| *i < cached.subscriptions.len())
            .unwrap_or_else(|| default_subscription_index(&cached.subscriptions));
        let servers = cached.servers_for(&cached.subscriptions[index].id, self.cache.ttl())?;
        debug!("azure: serving {} servers from cache", servers.len());
        Some(available_state(account, cached.subscriptions, servers, index))
    }

    async fn servers_for(&self, subscription: &AzureSubscription) -> Vec<AzureSqlServer> {
        match discovery::list_servers(self.runner.as_ref(), subscription, self.concurrency).await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("azure server listing failed for {}: {}", subscription.name, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CloudProvider for AzureProvider {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "Azure"
    }

    fn owns_option(&self, option_id: &str) -> bool {
        option_id.starts_with(DATABASE_PREFIX) || option_id.starts_with("_azure_")
    }

    async fn status(&self) -> ProviderStatus {
        self.probe().await.0
    }

    async fn account(&self) -> Option<AccountInfo> {
        let data = run_json(
            self.runner.as_ref(),
            "az",
            &[
                "account",
                "show",
                "--query",
                "{user:user.name, tenant:tenantDisplayName}",
                "-o",
                "json",
            ],
            IDENTITY_TIMEOUT,
        )
        .await
        .ok()?;
        Some(AccountInfo {
            username: data["user"].as_str().unwrap_or_default().to_string(),
            display_name: None,
            tenant: data["tenant"].as_str().map(str::to_string),
        })
    }

    async fn login(&self) -> bool {
        self.runner.run("az", &["login"], LOGIN_TIMEOUT).await.is_ok()
    }

    async fn logout(&self) -> bool {
        match self.runner.run("az", &["logout"], LOGOUT_TIMEOUT).await {
            Ok(_) => {
                self.cache.clear(ID).await;
                true
            }
            Err(e) => {
                warn!("azure logout failed: {}", e);
                false
            }
        }
    }

    async fn discover(&self, use_cache: bool) -> ProviderState {
        if use_cache {
            if let Some(state) = self.from_cache().await {
                return state;
            }
        } else {
            // Refresh drops lazily cached database lists too.
            self.cache.clear(ID).await;
        }

        let (status, error) = self.probe().await;
        match status {
            ProviderStatus::Available => {}
            ProviderStatus::Error => {
                return ProviderState::error(error.unwrap_or_else(|| "az account show failed".into()));
            }
            other => {
                info!("azure discovery stopped: {:?}", other);
                return ProviderState::with_status(other);
            }
        }

        let account = self.account().await;
        let subscriptions = match discovery::list_subscriptions(self.runner.as_ref()).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!("azure subscription listing failed: {}", e);
                Vec::new()
            }
        };
        let index = default_subscription_index(&subscriptions);
        let Some(subscription) = subscriptions.get(index).cloned() else {
            return available_state(account, subscriptions, Vec::new(), 0);
        };

        let mut servers = self.servers_for(&subscription).await;
        if use_cache {
            if let Some(cached) = cache::load(&self.cache).await {
                for server in &mut servers {
                    if let Some(dbs) = cached.databases(&server.name, &server.resource_group, self.cache.ttl()) {
                        server.databases = dbs.clone();
                    }
                }
            }
        }
        cache::cache_subscription_servers(
            &self.cache,
            Snapshot {
                subscriptions: &subscriptions,
                servers: &servers,
                subscription_id: &subscription.id,
                subscription_index: index,
                account: account.as_ref(),
            },
        )
        .await;
        available_state(account, subscriptions, servers, index)
    }

    async fn switch_subscription(&self, state: &ProviderState, index: usize) -> Option<ProviderState> {
        let extra = state.extra.azure()?;
        let subscription = extra.subscriptions.get(index)?.clone();
        info!("azure: switching to subscription {}", subscription.name);

        let cached = cache::load(&self.cache)
            .await
            .and_then(|c| c.servers_for(&subscription.id, self.cache.ttl()));
        let servers = match cached {
            Some(servers) => servers,
            None => self.servers_for(&subscription).await,
        };
        cache::cache_subscription_servers(
            &self.cache,
            Snapshot {
                subscriptions: &extra.subscriptions,
                servers: &servers,
                subscription_id: &subscription.id,
                subscription_index: index,
                account: state.account.as_ref(),
            },
        )
        .await;
        Some(available_state(
            state.account.clone(),
            extra.subscriptions.clone(),
            servers,
            index,
        ))
    }

    async fn load_databases(
        &self,
        state: &ProviderState,
        server: &str,
        resource_group: &str,
    ) -> Option<Vec<String>> {
        if let Some(dbs) = cache::cached_databases(&self.cache, server, resource_group).await {
            return Some(dbs);
        }
        let subscription = state
            .extra
            .azure()
            .and_then(|e| e.servers.iter().find(|s| s.matches(server, resource_group)))
            .map(|s| s.subscription_id.clone());
        match discovery::list_databases(
            self.runner.as_ref(),
            server,
            resource_group,
            subscription.as_deref(),
        )
        .await
        {
            Ok(dbs) => {
                cache::cache_databases(&self.cache, server, resource_group, &dbs).await;
                Some(dbs)
            }
            Err(e) => {
                warn!("azure database listing failed for {}: {}", server, e);
                Some(Vec::new())
            }
        }
    }

    fn merge_databases(
        &self,
        state: &ProviderState,
        server: &str,
        resource_group: &str,
        databases: Vec<String>,
    ) -> Option<ProviderState> {
        with_databases(state, server, resource_group, databases)
    }

    fn handle_action(
        &self,
        action: PickerAction,
        option_id: &str,
        state: &ProviderState,
        saved: &[ConnectionConfig],
    ) -> SelectionResult {
        if let Some(result) = account_action(ID, action, option_id, ACCOUNT_ID, LOGIN_ID) {
            return result;
        }
        let Some(extra) = state.extra.azure() else {
            return SelectionResult::None;
        };

        if let Some(index) = option_id.strip_prefix(SUBSCRIPTION_PREFIX) {
            return match (action, index.parse::<usize>()) {
                (PickerAction::Select | PickerAction::SwitchSubscription, Ok(index)) => {
                    SelectionResult::SwitchSubscription {
                        provider: ID.into(),
                        index,
                    }
                }
                _ => SelectionResult::None,
            };
        }

        if let Some(name) = option_id.strip_prefix(SERVER_PREFIX) {
            return match (action, extra.server(name)) {
                (PickerAction::Select, Some(server)) => SelectionResult::Expand {
                    provider: ID.into(),
                    server: server.name.clone(),
                    resource_group: server.resource_group.clone(),
                },
                _ => SelectionResult::None,
            };
        }

        if let Some((server, database, auth)) = parse_database_option(option_id) {
            if let Some(server) = extra.server(server) {
                if server.auth_methods().contains(&auth) {
                    return connect_or_save(action, database_to_config(server, database, auth), saved);
                }
            }
        }
        SelectionResult::None
    }

    fn build_rows(
        &self,
        state: &ProviderState,
        saved: &[ConnectionConfig],
        filter: &str,
    ) -> Vec<PickerRow> {
        let mut rows = vec![PickerRow::header("Azure")];
        if let Some(status) = status_rows(
            ID,
            "Azure",
            "Azure CLI",
            state,
            "Try running 'az account show' in terminal",
        ) {
            rows.extend(status);
            return rows;
        }
        if let Some(account) = &state.account {
            rows.push(PickerRow::item(
                ACCOUNT_ID,
                account_label(account, true, 45),
                1,
                RowKind::Account,
            ));
        }
        let Some(extra) = state.extra.azure() else {
            return rows;
        };
        if extra.subscriptions.is_empty() {
            rows.push(PickerRow::status("No subscriptions found", 1));
            return rows;
        }

        for (i, sub) in extra.subscriptions.iter().enumerate() {
            let current = i == extra.current_subscription_index;
            let marker = if current { "★" } else { " " };
            rows.push(
                PickerRow::item(
                    format!("{SUBSCRIPTION_PREFIX}{i}"),
                    format!("{marker} {}", sub.name),
                    1,
                    RowKind::Group,
                )
                .dimmed(!current),
            );
            if current {
                rows.extend(server_rows(extra, saved, filter));
            }
        }
        rows
    }
}

fn server_rows(extra: &AzureExtra, saved: &[ConnectionConfig], filter: &str) -> Vec<PickerRow> {
    if extra.servers.is_empty() {
        return vec![PickerRow::status("(no SQL servers in this subscription)", 2)];
    }

    let visible: Vec<(&AzureSqlServer, Vec<&String>)> = extra
        .servers
        .iter()
        .filter_map(|server| {
            let server_hit = fuzzy_matches(filter, &server.name);
            let dbs: Vec<&String> = server
                .databases
                .iter()
                .filter(|db| server_hit || fuzzy_matches(filter, db))
                .collect();
            (server_hit || !dbs.is_empty()).then_some((server.as_ref(), dbs))
        })
        .collect();

    let mut rows = Vec::new();
    let server_count = visible.len();
    for (idx, (server, dbs)) in visible.into_iter().enumerate() {
        let last_server = idx + 1 == server_count;
        let mut label = format!("{}🖥 {}{}", branch(last_server), server.name, server.auth_hint());
        if !server.state.eq_ignore_ascii_case("ready") {
            label.push_str(&format!(" ({})", server.state));
        }
        rows.push(PickerRow::item(
            format!("{SERVER_PREFIX}{}", server.name),
            label,
            2,
            RowKind::Group,
        ));

        let indent = continuation(last_server);
        if server.databases.is_empty() {
            rows.push(PickerRow::status(format!("{indent}└── (no databases)"), 3));
            continue;
        }
        let methods = server.auth_methods();
        let items: Vec<(&String, AuthMethod)> = dbs
            .into_iter()
            .flat_map(|db| methods.iter().map(move |m| (db, *m)))
            .collect();
        let item_count = items.len();
        for (i, (db, auth)) in items.into_iter().enumerate() {
            let config = database_to_config(server, db, auth);
            let already = config.is_saved_in(saved);
            let kind = match auth {
                AuthMethod::Entra => "Entra ID",
                AuthMethod::Sql => "SQL auth",
            };
            rows.push(
                PickerRow::item(
                    database_option_id(&server.name, db, auth),
                    format!(
                        "{indent}{}{db} ({kind}){}",
                        branch(i + 1 == item_count),
                        if already { " ✓" } else { "" }
                    ),
                    3,
                    RowKind::Resource,
                )
                .saved(already),
            );
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use std::time::Duration;

    const SUBS: &str = r#"[{"id":"sub-dev","name":"Development","isDefault":false},
                           {"id":"sub-prod","name":"Production","isDefault":true}]"#;

    fn logged_in_runner() -> ScriptedRunner {
        with_logged_in_rules(ScriptedRunner::new())
    }

    fn with_logged_in_rules(runner: ScriptedRunner) -> ScriptedRunner {
        runner
            .ok(
                "az account show --query",
                r#"{"user":"demo@contoso.com","tenant":"Contoso"}"#,
            )
            .ok("az account show", "{}")
            .ok("az account list", SUBS)
            .ok(
                "az sql server list --query [].{name:name, fqdn:fullyQualifiedDomainName, resourceGroup:resourceGroup, location:location, adminLogin:administratorLogin, state:state} -o json --subscription sub-prod",
                r#"[{"name":"main","fqdn":"main.database.windows.net","resourceGroup":"rg","adminLogin":"sqladmin","state":"Ready"},
                    {"name":"locked","fqdn":"locked.database.windows.net","resourceGroup":"rg","adminLogin":"sqladmin","state":"Ready"}]"#,
            )
            .ok(
                "az sql server list",
                r#"[{"name":"devsrv","fqdn":"devsrv.database.windows.net","resourceGroup":"rg-dev","adminLogin":"dev","state":"Ready"}]"#,
            )
            .ok("az sql server ad-admin list --server main", r#"[{"login":"dba"}]"#)
            .ok("az sql server ad-admin list --server locked", r#"[{"login":"dba"}]"#)
            .ok("az sql server ad-admin list", "[]")
            .ok("az sql server ad-only-auth get --name locked", r#"{"azureAdOnlyAuthentication": true}"#)
            .ok("az sql server ad-only-auth get", r#"{"azureAdOnlyAuthentication": false}"#)
            .ok("az sql db list --server main", r#"["master","orders","billing"]"#)
            .ok("az logout", "")
    }

    fn provider(runner: Arc<ScriptedRunner>, dir: &std::path::Path) -> AzureProvider {
        AzureProvider::new(runner, CacheStore::new(dir, Duration::from_secs(300)), 5)
    }

    #[tokio::test]
    async fn test_discover_picks_default_subscription_without_databases() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(logged_in_runner());
        let azure = provider(runner.clone(), dir.path());

        let state = azure.discover(true).await;
        assert!(state.is_available());
        assert_eq!(state.account.as_ref().unwrap().tenant.as_deref(), Some("Contoso"));
        let extra = state.extra.azure().unwrap();
        assert_eq!(extra.current_subscription_index, 1);
        assert_eq!(extra.servers.len(), 2);
        assert!(extra.servers.iter().all(|s| s.databases.is_empty()));
        assert_eq!(runner.count_matching("az sql db list"), 0);

        let locked = extra.server("locked").unwrap();
        assert_eq!(locked.auth_methods(), vec![AuthMethod::Entra]);
        let main = extra.server("main").unwrap();
        assert_eq!(main.auth_methods(), vec![AuthMethod::Entra, AuthMethod::Sql]);
    }

    #[tokio::test]
    async fn test_cache_hit_issues_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(logged_in_runner());
        let azure = provider(runner.clone(), dir.path());

        let live = azure.discover(true).await;
        let calls = runner.call_count();
        let cached = azure.discover(true).await;
        assert_eq!(runner.call_count(), calls);
        assert_eq!(cached, live);
    }

    #[tokio::test]
    async fn test_cache_hit_without_account() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(with_logged_in_rules(ScriptedRunner::new().fail(
            "az account show --query",
            CommandError::Timeout {
                program: "az".into(),
                timeout: Duration::from_secs(10),
            },
        )));
        let azure = provider(runner.clone(), dir.path());

        let live = azure.discover(true).await;
        assert!(live.is_available());
        assert_eq!(live.account, None);
        let calls = runner.call_count();

        let cached = azure.discover(true).await;
        assert_eq!(runner.call_count(), calls);
        assert_eq!(cached, live);
    }

    #[tokio::test]
    async fn test_not_logged_in_and_error_detail() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().fail(
            "az account show",
            CommandError::NonZeroExit {
                code: Some(1),
                stderr: "Please run 'az login' to setup account.".into(),
            },
        ));
        let azure = provider(runner.clone(), dir.path());
        assert_eq!(azure.discover(true).await.status, Some(ProviderStatus::NotLoggedIn));
        assert_eq!(runner.call_count(), 1);

        let runner = Arc::new(ScriptedRunner::new().fail(
            "az",
            CommandError::NonZeroExit {
                code: Some(1),
                stderr: "proxy refused connection".into(),
            },
        ));
        let state = provider(runner, dir.path()).discover(false).await;
        assert_eq!(state.status, Some(ProviderStatus::Error));
        assert!(state.error.unwrap().contains("proxy refused"));
    }

    #[tokio::test]
    async fn test_lazy_databases_merge_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(logged_in_runner());
        let azure = provider(runner.clone(), dir.path());
        let state = azure.discover(true).await;

        let dbs = azure.load_databases(&state, "main", "rg").await.unwrap();
        assert_eq!(dbs, vec!["orders".to_string(), "billing".to_string()]);
        assert!(runner.calls().iter().any(|c| c.ends_with("--subscription sub-prod")
            && c.starts_with("az sql db list")));

        let other = azure.load_databases(&state, "locked", "rg").await.unwrap();
        assert!(other.is_empty(), "failed listing yields an empty list");

        let merged = azure.merge_databases(&state, "main", "rg", dbs.clone()).unwrap();
        let before = state.extra.azure().unwrap();
        let after = merged.extra.azure().unwrap();
        assert_eq!(after.server("main").unwrap().databases, dbs);
        assert_eq!(before.servers[0].name, "locked");
        assert!(Arc::ptr_eq(&before.servers[0], &after.servers[0]));
        assert!(!Arc::ptr_eq(&before.servers[1], &after.servers[1]));

        // Second load comes from the per-server cache entry.
        let calls = runner.count_matching("az sql db list --server main");
        azure.load_databases(&state, "main", "rg").await.unwrap();
        assert_eq!(runner.count_matching("az sql db list --server main"), calls);
    }

    #[tokio::test]
    async fn test_switch_subscription_rescopes_servers() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(logged_in_runner());
        let azure = provider(runner.clone(), dir.path());
        let state = azure.discover(true).await;

        let switched = azure.switch_subscription(&state, 0).await.unwrap();
        let extra = switched.extra.azure().unwrap();
        assert_eq!(extra.current_subscription_index, 0);
        assert_eq!(extra.servers.len(), 1);
        assert_eq!(extra.servers[0].subscription_id, "sub-dev");
        assert_eq!(cache::load(&azure.cache).await.unwrap().current_subscription_index, Some(0));

        assert!(azure.switch_subscription(&state, 9).await.is_none());
    }

    #[tokio::test]
    async fn test_actions_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let azure = provider(Arc::new(logged_in_runner()), dir.path());
        let state = azure.discover(true).await;
        let state = with_databases(&state, "main", "rg", vec!["orders".into()]).unwrap();

        assert_eq!(
            azure.handle_action(PickerAction::Select, "_azure_server_locked", &state, &[]),
            SelectionResult::Expand {
                provider: "azure".into(),
                server: "locked".into(),
                resource_group: "rg".into(),
            }
        );
        assert_eq!(
            azure.handle_action(PickerAction::Select, "_azure_sub_0", &state, &[]),
            SelectionResult::SwitchSubscription {
                provider: "azure".into(),
                index: 0,
            }
        );

        let SelectionResult::Connect(sql) =
            azure.handle_action(PickerAction::Select, "azure:main:orders:sql", &state, &[])
        else {
            panic!("expected connect");
        };
        assert_eq!(sql.username, "sqladmin");
        assert_eq!(sql.option("auth_type"), Some("sql"));
        assert_eq!(sql.name, "main/orders");
        assert_eq!(
            azure.handle_action(PickerAction::Save, "azure:main:orders:sql", &state, &[sql.clone()]),
            SelectionResult::None
        );
        assert!(matches!(
            azure.handle_action(PickerAction::Save, "azure:main:orders:ad", &state, &[sql]),
            SelectionResult::Save(c) if c.option("auth_type") == Some("ad_default") && c.username.is_empty()
        ));

        let rows = azure.build_rows(&state, &[], "");
        let ids: Vec<&str> = rows.iter().filter_map(|r| r.id.as_deref()).collect();
        assert_eq!(
            ids,
            vec![
                ACCOUNT_ID,
                "_azure_sub_0",
                "_azure_sub_1",
                "_azure_server_locked",
                "_azure_server_main",
                "azure:main:orders:ad",
                "azure:main:orders:sql",
            ]
        );
        assert!(rows.iter().any(|r| r.label.contains("locked [Entra only]")));
        assert!(rows.iter().any(|r| r.label.ends_with("(no databases)")));

        let filtered = azure.build_rows(&state, &[], "orders");
        assert!(filtered.iter().all(|r| r.id.as_deref() != Some("_azure_server_locked")));
    }

    #[test]
    fn test_option_parsing() {
        assert_eq!(
            parse_database_option("azure:srv:db:with:colon:ad"),
            Some(("srv", "db:with:colon", AuthMethod::Entra))
        );
        assert_eq!(parse_database_option("azure:srv:db:kerberos"), None);
        assert_eq!(parse_database_option("aws:rds:x:y"), None);
    }
}
