use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{CloudProvider, account_action, account_label, connect_or_save};
use crate::cache::CacheStore;
use crate::command::{
    CommandRunner, IDENTITY_TIMEOUT, LIST_TIMEOUT, LOGIN_TIMEOUT, LOGOUT_TIMEOUT,
    VERSION_TIMEOUT, run_json,
};
use crate::error::CommandError;
use crate::model::{
    AccountInfo, CloudResource, ConnectionConfig, PickerAction, PickerRow, ProviderExtra,
    ProviderState, ProviderStatus, RowKind, SelectionResult,
};
use crate::rows::{branch, fuzzy_matches, status_rows};

pub const ID: &str = "gcp";
pub const ACCOUNT_ID: &str = "_gcp_account";
pub const LOGIN_ID: &str = "_gcp_login";
pub const INSTANCE_PREFIX: &str = "gcp:sql:";

const NO_PROJECT: &str = "No project configured. Run: gcloud config set project PROJECT_ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpInstance {
    pub name: String,
    pub database_version: String,
    pub connection_name: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub state: String,
    pub region: String,
    pub project: String,
}

impl GcpInstance {
    pub fn is_runnable(&self) -> bool {
        self.state == "RUNNABLE"
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcpExtra {
    pub project: String,
    pub instances: Vec<GcpInstance>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GcpCache {
    #[serde(default)]
    project: String,
    #[serde(default)]
    instances: Vec<GcpInstance>,
    #[serde(default)]
    account_username: Option<String>,
}

/// `MYSQL_8_0` -> mysql/3306, `POSTGRES_15` -> postgresql/5432,
/// `SQLSERVER_2019_STANDARD` -> mssql/1433. Unknown versions are treated as
/// PostgreSQL.
pub fn engine_for(database_version: &str) -> (&'static str, u16) {
    if database_version.starts_with("MYSQL") {
        ("mysql", 3306)
    } else if database_version.starts_with("SQLSERVER") {
        ("mssql", 1433)
    } else {
        ("postgresql", 5432)
    }
}

fn parse_instances(data: &Value, project: &str) -> Vec<GcpInstance> {
    data.as_array()
        .into_iter()
        .flatten()
        .map(|inst| {
            let ip_address = inst["ipAddresses"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|ip| ip["type"].as_str() == Some("PRIMARY"))
                .and_then(|ip| ip["ipAddress"].as_str())
                .map(str::to_string);
            GcpInstance {
                name: inst["name"].as_str().unwrap_or_default().to_string(),
                database_version: inst["databaseVersion"].as_str().unwrap_or_default().to_string(),
                connection_name: inst["connectionName"].as_str().unwrap_or_default().to_string(),
                ip_address,
                state: inst["state"].as_str().unwrap_or_default().to_string(),
                region: inst["region"].as_str().unwrap_or_default().to_string(),
                project: project.to_string(),
            }
        })
        .collect()
}

pub fn instance_to_config(instance: &GcpInstance) -> ConnectionConfig {
    let (db_type, port) = engine_for(&instance.database_version);
    let mut config = ConnectionConfig {
        name: instance.name.clone(),
        db_type: db_type.into(),
        server: instance
            .ip_address
            .clone()
            .unwrap_or_else(|| instance.connection_name.clone()),
        port: port.to_string(),
        database: String::new(),
        username: String::new(),
        password: None,
        source: Some(ID.into()),
        options: Default::default(),
    };
    config
        .options
        .insert("gcp_connection_name".into(), instance.connection_name.clone());
    config.options.insert("gcp_project".into(), instance.project.clone());
    config.options.insert("gcp_region".into(), instance.region.clone());
    config
        .options
        .insert("gcp_database_version".into(), instance.database_version.clone());
    config
}

pub(crate) fn available_state(
    account: Option<AccountInfo>,
    project: String,
    instances: Vec<GcpInstance>,
) -> ProviderState {
    let resources = instances
        .iter()
        .map(|i| {
            CloudResource::new(ID, format!("sql_{}", i.name), i.name.clone(), "cloud_sql_instance")
                .with_meta("database_version", i.database_version.clone())
                .with_meta("connection_name", i.connection_name.clone())
                .with_meta("ip_address", i.ip_address.clone())
                .with_meta("state", i.state.clone())
                .with_meta("region", i.region.clone())
                .with_meta("project", i.project.clone())
        })
        .collect();
    ProviderState::available(
        account,
        resources,
        ProviderExtra::Gcp(GcpExtra { project, instances }),
    )
}

pub struct GcpProvider {
    runner: Arc<dyn CommandRunner>,
    cache: CacheStore,
}

impl GcpProvider {
    pub fn new(runner: Arc<dyn CommandRunner>, cache: CacheStore) -> Self {
        Self { runner, cache }
    }

    async fn current_project(&self) -> Option<String> {
        let out = self
            .runner
            .run("gcloud", &["config", "get-value", "project"], IDENTITY_TIMEOUT)
            .await
            .ok()?;
        let project = out.trim();
        (!project.is_empty() && project != "(unset)").then(|| project.to_string())
    }

    async fn list_instances(&self, project: &str) -> Vec<GcpInstance> {
        match run_json(
            self.runner.as_ref(),
            "gcloud",
            &["sql", "instances", "list", "--project", project, "--format=json"],
            LIST_TIMEOUT,
        )
        .await
        {
            Ok(data) => parse_instances(&data, project),
            Err(e) => {
                warn!("cloud sql listing failed for {}: {}", project, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CloudProvider for GcpProvider {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "GCP"
    }

    fn owns_option(&self, option_id: &str) -> bool {
        option_id.starts_with(INSTANCE_PREFIX) || option_id.starts_with("_gcp_")
    }

    async fn status(&self) -> ProviderStatus {
        match self.runner.run("gcloud", &["--version"], VERSION_TIMEOUT).await {
            Ok(_) => {}
            Err(CommandError::NotInstalled(_) | CommandError::NonZeroExit { .. }) => {
                return ProviderStatus::CliNotInstalled;
            }
            Err(_) => return ProviderStatus::Error,
        }
        match run_json(
            self.runner.as_ref(),
            "gcloud",
            &["auth", "list", "--format=json"],
            IDENTITY_TIMEOUT,
        )
        .await
        {
            Ok(accounts) => {
                let active = accounts
                    .as_array()
                    .into_iter()
                    .flatten()
                    .any(|a| a["status"].as_str() == Some("ACTIVE"));
                if active {
                    ProviderStatus::Available
                } else {
                    ProviderStatus::NotLoggedIn
                }
            }
            Err(_) => ProviderStatus::Error,
        }
    }

    async fn account(&self) -> Option<AccountInfo> {
        let accounts = run_json(
            self.runner.as_ref(),
            "gcloud",
            &["auth", "list", "--filter=status:ACTIVE", "--format=json"],
            IDENTITY_TIMEOUT,
        )
        .await
        .ok()?;
        let username = accounts.as_array()?.first()?["account"].as_str()?.to_string();
        Some(AccountInfo {
            username,
            display_name: None,
            tenant: self.current_project().await,
        })
    }

    async fn login(&self) -> bool {
        self.runner
            .run("gcloud", &["auth", "login"], LOGIN_TIMEOUT)
            .await
            .is_ok()
    }

    async fn logout(&self) -> bool {
        match self.runner.run("gcloud", &["auth", "revoke"], LOGOUT_TIMEOUT).await {
            Ok(_) => {
                self.cache.clear(ID).await;
                true
            }
            Err(e) => {
                warn!("gcloud logout failed: {}", e);
                false
            }
        }
    }

    async fn discover(&self, use_cache: bool) -> ProviderState {
        if use_cache {
            if let Some(entry) = self.cache.load::<GcpCache>(ID).await {
                let c = entry.payload;
                if !c.project.is_empty() {
                    let account = c.account_username.filter(|u| !u.is_empty()).map(|username| {
                        AccountInfo {
                            username,
                            display_name: None,
                            tenant: Some(c.project.clone()),
                        }
                    });
                    return available_state(account, c.project, c.instances);
                }
            }
        }

        let status = self.status().await;
        if status != ProviderStatus::Available {
            info!("gcp discovery stopped: {:?}", status);
            return ProviderState::with_status(status);
        }
        let account = self.account().await;
        let project = match account.as_ref().and_then(|a| a.tenant.clone()) {
            Some(p) => Some(p),
            None => self.current_project().await,
        };
        let Some(project) = project else {
            return ProviderState {
                account,
                ..ProviderState::error(NO_PROJECT)
            };
        };

        let instances = self.list_instances(&project).await;
        self.cache.store(
            ID,
            GcpCache {
                project: project.clone(),
                instances: instances.clone(),
                account_username: account.as_ref().map(|a| a.username.clone()),
            },
        )
        .await;
        available_state(account, project, instances)
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
        let instance = option_id.strip_prefix(INSTANCE_PREFIX).and_then(|name| {
            state
                .extra
                .gcp()
                .and_then(|e| e.instances.iter().find(|i| i.name == name))
        });
        match instance {
            Some(instance) => connect_or_save(action, instance_to_config(instance), saved),
            None => SelectionResult::None,
        }
    }

    fn build_rows(
        &self,
        state: &ProviderState,
        saved: &[ConnectionConfig],
        filter: &str,
    ) -> Vec<PickerRow> {
        let mut rows = vec![PickerRow::header("GCP")];
        if let Some(status) = status_rows(ID, "GCP", "gcloud CLI", state, "Check gcloud configuration") {
            rows.extend(status);
            return rows;
        }
        if let Some(account) = &state.account {
            rows.push(PickerRow::item(
                ACCOUNT_ID,
                account_label(account, false, 40),
                1,
                RowKind::Account,
            ));
        }
        let Some(extra) = state.extra.gcp() else {
            return rows;
        };
        if !extra.project.is_empty() {
            rows.push(PickerRow::status(format!("Project: {}", extra.project), 2));
        }
        if extra.instances.is_empty() {
            rows.push(PickerRow::status("(no Cloud SQL instances in this project)", 2));
            return rows;
        }

        let visible: Vec<&GcpInstance> = extra
            .instances
            .iter()
            .filter(|i| fuzzy_matches(filter, &i.name))
            .collect();
        let count = visible.len();
        for (idx, instance) in visible.into_iter().enumerate() {
            let icon = if instance.is_runnable() { "🟢" } else { "🟡" };
            let already = instance_to_config(instance).is_saved_in(saved);
            rows.push(
                PickerRow::item(
                    format!("{INSTANCE_PREFIX}{}", instance.name),
                    format!(
                        "{}{icon} {} [{}]{}",
                        branch(idx + 1 == count),
                        instance.name,
                        instance.database_version.replace('_', " "),
                        if already { " ✓" } else { "" }
                    ),
                    2,
                    RowKind::Resource,
                )
                .saved(already),
            );
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use std::time::Duration;

    const INSTANCES: &str = r#"[
        {"name":"pg-main","databaseVersion":"POSTGRES_15","connectionName":"proj:us-central1:pg-main",
         "state":"RUNNABLE","region":"us-central1",
         "ipAddresses":[{"type":"OUTGOING","ipAddress":"10.0.0.9"},{"type":"PRIMARY","ipAddress":"34.1.2.3"}]},
        {"name":"mysql-private","databaseVersion":"MYSQL_8_0","connectionName":"proj:europe-west1:mysql-private",
         "state":"STOPPED","region":"europe-west1","ipAddresses":[]}
    ]"#;

    fn logged_in_runner() -> ScriptedRunner {
        ScriptedRunner::new()
            .ok("gcloud --version", "Google Cloud SDK 470.0.0")
            .ok(
                "gcloud auth list",
                r#"[{"account":"dev@example.com","status":"ACTIVE"}]"#,
            )
            .ok("gcloud config get-value project", "proj\n")
            .ok("gcloud sql instances list --project proj", INSTANCES)
            .ok("gcloud auth revoke", "")
    }

    fn provider(runner: Arc<ScriptedRunner>, dir: &std::path::Path) -> GcpProvider {
        GcpProvider::new(runner, CacheStore::new(dir, Duration::from_secs(300)))
    }

    #[tokio::test]
    async fn test_discover_and_config_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let gcp = provider(Arc::new(logged_in_runner()), dir.path());
        let state = gcp.discover(true).await;
        assert!(state.is_available());
        let account = state.account.as_ref().unwrap();
        assert_eq!(account.username, "dev@example.com");
        assert_eq!(account.tenant.as_deref(), Some("proj"));

        let extra = state.extra.gcp().unwrap();
        assert_eq!(extra.instances[0].ip_address.as_deref(), Some("34.1.2.3"));

        let pg = instance_to_config(&extra.instances[0]);
        assert_eq!((pg.db_type.as_str(), pg.port.as_str()), ("postgresql", "5432"));
        assert_eq!(pg.server, "34.1.2.3");
        let my = instance_to_config(&extra.instances[1]);
        assert_eq!((my.db_type.as_str(), my.port.as_str()), ("mysql", "3306"));
        assert_eq!(my.server, "proj:europe-west1:mysql-private");
        assert_eq!(my.option("gcp_region"), Some("europe-west1"));
        assert_eq!(engine_for("SQLSERVER_2019_STANDARD"), ("mssql", 1433));
    }

    #[tokio::test]
    async fn test_missing_project_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("gcloud --version", "sdk")
                .ok("gcloud auth list", r#"[{"account":"dev@example.com","status":"ACTIVE"}]"#)
                .ok("gcloud config get-value project", "(unset)"),
        );
        let state = provider(runner.clone(), dir.path()).discover(true).await;
        assert_eq!(state.status, Some(ProviderStatus::Error));
        assert_eq!(state.error.as_deref(), Some(NO_PROJECT));
        assert_eq!(runner.count_matching("gcloud sql"), 0);
    }

    #[tokio::test]
    async fn test_no_active_account_is_not_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("gcloud --version", "sdk")
                .ok("gcloud auth list", r#"[{"account":"old@example.com","status":""}]"#),
        );
        let gcp = provider(runner, dir.path());
        assert_eq!(gcp.discover(true).await.status, Some(ProviderStatus::NotLoggedIn));
    }

    #[tokio::test]
    async fn test_cache_hit_then_logout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(logged_in_runner());
        let gcp = provider(runner.clone(), dir.path());
        let live = gcp.discover(true).await;
        let calls = runner.call_count();
        assert_eq!(gcp.discover(true).await, live);
        assert_eq!(runner.call_count(), calls);

        assert!(gcp.logout().await);
        assert!(!dir.path().join("gcp_cache.json").exists());
    }

    #[tokio::test]
    async fn test_actions_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let gcp = provider(Arc::new(logged_in_runner()), dir.path());
        let state = gcp.discover(false).await;

        let SelectionResult::Connect(config) =
            gcp.handle_action(PickerAction::Select, "gcp:sql:pg-main", &state, &[])
        else {
            panic!("expected connect");
        };
        assert_eq!(
            gcp.handle_action(PickerAction::Save, "gcp:sql:pg-main", &state, &[config.clone()]),
            SelectionResult::None
        );

        let rows = gcp.build_rows(&state, &[config], "");
        assert!(rows.iter().any(|r| r.label == "Project: proj"));
        let pg = rows
            .iter()
            .find(|r| r.id.as_deref() == Some("gcp:sql:pg-main"))
            .unwrap();
        assert!(pg.saved && pg.label.contains("POSTGRES 15") && pg.label.ends_with(" ✓"));

        let filtered = gcp.build_rows(&state, &[], "mysql");
        let ids: Vec<&str> = filtered.iter().filter_map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec![ACCOUNT_ID, "gcp:sql:mysql-private"]);
    }
}
