use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

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
use crate::rows::{branch, continuation, fuzzy_matches, status_rows};

pub const ID: &str = "aws";
pub const ACCOUNT_ID: &str = "_aws_account";
pub const LOGIN_ID: &str = "_aws_login";
pub const RDS_PREFIX: &str = "aws:rds:";
pub const REDSHIFT_PREFIX: &str = "aws:redshift:";
pub const REGION_PREFIX: &str = "_aws_region_";

pub const ALL_REGIONS: [&str; 19] = [
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-central-1",
    "eu-north-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-south-1",
    "sa-east-1",
    "ca-central-1",
    "me-south-1",
    "af-south-1",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdsInstance {
    pub identifier: String,
    pub engine: String,
    pub endpoint: String,
    pub port: u16,
    pub status: String,
    pub master_username: String,
    #[serde(default)]
    pub db_name: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedshiftCluster {
    pub identifier: String,
    pub endpoint: String,
    pub port: u16,
    pub status: String,
    pub master_username: String,
    pub db_name: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionResources {
    pub region: String,
    #[serde(default)]
    pub rds_instances: Vec<RdsInstance>,
    #[serde(default)]
    pub redshift_clusters: Vec<RedshiftCluster>,
}

impl RegionResources {
    pub fn has_resources(&self) -> bool {
        !self.rds_instances.is_empty() || !self.redshift_clusters.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwsExtra {
    pub regions: Vec<RegionResources>,
}

impl AwsExtra {
    fn rds(&self, region: &str, identifier: &str) -> Option<&RdsInstance> {
        self.regions
            .iter()
            .filter(|r| r.region == region)
            .flat_map(|r| &r.rds_instances)
            .find(|i| i.identifier == identifier)
    }

    fn redshift(&self, region: &str, identifier: &str) -> Option<&RedshiftCluster> {
        self.regions
            .iter()
            .filter(|r| r.region == region)
            .flat_map(|r| &r.redshift_clusters)
            .find(|c| c.identifier == identifier)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AwsCache {
    regions_with_resources: Vec<RegionResources>,
    #[serde(default)]
    account_username: Option<String>,
    #[serde(default)]
    account_display_name: Option<String>,
    #[serde(default)]
    account_tenant: Option<String>,
}

pub fn engine_db_type(engine: &str) -> &'static str {
    match engine {
        "mysql" | "aurora-mysql" => "mysql",
        "postgres" | "aurora-postgresql" => "postgresql",
        "mariadb" => "mariadb",
        e if e.starts_with("oracle-") => "oracle",
        e if e.starts_with("sqlserver-") => "mssql",
        _ => "postgresql",
    }
}

/// `arn:aws:iam::123:user/alice` -> alice; assumed roles yield the session name.
pub fn parse_caller_identity(identity: &Value) -> AccountInfo {
    let arn = identity["Arn"].as_str().unwrap_or_default();
    let account_id = identity["Account"].as_str().unwrap_or_default();
    let username = match arn.rsplit_once('/') {
        Some((_, tail)) => tail,
        None => arn.rsplit(':').next().unwrap_or_default(),
    };
    AccountInfo {
        username: username.to_string(),
        display_name: Some(format!("Account {account_id}")),
        tenant: Some(account_id.to_string()),
    }
}

fn parse_rds(data: &Value, region: &str) -> Vec<RdsInstance> {
    let Some(items) = data["DBInstances"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|db| {
            let endpoint = db.get("Endpoint").filter(|e| e.is_object())?;
            Some(RdsInstance {
                identifier: db["DBInstanceIdentifier"].as_str().unwrap_or_default().to_string(),
                engine: db["Engine"].as_str().unwrap_or_default().to_string(),
                endpoint: endpoint["Address"].as_str().unwrap_or_default().to_string(),
                port: endpoint["Port"].as_u64().and_then(|p| u16::try_from(p).ok()).unwrap_or(3306),
                status: db["DBInstanceStatus"].as_str().unwrap_or_default().to_string(),
                master_username: db["MasterUsername"].as_str().unwrap_or_default().to_string(),
                db_name: db["DBName"].as_str().map(str::to_string),
                region: region.to_string(),
            })
        })
        .collect()
}

fn parse_redshift(data: &Value, region: &str) -> Vec<RedshiftCluster> {
    let Some(items) = data["Clusters"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|c| {
            let endpoint = c.get("Endpoint").filter(|e| e.is_object())?;
            Some(RedshiftCluster {
                identifier: c["ClusterIdentifier"].as_str().unwrap_or_default().to_string(),
                endpoint: endpoint["Address"].as_str().unwrap_or_default().to_string(),
                port: endpoint["Port"].as_u64().and_then(|p| u16::try_from(p).ok()).unwrap_or(5439),
                status: c["ClusterStatus"].as_str().unwrap_or_default().to_string(),
                master_username: c["MasterUsername"].as_str().unwrap_or_default().to_string(),
                db_name: c["DBName"].as_str().unwrap_or("dev").to_string(),
                region: region.to_string(),
            })
        })
        .collect()
}

/// One region, two listing calls. A failed call contributes nothing.
async fn scan_region(runner: Arc<dyn CommandRunner>, region: String) -> RegionResources {
    let rds = match run_json(
        runner.as_ref(),
        "aws",
        &["rds", "describe-db-instances", "--region", &region, "--output", "json"],
        LIST_TIMEOUT,
    )
    .await
    {
        Ok(data) => parse_rds(&data, &region),
        Err(e) => {
            debug!("rds listing failed in {}: {}", region, e);
            Vec::new()
        }
    };
    let redshift = match run_json(
        runner.as_ref(),
        "aws",
        &["redshift", "describe-clusters", "--region", &region, "--output", "json"],
        LIST_TIMEOUT,
    )
    .await
    {
        Ok(data) => parse_redshift(&data, &region),
        Err(e) => {
            debug!("redshift listing failed in {}: {}", region, e);
            Vec::new()
        }
    };
    RegionResources {
        region,
        rds_instances: rds,
        redshift_clusters: redshift,
    }
}

pub fn rds_to_config(instance: &RdsInstance) -> ConnectionConfig {
    let mut config = ConnectionConfig {
        name: instance.identifier.clone(),
        db_type: engine_db_type(&instance.engine).to_string(),
        server: instance.endpoint.clone(),
        port: instance.port.to_string(),
        database: instance.db_name.clone().unwrap_or_default(),
        username: instance.master_username.clone(),
        password: None,
        source: Some(ID.into()),
        options: Default::default(),
    };
    config
        .options
        .insert("aws_rds_identifier".into(), instance.identifier.clone());
    config.options.insert("aws_region".into(), instance.region.clone());
    config.options.insert("aws_engine".into(), instance.engine.clone());
    config
}

pub fn redshift_to_config(cluster: &RedshiftCluster) -> ConnectionConfig {
    let mut config = ConnectionConfig {
        name: cluster.identifier.clone(),
        db_type: "redshift".into(),
        server: cluster.endpoint.clone(),
        port: cluster.port.to_string(),
        database: cluster.db_name.clone(),
        username: cluster.master_username.clone(),
        password: None,
        source: Some(ID.into()),
        options: Default::default(),
    };
    config
        .options
        .insert("aws_redshift_identifier".into(), cluster.identifier.clone());
    config.options.insert("aws_region".into(), cluster.region.clone());
    config
}

fn resources_from(regions: &[RegionResources]) -> Vec<CloudResource> {
    regions
        .iter()
        .map(|r| {
            let region_id = format!("region_{}", r.region);
            let mut node = CloudResource::new(ID, region_id.clone(), r.region.clone(), "region");
            for i in &r.rds_instances {
                let mut child = CloudResource::new(
                    ID,
                    format!("rds_{}_{}", i.region, i.identifier),
                    i.identifier.clone(),
                    "rds_instance",
                )
                .with_meta("engine", i.engine.clone())
                .with_meta("endpoint", i.endpoint.clone())
                .with_meta("port", i.port)
                .with_meta("status", i.status.clone())
                .with_meta("region", i.region.clone());
                child.parent_id = Some(region_id.clone());
                node.children.push(child);
            }
            for c in &r.redshift_clusters {
                let mut child = CloudResource::new(
                    ID,
                    format!("redshift_{}_{}", c.region, c.identifier),
                    c.identifier.clone(),
                    "redshift_cluster",
                )
                .with_meta("endpoint", c.endpoint.clone())
                .with_meta("port", c.port)
                .with_meta("status", c.status.clone())
                .with_meta("region", c.region.clone());
                child.parent_id = Some(region_id.clone());
                node.children.push(child);
            }
            node
        })
        .collect()
}

pub(crate) fn available_state(regions: Vec<RegionResources>, account: Option<AccountInfo>) -> ProviderState {
    ProviderState::available(
        account,
        resources_from(&regions),
        ProviderExtra::Aws(AwsExtra { regions }),
    )
}

pub struct AwsProvider {
    runner: Arc<dyn CommandRunner>,
    cache: CacheStore,
    regions: Vec<String>,
    concurrency: usize,
}

impl AwsProvider {
    pub fn new(runner: Arc<dyn CommandRunner>, cache: CacheStore, concurrency: usize) -> Self {
        Self {
            runner,
            cache,
            regions: ALL_REGIONS.iter().map(|r| r.to_string()).collect(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_regions(mut self, regions: &[&str]) -> Self {
        self.regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }

    /// All regions in parallel, bounded by `concurrency`. Regions without
    /// resources (or that failed) are dropped; the rest come back sorted.
    pub async fn discover_all_regions(&self) -> Vec<RegionResources> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();
        for region in self.regions.iter().cloned() {
            let permit = sem.clone();
            let runner = self.runner.clone();
            handles.push(tokio::spawn(async move {
                let _p = permit.acquire_owned().await.ok()?;
                Some(scan_region(runner, region).await)
            }));
        }

        let mut found = Vec::new();
        for h in handles {
            match h.await {
                Ok(Some(r)) if r.has_resources() => found.push(r),
                Ok(_) => {}
                Err(e) => warn!("aws region scan task failed: {}", e),
            }
        }
        found.sort_by(|a, b| a.region.cmp(&b.region));
        debug!("aws: {} regions with resources", found.len());
        found
    }

    fn parse_item_id<'a>(option_id: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
        option_id.strip_prefix(prefix)?.split_once(':')
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn id(&self) -> &'static str {
        ID
    }

    fn name(&self) -> &'static str {
        "AWS"
    }

    fn owns_option(&self, option_id: &str) -> bool {
        option_id.starts_with(RDS_PREFIX)
            || option_id.starts_with(REDSHIFT_PREFIX)
            || option_id.starts_with("_aws_")
    }

    async fn status(&self) -> ProviderStatus {
        match self.runner.run("aws", &["--version"], VERSION_TIMEOUT).await {
            Ok(_) => {}
            Err(CommandError::NotInstalled(_) | CommandError::NonZeroExit { .. }) => {
                return ProviderStatus::CliNotInstalled;
            }
            Err(_) => return ProviderStatus::Error,
        }
        match self
            .runner
            .run("aws", &["sts", "get-caller-identity"], IDENTITY_TIMEOUT)
            .await
        {
            Ok(_) => ProviderStatus::Available,
            Err(CommandError::NonZeroExit { .. }) => ProviderStatus::NotLoggedIn,
            Err(CommandError::NotInstalled(_)) => ProviderStatus::CliNotInstalled,
            Err(_) => ProviderStatus::Error,
        }
    }

    async fn account(&self) -> Option<AccountInfo> {
        run_json(
            self.runner.as_ref(),
            "aws",
            &["sts", "get-caller-identity", "--output", "json"],
            IDENTITY_TIMEOUT,
        )
        .await
        .ok()
        .map(|v| parse_caller_identity(&v))
    }

    async fn login(&self) -> bool {
        self.runner
            .run("aws", &["sso", "login"], LOGIN_TIMEOUT)
            .await
            .is_ok()
    }

    async fn logout(&self) -> bool {
        match self.runner.run("aws", &["sso", "logout"], LOGOUT_TIMEOUT).await {
            Ok(_) => {
                self.cache.clear(ID).await;
                true
            }
            Err(e) => {
                warn!("aws logout failed: {}", e);
                false
            }
        }
    }

    async fn discover(&self, use_cache: bool) -> ProviderState {
        if use_cache {
            if let Some(entry) = self.cache.load::<AwsCache>(ID).await {
                let c = entry.payload;
                let account = c.account_username.filter(|u| !u.is_empty()).map(|username| {
                    AccountInfo {
                        username,
                        display_name: c.account_display_name,
                        tenant: c.account_tenant,
                    }
                });
                return available_state(c.regions_with_resources, account);
            }
        }

        let status = self.status().await;
        if status != ProviderStatus::Available {
            info!("aws discovery stopped: {:?}", status);
            return ProviderState::with_status(status);
        }
        let account = self.account().await;
        let regions = self.discover_all_regions().await;
        self.cache.store(
            ID,
            AwsCache {
                regions_with_resources: regions.clone(),
                account_username: account.as_ref().map(|a| a.username.clone()),
                account_display_name: account.as_ref().and_then(|a| a.display_name.clone()),
                account_tenant: account.as_ref().and_then(|a| a.tenant.clone()),
            },
        )
        .await;
        available_state(regions, account)
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
        let Some(extra) = state.extra.aws() else {
            return SelectionResult::None;
        };
        if let Some((region, identifier)) = Self::parse_item_id(option_id, RDS_PREFIX) {
            if let Some(instance) = extra.rds(region, identifier) {
                return connect_or_save(action, rds_to_config(instance), saved);
            }
        }
        if let Some((region, identifier)) = Self::parse_item_id(option_id, REDSHIFT_PREFIX) {
            if let Some(cluster) = extra.redshift(region, identifier) {
                return connect_or_save(action, redshift_to_config(cluster), saved);
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
        let mut rows = vec![PickerRow::header("AWS")];
        if let Some(status) = status_rows(ID, "AWS", "AWS CLI", state, "Check 'aws sts get-caller-identity'") {
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
        let regions = state.extra.aws().map(|e| e.regions.as_slice()).unwrap_or_default();
        if regions.is_empty() {
            rows.push(PickerRow::status("(no databases found in any region)", 2));
            return rows;
        }

        let visible: Vec<(&RegionResources, Vec<PickerRow>)> = regions
            .iter()
            .map(|region| {
                let mut items = Vec::new();
                for i in &region.rds_instances {
                    if !fuzzy_matches(filter, &i.identifier) {
                        continue;
                    }
                    let config = rds_to_config(i);
                    let icon = if i.status == "available" { "🟢" } else { "🟡" };
                    items.push(
                        PickerRow::item(
                            format!("{RDS_PREFIX}{}:{}", region.region, i.identifier),
                            format!("{icon} {} [{}]", i.identifier, i.engine),
                            3,
                            RowKind::Resource,
                        )
                        .saved(config.is_saved_in(saved)),
                    );
                }
                for c in &region.redshift_clusters {
                    if !fuzzy_matches(filter, &c.identifier) {
                        continue;
                    }
                    let config = redshift_to_config(c);
                    let icon = if c.status == "available" { "🟢" } else { "🟡" };
                    items.push(
                        PickerRow::item(
                            format!("{REDSHIFT_PREFIX}{}:{}", region.region, c.identifier),
                            format!("{icon} {} [Redshift]", c.identifier),
                            3,
                            RowKind::Resource,
                        )
                        .saved(config.is_saved_in(saved)),
                    );
                }
                (region, items)
            })
            .filter(|(_, items)| filter.is_empty() || !items.is_empty())
            .collect();

        let region_count = visible.len();
        for (idx, (region, items)) in visible.into_iter().enumerate() {
            let last_region = idx + 1 == region_count;
            rows.push(PickerRow::item(
                format!("{REGION_PREFIX}{}", region.region),
                format!("{}📍 {}", branch(last_region), region.region),
                2,
                RowKind::Group,
            ));
            let item_count = items.len();
            for (i, mut row) in items.into_iter().enumerate() {
                let last_item = i + 1 == item_count;
                row.label = format!(
                    "{}{}{}{}",
                    continuation(last_region),
                    branch(last_item),
                    row.label,
                    if row.saved { " ✓" } else { "" }
                );
                rows.push(row);
            }
        }
        rows
    }
}
