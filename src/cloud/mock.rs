//! Canned provider and container states for demos and screenshots.

use std::collections::HashMap;

use super::aws::{self, RdsInstance, RedshiftCluster, RegionResources};
use super::azure::{self, AzureSqlServer, AzureSubscription};
use super::gcp::{self, GcpInstance};
use crate::docker::{ContainerStatus, DetectedContainer, DockerState, DockerStatus};
use crate::model::{AccountInfo, ProviderState};

fn azure_server(
    name: &str,
    location: &str,
    state: &str,
    (has_entra_admin, entra_only_auth): (bool, bool),
    databases: &[&str],
) -> AzureSqlServer {
    AzureSqlServer {
        name: name.into(),
        fqdn: format!("{name}.database.windows.net"),
        resource_group: "rg-production".into(),
        subscription_id: "sub-prod-001".into(),
        subscription_name: "Production".into(),
        location: location.into(),
        admin_login: Some("sqladmin".into()),
        state: state.into(),
        has_entra_admin,
        entra_only_auth,
        databases: databases.iter().map(|d| d.to_string()).collect(),
    }
}

pub fn azure_state() -> ProviderState {
    let subscriptions = [
        ("sub-prod-001", "Production", true),
        ("sub-dev-002", "Development", false),
        ("sub-staging-003", "Staging", false),
    ]
    .into_iter()
    .map(|(id, name, is_default)| AzureSubscription {
        id: id.into(),
        name: name.into(),
        is_default,
    })
    .collect();

    let servers = vec![
        azure_server("prod-sql-main", "eastus", "Ready", (true, false), &["customers", "orders", "inventory"]),
        azure_server("prod-sql-analytics", "westus2", "Ready", (true, true), &["analytics", "reporting"]),
        azure_server("prod-sql-backup", "eastus2", "Paused", (false, false), &["backup_db"]),
    ];

    azure::available_state(
        Some(AccountInfo {
            username: "demo@contoso.com".into(),
            display_name: Some("Demo User".into()),
            tenant: Some("Contoso Corp".into()),
        }),
        subscriptions,
        servers,
        0,
    )
}

fn rds(identifier: &str, engine: &str, region: &str, host_tag: &str, db_name: &str) -> RdsInstance {
    let (port, user) = if engine == "mysql" { (3306, "admin") } else { (5432, "postgres") };
    RdsInstance {
        identifier: identifier.into(),
        engine: engine.into(),
        endpoint: format!("{identifier}.{host_tag}.{region}.rds.amazonaws.com"),
        port,
        status: "available".into(),
        master_username: user.into(),
        db_name: Some(db_name.into()),
        region: region.into(),
    }
}

pub fn aws_state() -> ProviderState {
    // Sorted by region, like a live scan.
    let regions = vec![
        RegionResources {
            region: "ap-southeast-1".into(),
            rds_instances: vec![rds("apac-mysql-prod", "mysql", "ap-southeast-1", "def456", "apac_prod")],
            redshift_clusters: Vec::new(),
        },
        RegionResources {
            region: "eu-west-1".into(),
            rds_instances: vec![rds("eu-postgres-replica", "postgres", "eu-west-1", "xyz789", "replica")],
            redshift_clusters: Vec::new(),
        },
        RegionResources {
            region: "us-east-1".into(),
            rds_instances: vec![
                rds("prod-mysql-main", "mysql", "us-east-1", "abc123", "production"),
                rds("prod-postgres-api", "postgres", "us-east-1", "abc123", "apidb"),
            ],
            redshift_clusters: vec![RedshiftCluster {
                identifier: "analytics-warehouse".into(),
                endpoint: "analytics-warehouse.abc123.us-east-1.redshift.amazonaws.com".into(),
                port: 5439,
                status: "available".into(),
                master_username: "admin".into(),
                db_name: "analytics".into(),
                region: "us-east-1".into(),
            }],
        },
    ];

    aws::available_state(
        regions,
        Some(AccountInfo {
            username: "demo-user".into(),
            display_name: Some("Account 123456789012".into()),
            tenant: Some("123456789012".into()),
        }),
    )
}

pub fn gcp_state() -> ProviderState {
    const PROJECT: &str = "example-project-12345";
    let instances = [
        ("prod-postgres-main", "POSTGRES_15", "us-central1", "35.192.0.1", "RUNNABLE"),
        ("prod-mysql-api", "MYSQL_8_0", "us-central1", "35.192.0.2", "RUNNABLE"),
        ("dev-postgres", "POSTGRES_14", "us-east1", "35.193.0.1", "RUNNABLE"),
        ("staging-mssql", "SQLSERVER_2019_STANDARD", "europe-west1", "35.194.0.1", "STOPPED"),
    ]
    .into_iter()
    .map(|(name, version, region, ip, state)| GcpInstance {
        name: name.into(),
        database_version: version.into(),
        connection_name: format!("{PROJECT}:{region}:{name}"),
        ip_address: Some(ip.into()),
        state: state.into(),
        region: region.into(),
        project: PROJECT.into(),
    })
    .collect();

    gcp::available_state(
        Some(AccountInfo {
            username: "demo@example-project.iam.gserviceaccount.com".into(),
            display_name: None,
            tenant: Some(PROJECT.into()),
        }),
        PROJECT.into(),
        instances,
    )
}

/// Mock states keyed by provider id.
pub fn cloud_states() -> HashMap<&'static str, ProviderState> {
    HashMap::from([
        (azure::ID, azure_state()),
        (aws::ID, aws_state()),
        (gcp::ID, gcp_state()),
    ])
}

pub fn docker_state() -> DockerState {
    let container = |name: &str, db_type: &str, port: Option<u16>, user: &str, status| DetectedContainer {
        container_id: format!("{name}-0123456789ab"),
        container_name: name.into(),
        db_type: db_type.into(),
        host: "localhost".into(),
        port,
        username: Some(user.to_string()).filter(|u| !u.is_empty()),
        password: Some(if user.is_empty() { String::new() } else { "secret".into() }),
        database: None,
        status,
    };
    DockerState {
        status: Some(DockerStatus::Available),
        loading: false,
        containers: vec![
            container("pg-dev", "postgresql", Some(5432), "postgres", ContainerStatus::Running),
            container("mysql-local", "mysql", Some(3307), "root", ContainerStatus::Running),
            container("clickhouse", "clickhouse", Some(8123), "", ContainerStatus::Running),
            container("mssql-old", "mssql", None, "sa", ContainerStatus::Exited),
        ],
    }
}
