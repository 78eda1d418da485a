use futures::StreamExt;
use futures::stream;
use serde_json::Value;
use tracing::debug;

use super::{AzureSqlServer, AzureSubscription};
use crate::command::{CHECK_TIMEOUT, CommandRunner, LIST_TIMEOUT, SLOW_LIST_TIMEOUT, run_json};
use crate::error::CommandError;

const SERVER_QUERY: &str = "[].{name:name, fqdn:fullyQualifiedDomainName, resourceGroup:resourceGroup, location:location, adminLogin:administratorLogin, state:state}";

fn with_subscription<'a>(mut args: Vec<&'a str>, subscription: Option<&'a str>) -> Vec<&'a str> {
    if let Some(sub) = subscription.filter(|s| !s.is_empty()) {
        args.extend(["--subscription", sub]);
    }
    args
}

pub async fn list_subscriptions(runner: &dyn CommandRunner) -> Result<Vec<AzureSubscription>, CommandError> {
    let data = run_json(
        runner,
        "az",
        &[
            "account",
            "list",
            "--query",
            "[].{id:id, name:name, isDefault:isDefault}",
            "-o",
            "json",
        ],
        LIST_TIMEOUT,
    )
    .await?;
    let subs = data
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|s| {
            Some(AzureSubscription {
                id: s["id"].as_str()?.to_string(),
                name: s["name"].as_str().unwrap_or_default().to_string(),
                is_default: s["isDefault"].as_bool().unwrap_or(false),
            })
        })
        .collect();
    Ok(subs)
}

/// A non-empty admin list means an Entra admin is configured.
pub async fn check_entra_admin(
    runner: &dyn CommandRunner,
    server: &str,
    resource_group: &str,
    subscription: Option<&str>,
) -> bool {
    let args = with_subscription(
        vec![
            "sql", "server", "ad-admin", "list", "--server", server, "--resource-group",
            resource_group, "-o", "json",
        ],
        subscription,
    );
    match run_json(runner, "az", &args, CHECK_TIMEOUT).await {
        Ok(Value::Array(admins)) => !admins.is_empty(),
        Ok(_) => false,
        Err(e) => {
            debug!("entra admin check failed for {}: {}", server, e);
            false
        }
    }
}

pub async fn check_entra_only(
    runner: &dyn CommandRunner,
    server: &str,
    resource_group: &str,
    subscription: Option<&str>,
) -> bool {
    let args = with_subscription(
        vec![
            "sql", "server", "ad-only-auth", "get", "--name", server, "--resource-group",
            resource_group, "-o", "json",
        ],
        subscription,
    );
    match run_json(runner, "az", &args, CHECK_TIMEOUT).await {
        Ok(v) => v["azureAdOnlyAuthentication"].as_bool().unwrap_or(false),
        Err(e) => {
            debug!("entra-only check failed for {}: {}", server, e);
            false
        }
    }
}

/// SQL servers in one subscription, with their Entra configuration checked
/// `concurrency` servers at a time. Databases are left empty.
pub async fn list_servers(
    runner: &dyn CommandRunner,
    subscription: &AzureSubscription,
    concurrency: usize,
) -> Result<Vec<AzureSqlServer>, CommandError> {
    let args = with_subscription(
        vec!["sql", "server", "list", "--query", SERVER_QUERY, "-o", "json"],
        Some(&subscription.id),
    );
    let data = run_json(runner, "az", &args, SLOW_LIST_TIMEOUT).await?;

    let servers: Vec<AzureSqlServer> = data
        .as_array()
        .into_iter()
        .flatten()
        .map(|s| AzureSqlServer {
            name: s["name"].as_str().unwrap_or_default().to_string(),
            fqdn: s["fqdn"].as_str().unwrap_or_default().to_string(),
            resource_group: s["resourceGroup"].as_str().unwrap_or_default().to_string(),
            subscription_id: subscription.id.clone(),
            subscription_name: subscription.name.clone(),
            location: s["location"].as_str().unwrap_or_default().to_string(),
            admin_login: s["adminLogin"].as_str().map(str::to_string),
            state: s["state"].as_str().unwrap_or("Ready").to_string(),
            has_entra_admin: false,
            entra_only_auth: false,
            databases: Vec::new(),
        })
        .collect();

    let checked = stream::iter(servers)
        .map(|mut server| async move {
            let sub = Some(server.subscription_id.as_str());
            server.has_entra_admin =
                check_entra_admin(runner, &server.name, &server.resource_group, sub).await;
            // Entra-only can only be on when an admin exists.
            if server.has_entra_admin {
                server.entra_only_auth =
                    check_entra_only(runner, &server.name, &server.resource_group, sub).await;
            }
            server
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    // buffer_unordered scrambles the listing order.
    let mut checked = checked;
    checked.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("azure: {} servers in {}", checked.len(), subscription.name);
    Ok(checked)
}

/// Database names on one server, minus `master`.
pub async fn list_databases(
    runner: &dyn CommandRunner,
    server: &str,
    resource_group: &str,
    subscription: Option<&str>,
) -> Result<Vec<String>, CommandError> {
    let args = with_subscription(
        vec![
            "sql", "db", "list", "--server", server, "--resource-group", resource_group,
            "--query", "[].name", "-o", "json",
        ],
        subscription,
    );
    let data = run_json(runner, "az", &args, SLOW_LIST_TIMEOUT).await?;
    Ok(data
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|db| !db.eq_ignore_ascii_case("master"))
        .map(str::to_string)
        .collect())
}
