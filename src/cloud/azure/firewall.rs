use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use super::AzureSqlServer;
use crate::command::{CommandRunner, LIST_TIMEOUT, run_json};
use crate::error::CommandError;

static FIREWALL_IP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Client with IP address '(\d+\.\d+\.\d+\.\d+)'").expect("firewall IP pattern")
});

/// SQL Server rejects blocked clients with a message that names
/// `sp_set_firewall_rule`.
pub fn is_firewall_error(message: &str) -> bool {
    message.contains("sp_set_firewall_rule")
}

pub fn parse_ip_from_firewall_error(message: &str) -> Option<String> {
    FIREWALL_IP
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `myserver.database.windows.net` -> `myserver`.
pub fn parse_server_name_from_hostname(hostname: &str) -> Option<String> {
    let lower = hostname.to_ascii_lowercase();
    let name = lower.strip_suffix(".database.windows.net")?;
    (!name.is_empty() && !name.contains('.')).then(|| name.to_string())
}

pub fn rule_name(ip: &str) -> String {
    format!("dbscout-{}", ip.replace('.', "-"))
}

/// Open the server firewall for a single address. Returns the rule name.
pub async fn add_firewall_rule(
    runner: &dyn CommandRunner,
    server: &str,
    resource_group: &str,
    ip: &str,
    subscription: Option<&str>,
) -> Result<String, CommandError> {
    let name = rule_name(ip);
    let mut args = vec![
        "sql", "server", "firewall-rule", "create", "--resource-group", resource_group,
        "--server", server, "--name", &name, "--start-ip-address", ip, "--end-ip-address", ip,
        "-o", "json",
    ];
    if let Some(sub) = subscription.filter(|s| !s.is_empty()) {
        args.extend(["--subscription", sub]);
    }
    match runner.run("az", &args, LIST_TIMEOUT).await {
        Ok(_) => {
            info!("added firewall rule {} on {}", name, server);
            Ok(name)
        }
        Err(e) => {
            warn!("firewall rule on {} failed: {}", server, e);
            Err(e)
        }
    }
}

/// Find a server by name across the current subscription. Needed when only
/// the hostname of a failing connection is known.
pub async fn lookup_server(runner: &dyn CommandRunner, name: &str) -> Option<AzureSqlServer> {
    let name = jmespath_raw(name);
    let query = format!(
        "[?name=='{name}'].{{name:name, fqdn:fullyQualifiedDomainName, resourceGroup:resourceGroup, location:location, adminLogin:administratorLogin}}"
    );
    let data = run_json(
        runner,
        "az",
        &["sql", "server", "list", "--query", &query, "-o", "json"],
        LIST_TIMEOUT,
    )
    .await
    .ok()?;
    let s = data.as_array()?.first()?;
    Some(AzureSqlServer {
        name: s["name"].as_str()?.to_string(),
        fqdn: s["fqdn"].as_str().unwrap_or_default().to_string(),
        resource_group: s["resourceGroup"].as_str().unwrap_or_default().to_string(),
        location: s["location"].as_str().unwrap_or_default().to_string(),
        admin_login: s["adminLogin"].as_str().map(str::to_string),
        ..Default::default()
    })
}

/// Body of a JMESPath raw string literal: backslash and quote are escaped.
fn jmespath_raw(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
