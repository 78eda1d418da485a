//! Flattening of discovery state into picker rows.

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use crate::config::Config;
use crate::docker::{DockerState, DockerStatus};
use crate::model::{ConnectionConfig, PickerRow, ProviderState, ProviderStatus, RowKind};
use crate::registry::Registry;

/// Empty filters match everything.
pub fn fuzzy_matches(filter: &str, text: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    SkimMatcherV2::default().fuzzy_match(text, filter).is_some()
}

pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{head}...")
}

pub fn branch(is_last: bool) -> &'static str {
    if is_last { "└── " } else { "├── " }
}

pub fn continuation(is_last: bool) -> &'static str {
    if is_last { "    " } else { "│   " }
}

/// Rows for every non-available status, shared by all providers. Returns
/// `None` once the provider is available and should render its own tree.
pub fn status_rows(
    prefix: &str,
    name: &str,
    cli: &str,
    state: &ProviderState,
    error_hint: &str,
) -> Option<Vec<PickerRow>> {
    if state.loading {
        return Some(vec![PickerRow::status("Loading...", 1)]);
    }
    let rows = match state.status {
        None => vec![PickerRow::status("Waiting...", 1)],
        Some(ProviderStatus::Available) => return None,
        Some(ProviderStatus::CliNotInstalled) => {
            vec![PickerRow::status(format!("({cli} not installed)"), 1)]
        }
        Some(ProviderStatus::NotLoggedIn) => vec![PickerRow::item(
            format!("_{prefix}_login"),
            format!("Login to {name}..."),
            1,
            RowKind::Action,
        )],
        Some(ProviderStatus::Error) => {
            let msg = state.error.as_deref().unwrap_or(error_hint);
            vec![
                PickerRow::status(format!("⚠ {name} error"), 1).dimmed(false),
                PickerRow::status(truncate(msg, 60), 2),
            ]
        }
        Some(ProviderStatus::NotSupported) => vec![PickerRow::status("(coming soon)", 1)],
    };
    Some(rows)
}

pub fn docker_rows(
    state: &DockerState,
    saved: &[ConnectionConfig],
    filter: &str,
    config: &Config,
) -> Vec<PickerRow> {
    let mut rows = vec![PickerRow::header("Docker")];
    if state.loading {
        rows.push(PickerRow::status("Scanning containers...", 1));
        return rows;
    }
    match state.status {
        None => {
            rows.push(PickerRow::status("Waiting...", 1));
            return rows;
        }
        Some(DockerStatus::NotInstalled) => {
            rows.push(PickerRow::status("(Docker not installed)", 1));
            return rows;
        }
        Some(DockerStatus::NotRunning) => {
            rows.push(PickerRow::status("(Docker daemon not running)", 1));
            return rows;
        }
        Some(DockerStatus::NotAccessible) => {
            rows.push(PickerRow::status(
                "(Docker not accessible, check socket permissions)",
                1,
            ));
            return rows;
        }
        Some(DockerStatus::Available) => {}
    }

    let visible: Vec<_> = state
        .containers
        .iter()
        .filter(|c| fuzzy_matches(filter, &c.container_name))
        .collect();
    if visible.is_empty() {
        rows.push(PickerRow::status("(no database containers found)", 1));
        return rows;
    }

    for container in visible {
        let icon = if container.is_running() { "🟢" } else { "⚪" };
        let mut label = format!("{icon} {}", container.display_name());
        match container.port {
            Some(port) if container.is_running() => label.push_str(&format!(" :{port}")),
            _ if container.is_running() => label.push_str(" (no published port)"),
            _ => label.push_str(" (stopped)"),
        }
        if config.driver_missing(&container.db_type) {
            label.push_str(" [driver missing]");
        }
        let saved_already = container.to_config().is_saved_in(saved);
        if saved_already {
            label.push_str(" ✓");
        }
        rows.push(
            PickerRow::item(container.option_id(), label, 1, RowKind::Resource)
                .saved(saved_already)
                .dimmed(saved_already || !container.connectable()),
        );
    }
    rows
}

/// All picker rows: containers first, then each provider in display order.
pub fn picker_rows(
    registry: &Registry,
    states: &dyn Fn(&str) -> Option<std::sync::Arc<ProviderState>>,
    docker: &DockerState,
    saved: &[ConnectionConfig],
    filter: &str,
    config: &Config,
) -> Vec<PickerRow> {
    let mut rows = docker_rows(docker, saved, filter, config);
    for provider in registry.iter() {
        let state = states(provider.id()).unwrap_or_default();
        rows.extend(provider.build_rows(&state, saved, filter));
    }
    rows
}
