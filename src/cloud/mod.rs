//! Cloud provider adapters.
//!
//! Every adapter talks to its provider through the vendor CLI via a shared
//! [`CommandRunner`](crate::command::CommandRunner) and keeps one snapshot file
//! in the [`CacheStore`](crate::cache::CacheStore).

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod mock;

use async_trait::async_trait;

use crate::model::{
    AccountInfo, ConnectionConfig, PickerAction, PickerRow, ProviderState, ProviderStatus,
    SelectionResult,
};

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Stable identifier, also the cache file stem.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Whether a picker option id lives in this provider's namespace.
    fn owns_option(&self, option_id: &str) -> bool;

    async fn status(&self) -> ProviderStatus;

    async fn account(&self) -> Option<AccountInfo>;

    async fn login(&self) -> bool;

    /// Logs out and, on success, drops the cached snapshot.
    async fn logout(&self) -> bool;

    /// A fresh cache is served without touching the CLI. Otherwise the
    /// status is checked first and nothing else is called unless available.
    async fn discover(&self, use_cache: bool) -> ProviderState;

    fn handle_action(
        &self,
        action: PickerAction,
        option_id: &str,
        state: &ProviderState,
        saved: &[ConnectionConfig],
    ) -> SelectionResult;

    fn build_rows(
        &self,
        state: &ProviderState,
        saved: &[ConnectionConfig],
        filter: &str,
    ) -> Vec<PickerRow>;

    /// Re-scope discovery to another subscription. Providers without
    /// subscriptions return `None`.
    async fn switch_subscription(&self, _state: &ProviderState, _index: usize) -> Option<ProviderState> {
        None
    }

    /// Lazily list the databases of one server.
    async fn load_databases(
        &self,
        _state: &ProviderState,
        _server: &str,
        _resource_group: &str,
    ) -> Option<Vec<String>> {
        None
    }

    /// Copy of `state` with one server's database list replaced. Other
    /// servers keep whatever they already had.
    fn merge_databases(
        &self,
        _state: &ProviderState,
        _server: &str,
        _resource_group: &str,
        _databases: Vec<String>,
    ) -> Option<ProviderState> {
        None
    }
}

/// Account line used by every provider: `username (tenant)`, shortened.
pub(crate) fn account_label(account: &AccountInfo, with_tenant: bool, max: usize) -> String {
    let mut label = account.username.clone();
    if with_tenant {
        if let Some(tenant) = account.tenant.as_deref().filter(|t| !t.is_empty()) {
            label = format!("{label} ({tenant})");
        }
    }
    format!("👤 {}", crate::rows::truncate(&label, max))
}

/// Generic login/logout/switch handling for the account and login rows.
pub(crate) fn account_action(
    provider: &str,
    action: PickerAction,
    option_id: &str,
    account_id: &str,
    login_id: &str,
) -> Option<SelectionResult> {
    if option_id == login_id {
        return Some(SelectionResult::Login {
            provider: provider.to_string(),
        });
    }
    if option_id == account_id {
        return Some(match action {
            PickerAction::Logout => SelectionResult::Logout {
                provider: provider.to_string(),
            },
            PickerAction::Login => SelectionResult::Login {
                provider: provider.to_string(),
            },
            _ => SelectionResult::None,
        });
    }
    None
}

/// Save rejects duplicates; select always connects.
pub(crate) fn connect_or_save(
    action: PickerAction,
    config: ConnectionConfig,
    saved: &[ConnectionConfig],
) -> SelectionResult {
    match action {
        PickerAction::Save if config.is_saved_in(saved) => SelectionResult::None,
        PickerAction::Save => SelectionResult::Save(config),
        PickerAction::Select => SelectionResult::Connect(config),
        _ => SelectionResult::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_action_routes() {
        let login = account_action("aws", PickerAction::Select, "_aws_login", "_aws_account", "_aws_login");
        assert_eq!(
            login,
            Some(SelectionResult::Login {
                provider: "aws".into()
            })
        );
        let logout = account_action("aws", PickerAction::Logout, "_aws_account", "_aws_account", "_aws_login");
        assert!(matches!(logout, Some(SelectionResult::Logout { .. })));
        let noop = account_action("aws", PickerAction::Select, "_aws_account", "_aws_account", "_aws_login");
        assert_eq!(noop, Some(SelectionResult::None));
        assert_eq!(
            account_action("aws", PickerAction::Select, "aws:rds:x:y", "_aws_account", "_aws_login"),
            None
        );
    }

    #[test]
    fn test_account_label() {
        let acct = AccountInfo {
            username: "alice".into(),
            display_name: None,
            tenant: Some("123".into()),
        };
        assert_eq!(account_label(&acct, true, 45), "👤 alice (123)");
        assert_eq!(account_label(&acct, false, 45), "👤 alice");
    }
}
