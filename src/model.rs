use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cloud::aws::AwsExtra;
use crate::cloud::azure::AzureExtra;
use crate::cloud::gcp::GcpExtra;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Available,
    NotLoggedIn,
    CliNotInstalled,
    Error,
    NotSupported,
}

/// Who the provider CLI is authenticated as. Semantics vary: an IAM ARN tail
/// for AWS, an email for Azure and GCP.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    pub username: String,
    pub display_name: Option<String>,
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CloudResource {
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub provider_id: String,
    pub parent_id: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub children: Vec<CloudResource>,
}

impl CloudResource {
    pub fn new(
        provider_id: &str,
        id: impl Into<String>,
        name: impl Into<String>,
        resource_type: &str,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resource_type: resource_type.to_string(),
            provider_id: provider_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Provider-specific discovery payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ProviderExtra {
    #[default]
    None,
    Azure(AzureExtra),
    Aws(AwsExtra),
    Gcp(GcpExtra),
}

impl ProviderExtra {
    pub fn azure(&self) -> Option<&AzureExtra> {
        match self {
            Self::Azure(extra) => Some(extra),
            _ => None,
        }
    }

    pub fn aws(&self) -> Option<&AwsExtra> {
        match self {
            Self::Aws(extra) => Some(extra),
            _ => None,
        }
    }

    pub fn gcp(&self) -> Option<&GcpExtra> {
        match self {
            Self::Gcp(extra) => Some(extra),
            _ => None,
        }
    }
}

/// Snapshot of one provider. Never mutated once published; every transition
/// builds a new value. `status == None` means discovery has not run yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderState {
    pub status: Option<ProviderStatus>,
    pub account: Option<AccountInfo>,
    pub loading: bool,
    pub error: Option<String>,
    pub resources: Vec<CloudResource>,
    pub extra: ProviderExtra,
}

impl ProviderState {
    pub fn with_status(status: ProviderStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(ProviderStatus::Error),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn available(
        account: Option<AccountInfo>,
        resources: Vec<CloudResource>,
        extra: ProviderExtra,
    ) -> Self {
        Self {
            status: Some(ProviderStatus::Available),
            account,
            loading: false,
            error: None,
            resources,
            extra,
        }
    }

    /// Copy of `self` flagged as loading. Keeps the previous cycle's data
    /// visible until the new one lands.
    pub fn reloading(&self) -> Self {
        Self {
            loading: true,
            ..self.clone()
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == Some(ProviderStatus::Available)
    }
}

/// Connection profile handed to the SQL adapter collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub db_type: String,
    pub server: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    /// `None` means unknown (prompt); `Some("")` means no password needed.
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Same origin, endpoint, database and auth type. Names are ignored.
    pub fn same_target(&self, other: &ConnectionConfig) -> bool {
        self.source == other.source
            && self.server.eq_ignore_ascii_case(&other.server)
            && self.port == other.port
            && self.database == other.database
            && self.option("auth_type") == other.option("auth_type")
    }

    pub fn is_saved_in(&self, saved: &[ConnectionConfig]) -> bool {
        saved.iter().any(|c| c.same_target(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerAction {
    Select,
    Save,
    Login,
    Logout,
    SwitchSubscription,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionResult {
    Connect(ConnectionConfig),
    Save(ConnectionConfig),
    Login { provider: String },
    Logout { provider: String },
    SwitchSubscription { provider: String, index: usize },
    Expand {
        provider: String,
        server: String,
        resource_group: String,
    },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Header,
    Status,
    Account,
    Group,
    Resource,
    Action,
}

/// One displayable line. Rows without an id are not selectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerRow {
    pub id: Option<String>,
    pub label: String,
    pub depth: u8,
    pub kind: RowKind,
    pub saved: bool,
    pub dimmed: bool,
}

impl PickerRow {
    pub fn header(label: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            depth: 0,
            kind: RowKind::Header,
            saved: false,
            dimmed: false,
        }
    }

    pub fn status(label: impl Into<String>, depth: u8) -> Self {
        Self {
            id: None,
            label: label.into(),
            depth,
            kind: RowKind::Status,
            saved: false,
            dimmed: true,
        }
    }

    pub fn item(id: impl Into<String>, label: impl Into<String>, depth: u8, kind: RowKind) -> Self {
        Self {
            id: Some(id.into()),
            label: label.into(),
            depth,
            kind,
            saved: false,
            dimmed: false,
        }
    }

    pub fn saved(mut self, saved: bool) -> Self {
        self.saved = saved;
        self.dimmed = self.dimmed || saved;
        self
    }

    pub fn dimmed(mut self, dimmed: bool) -> Self {
        self.dimmed = dimmed;
        self
    }

    pub fn selectable(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Warning(String),
    Error(String),
}

impl Notice {
    pub fn text(&self) -> &str {
        match self {
            Self::Info(s) | Self::Warning(s) | Self::Error(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure_conn(name: &str, auth: &str) -> ConnectionConfig {
        let mut c = ConnectionConfig {
            name: name.into(),
            db_type: "mssql".into(),
            server: "srv.database.windows.net".into(),
            port: "1433".into(),
            database: "orders".into(),
            source: Some("azure".into()),
            ..Default::default()
        };
        c.options.insert("auth_type".into(), auth.into());
        c
    }

    #[test]
    fn test_same_target_ignores_name_but_not_auth() {
        let a = azure_conn("prod", "sql");
        let b = azure_conn("renamed", "sql");
        let c = azure_conn("prod", "ad_default");
        assert!(a.same_target(&b));
        assert!(!a.same_target(&c));
        assert!(b.is_saved_in(&[c.clone(), a.clone()]));
        assert!(!c.is_saved_in(&[a]));
    }

    #[test]
    fn test_password_never_serialized() {
        let mut c = azure_conn("prod", "sql");
        c.password = Some("hunter2".into());
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("hunter2"));
        let back: ConnectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.password, None);
        assert_eq!(back.option("auth_type"), Some("sql"));
    }

    #[test]
    fn test_reloading_keeps_previous_data() {
        let prev = ProviderState::available(
            Some(AccountInfo {
                username: "me".into(),
                ..Default::default()
            }),
            vec![CloudResource::new("gcp", "sql_a", "a", "cloud_sql_instance")],
            ProviderExtra::None,
        );
        let next = prev.reloading();
        assert!(next.loading);
        assert_eq!(next.resources, prev.resources);
        assert_eq!(next.account, prev.account);
        assert!(!prev.loading);
    }
}
