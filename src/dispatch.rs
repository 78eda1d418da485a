use std::sync::Arc;

use tracing::debug;

use crate::cloud::connect_or_save;
use crate::docker::{DockerState, OPTION_PREFIX};
use crate::model::{ConnectionConfig, PickerAction, ProviderState, SelectionResult};
use crate::registry::Registry;

/// Turn a picker action on a row id into a result. Container rows are handled
/// here; everything else goes to the provider owning the id.
pub fn dispatch(
    registry: &Registry,
    states: &dyn Fn(&str) -> Option<Arc<ProviderState>>,
    docker: &DockerState,
    action: PickerAction,
    option_id: &str,
    saved: &[ConnectionConfig],
) -> SelectionResult {
    if let Some(container_id) = option_id.strip_prefix(OPTION_PREFIX) {
        let Some(container) = docker.find(container_id) else {
            debug!("unknown container {}", container_id);
            return SelectionResult::None;
        };
        // A stopped container can still be saved for later.
        if action == PickerAction::Select && !container.connectable() {
            return SelectionResult::None;
        }
        return connect_or_save(action, container.to_config(), saved);
    }

    let Some(provider) = registry.owner_of(option_id) else {
        debug!("no provider owns {}", option_id);
        return SelectionResult::None;
    };
    let state = states(provider.id()).unwrap_or_default();
    provider.handle_action(action, option_id, &state, saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::mock;
    use crate::command::testing::ScriptedRunner;
    use crate::config::Config;

    fn fixture(dir: &std::path::Path) -> (Registry, DockerState) {
        let registry = Registry::with_defaults(&Config::with_dir(dir), Arc::new(ScriptedRunner::new()));
        (registry, mock::docker_state())
    }

    fn mock_states(id: &str) -> Option<Arc<ProviderState>> {
        mock::cloud_states().remove(id).map(Arc::new)
    }

    #[test]
    fn test_container_connect_save_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, docker) = fixture(dir.path());
        let id = "docker:pg-dev-0123456789ab";

        let SelectionResult::Connect(cfg) =
            dispatch(&registry, &mock_states, &docker, PickerAction::Select, id, &[])
        else {
            panic!("expected connect");
        };
        assert_eq!(cfg.db_type, "postgresql");
        assert_eq!(cfg.port, "5432");
        assert_eq!(cfg.source.as_deref(), Some("docker"));

        assert!(matches!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Save, id, &[]),
            SelectionResult::Save(_)
        ));
        assert_eq!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Save, id, &[cfg]),
            SelectionResult::None
        );
    }

    #[test]
    fn test_stopped_container_only_saves() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, docker) = fixture(dir.path());
        let id = "docker:mssql-old-0123456789ab";
        assert_eq!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Select, id, &[]),
            SelectionResult::None
        );
        assert!(matches!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Save, id, &[]),
            SelectionResult::Save(c) if c.port == "1433"
        ));
    }

    #[test]
    fn test_routes_to_owning_provider() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, docker) = fixture(dir.path());

        assert_eq!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Select, "_azure_sub_1", &[]),
            SelectionResult::SwitchSubscription {
                provider: "azure".into(),
                index: 1
            }
        );
        assert_eq!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Logout, "_aws_account", &[]),
            SelectionResult::Logout {
                provider: "aws".into()
            }
        );
        assert_eq!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Select, "docker:gone", &[]),
            SelectionResult::None
        );
        assert_eq!(
            dispatch(&registry, &mock_states, &docker, PickerAction::Select, "oracle:x", &[]),
            SelectionResult::None
        );
    }
}
