use std::path::PathBuf;

use crossterm::event::KeyCode;
use ratatui::widgets::ListState;
use throbber_widgets_tui::ThrobberState;
use tracing::{debug, warn};

use dbscout::connections;
use dbscout::model::{ConnectionConfig, Notice, PickerAction, PickerRow, SelectionResult};
use dbscout::orchestrator::Orchestrator;

pub struct App {
    pub orchestrator: Orchestrator,
    pub rows: Vec<PickerRow>,
    pub saved: Vec<ConnectionConfig>,
    pub connections_path: PathBuf,
    pub selected: usize,
    pub list_state: ListState,
    pub message: Option<Notice>,
    pub search_mode: bool,
    pub search_query: String,
    pub throbber_state: ThrobberState,
    /// Set when the user picked a connection; the picker exits and prints it.
    pub chosen: Option<ConnectionConfig>,
}

impl App {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let connections_path = orchestrator.config().connections_file();
        let saved = connections::load(&connections_path);
        let mut app = Self {
            orchestrator,
            rows: Vec::new(),
            saved,
            connections_path,
            selected: 0,
            list_state: ListState::default(),
            message: None,
            search_mode: false,
            search_query: String::new(),
            throbber_state: ThrobberState::default(),
            chosen: None,
        };
        app.refresh_rows();
        app
    }

    pub fn loading(&self) -> bool {
        self.orchestrator.is_busy()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.rows.get(self.selected).and_then(|r| r.id.clone())
    }

    /// Rebuild rows from the orchestrator, keeping the cursor on the same
    /// option when it still exists.
    pub fn refresh_rows(&mut self) {
        let current = self.selected_id();
        self.rows = self.orchestrator.rows(&self.saved, &self.search_query);
        let same = current.and_then(|id| self.rows.iter().position(|r| r.id.as_deref() == Some(id.as_str())));
        self.selected = match same {
            Some(idx) => idx,
            None => self.first_selectable_from(self.selected.min(self.rows.len().saturating_sub(1))),
        };
        self.list_state.select(Some(self.selected));
    }

    fn first_selectable_from(&self, start: usize) -> usize {
        self.rows
            .iter()
            .enumerate()
            .skip(start)
            .chain(self.rows.iter().enumerate().take(start).rev())
            .find(|(_, r)| r.selectable())
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    pub fn move_down(&mut self) {
        if let Some(next) = (self.selected + 1..self.rows.len()).find(|i| self.rows[*i].selectable()) {
            self.selected = next;
            self.list_state.select(Some(next));
        }
    }

    pub fn move_up(&mut self) {
        if let Some(prev) = (0..self.selected).rev().find(|i| self.rows[*i].selectable()) {
            self.selected = prev;
            self.list_state.select(Some(prev));
        }
    }

    pub fn notify(&mut self, notices: Vec<Notice>) {
        if let Some(last) = notices.into_iter().last() {
            self.message = Some(last);
        }
    }

    /// Pull finished background work into the view.
    pub fn tick(&mut self) {
        let notices = self.orchestrator.drain();
        self.notify(notices);
        self.refresh_rows();
    }

    pub fn refresh(&mut self) {
        self.orchestrator.start_discovery(false);
        self.message = Some(Notice::Info("Refreshing (bypassing cache)...".into()));
        self.refresh_rows();
    }

    /// Run a picker action on the highlighted row.
    pub fn act(&mut self, action: PickerAction) {
        let Some(id) = self.selected_id() else {
            return;
        };
        let result = self.orchestrator.select(action, &id, &self.saved);
        debug!("{:?} on {} -> {:?}", action, id, result);
        match result {
            SelectionResult::Connect(config) => self.chosen = Some(config),
            SelectionResult::Save(config) => {
                match connections::append(&self.connections_path, &config) {
                    Ok(saved) => {
                        self.saved = saved;
                        self.message = Some(Notice::Info(format!("Saved '{}'", config.name)));
                    }
                    Err(e) => {
                        warn!("saving connection failed: {}", e);
                        self.message = Some(Notice::Error(format!("Could not save: {e}")));
                    }
                }
            }
            SelectionResult::Login { provider } => {
                if let Some(notice) = self.orchestrator.login(&provider) {
                    self.message = Some(notice);
                }
            }
            SelectionResult::Logout { provider } => {
                self.message = self
                    .orchestrator
                    .logout(&provider)
                    .or_else(|| Some(Notice::Info(format!("Logging out of {provider}..."))));
            }
            SelectionResult::SwitchSubscription { provider, index } => {
                if self.orchestrator.switch_subscription(&provider, index) {
                    self.message = Some(Notice::Info("Switching subscription...".into()));
                }
            }
            SelectionResult::Expand {
                provider,
                server,
                resource_group,
            } => {
                if self.orchestrator.load_databases(&provider, &server, &resource_group) {
                    self.message = Some(Notice::Info(format!("Loading databases for {server}...")));
                }
            }
            SelectionResult::None => {
                if action == PickerAction::Save && self.rows.get(self.selected).is_some_and(|r| r.saved) {
                    self.message = Some(Notice::Warning("Already saved".into()));
                }
            }
        }
        self.refresh_rows();
    }

    /// Returns `true` when the picker should exit.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        if self.search_mode {
            match code {
                KeyCode::Esc => {
                    self.search_mode = false;
                    self.search_query.clear();
                }
                KeyCode::Enter => self.search_mode = false,
                KeyCode::Backspace => {
                    self.search_query.pop();
                }
                KeyCode::Char(c) => self.search_query.push(c),
                _ => return false,
            }
            self.refresh_rows();
            return false;
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Down | KeyCode::Char('j') => self.move_down(),
            KeyCode::Up | KeyCode::Char('k') => self.move_up(),
            KeyCode::Enter => self.act(PickerAction::Select),
            KeyCode::Char('s') => self.act(PickerAction::Save),
            KeyCode::Char('l') => self.act(PickerAction::Logout),
            KeyCode::Char('L') => self.act(PickerAction::Login),
            KeyCode::Char('r') => self.refresh(),
            KeyCode::Char('/') => {
                self.search_mode = true;
                self.search_query.clear();
            }
            _ => {}
        }
        self.chosen.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscout::command::SystemRunner;
    use dbscout::config::Config;
    use dbscout::registry::Registry;
    use std::sync::Arc;

    fn mock_app(dir: &std::path::Path) -> App {
        let mut config = Config::with_dir(dir);
        config.mock_cloud = true;
        let runner = Arc::new(SystemRunner);
        let registry = Registry::with_defaults(&config, runner.clone());
        let mut orchestrator = Orchestrator::new(config, registry, runner);
        orchestrator.start_discovery(true);
        App::new(orchestrator)
    }

    #[tokio::test]
    async fn test_cursor_skips_headers_and_status_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = mock_app(dir.path());
        assert!(app.rows[app.selected].selectable());
        assert_eq!(app.selected_id().as_deref(), Some("docker:pg-dev-0123456789ab"));

        for _ in 0..200 {
            app.move_down();
            assert!(app.rows[app.selected].selectable());
        }
        let bottom = app.selected;
        app.move_down();
        assert_eq!(app.selected, bottom);

        for _ in 0..200 {
            app.move_up();
        }
        assert_eq!(app.selected_id().as_deref(), Some("docker:pg-dev-0123456789ab"));
    }

    #[tokio::test]
    async fn test_filter_narrows_rows_and_esc_restores() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = mock_app(dir.path());
        let all = app.rows.len();

        app.handle_key(KeyCode::Char('/'));
        for c in "analytics".chars() {
            app.handle_key(KeyCode::Char(c));
        }
        assert!(app.rows.len() < all);
        assert!(app.rows.iter().any(|r| r.label.contains("analytics-warehouse")));
        assert!(!app.rows.iter().any(|r| r.label.contains("pg-dev")));

        app.handle_key(KeyCode::Esc);
        assert!(!app.search_mode);
        assert_eq!(app.rows.len(), all);
    }

    #[tokio::test]
    async fn test_save_then_duplicate_then_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = mock_app(dir.path());

        assert!(!app.handle_key(KeyCode::Char('s')));
        assert_eq!(app.saved.len(), 1);
        assert!(app.connections_path.exists());
        assert!(app.rows[app.selected].saved);

        app.handle_key(KeyCode::Char('s'));
        assert_eq!(app.saved.len(), 1);
        assert_eq!(app.message, Some(Notice::Warning("Already saved".into())));

        assert!(app.handle_key(KeyCode::Enter));
        assert_eq!(app.chosen.as_ref().map(|c| c.name.as_str()), Some("pg-dev"));
    }

    #[tokio::test]
    async fn test_quit_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = mock_app(dir.path());
        assert!(app.handle_key(KeyCode::Char('q')));
        assert!(app.handle_key(KeyCode::Esc));
        assert!(!app.handle_key(KeyCode::Char('x')));
    }
}
