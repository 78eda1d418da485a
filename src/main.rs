use std::env;
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CEvent, KeyEvent, KeyEventKind};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use dbscout::command::{CommandRunner, SystemRunner};
use dbscout::config::Config;
use dbscout::orchestrator::Orchestrator;

mod app;
mod ui;

use app::App;
use ui::draw_ui;

const LOG_FILE: &str = "dbscout.log";

fn init_tracing() -> Result<(), Box<dyn Error>> {
    let file = OpenOptions::new().create(true).append(true).open(LOG_FILE)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let fmt_layer = fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_target(false);
    Registry::default().with(filter).with(fmt_layer).init();
    info!("Tracing initialized to {} (debug)", LOG_FILE);
    Ok(())
}

fn run(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<(), Box<dyn Error>> {
    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    loop {
        if last_tick.elapsed() >= tick_rate {
            app.tick();
            if app.loading() {
                app.throbber_state.calc_next();
            }
            terminal.draw(|f| draw_ui(f, app))?;
            last_tick = Instant::now();
        }

        if event::poll(Duration::from_millis(20))? {
            if let CEvent::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind != KeyEventKind::Press {
                    continue;
                }
                if app.handle_key(code) {
                    return Ok(());
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    let debug_mode = args.iter().any(|s| s == "--debug");
    let refresh = args.iter().any(|s| s == "--refresh");

    dotenv::dotenv().ok();
    if debug_mode {
        init_tracing()?;
    }

    let config = Config::from_env();
    info!("Starting dbscout (config dir {})", config.config_dir.display());
    debug!("{:?}", config);

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let registry = dbscout::registry::Registry::with_defaults(&config, runner.clone());
    let mut orchestrator = Orchestrator::new(config, registry, runner);
    orchestrator.start_discovery(!refresh);
    let mut app = App::new(orchestrator);

    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    crossterm::terminal::enable_raw_mode()?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = tokio::task::block_in_place(|| run(&mut terminal, &mut app));

    crossterm::terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result?;

    if let Some(config) = app.chosen.take() {
        info!("Selected {} ({})", config.name, config.db_type);
        println!("{}", serde_json::to_string_pretty(&config)?);
    }
    info!("Exiting dbscout");
    Ok(())
}
