use std::io;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::prelude::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;

mod app;
mod backend;
mod config;
mod counters;
mod error;
mod events;
mod form;
mod markdown;
mod orchestrator;
mod plan;
mod resources;
mod theme;
mod ui;

use app::App;
use backend::HttpBackend;
use config::AppConfig;
use counters::{CounterStore, MemoryCounterStore, SqliteCounterStore};
use events::AppEvent;
use ui::ui;

fn load_env() {
    // Project-local .env first, then the user-level one.
    let _ = dotenvy::dotenv();
    if let Some(dir) = config::app_dir() {
        let user_env = dir.join(".env");
        if user_env.exists() {
            let _ = dotenvy::from_path(user_env);
        }
    }
}

/// Logs go to ~/.planglow/planglow.log; the terminal belongs to the UI.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("PLANGLOW_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let Some(dir) = config::app_dir() else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("planglow.log"));
    let Ok(file) = file else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
}

fn open_store(config: &AppConfig) -> Arc<dyn CounterStore> {
    let Some(path) = config.store_path() else {
        tracing::warn!("no home directory; counters kept in memory");
        return Arc::new(MemoryCounterStore::new());
    };
    match SqliteCounterStore::open(&path) {
        Ok(store) => {
            tracing::info!(path = %path.display(), "counter store opened");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "counter store unavailable; keeping counters in memory");
            Arc::new(MemoryCounterStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    load_env();

    let args: Vec<String> = std::env::args().collect();
    let mut participant: Option<String> = None;
    if args.len() > 1 {
        match args[1].as_str() {
            "help" | "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            id if !id.starts_with('-') => participant = Some(id.to_string()),
            other => {
                eprintln!("Unknown option: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
    }

    init_logging();

    let config = AppConfig::load();
    let backend = Arc::new(HttpBackend::new(config.backend_url(), config.request_timeout()));
    tracing::info!(backend = %config.backend_url(), "starting");
    let store = open_store(&config);

    enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;
    io::stdout().execute(EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();

    let input_tx = event_tx.clone();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(50)).unwrap_or(false) {
                match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        let _ = input_tx.send(AppEvent::Input(key));
                    }
                    Ok(Event::Mouse(mouse)) => {
                        let _ = input_tx.send(AppEvent::Mouse(mouse));
                    }
                    _ => {}
                }
            }
        }
    });

    let mut app = App::new(event_tx, backend, store, config);
    if let Some(id) = participant {
        app.enter_participant(&id);
    }

    loop {
        terminal.draw(|frame| ui(frame, &mut app))?;

        match tokio::time::timeout(Duration::from_millis(16), event_rx.recv()).await {
            Ok(Some(event)) => app.handle_event(event),
            Ok(None) => break,
            Err(_) => app.tick(),
        }

        if app.should_quit {
            break;
        }
    }

    disable_raw_mode()?;
    io::stdout().execute(DisableMouseCapture)?;
    io::stdout().execute(LeaveAlternateScreen)?;

    if let Some(tracker) = app.counter_tracker() {
        let left = tracker.flush().await;
        if left > 0 {
            tracing::warn!(pending = left, "exiting with unsent counter increments");
        }
    }

    Ok(())
}

fn print_help() {
    println!("planglow - study plan chat client");
    println!();
    println!("USAGE:");
    println!("    planglow                  Start and ask for a participant ID");
    println!("    planglow <PARTICIPANT>    Start as the given participant");
    println!("    planglow help             Show this help message");
    println!();
    println!(
        "ENVIRONMENT:
    PLANGLOW_BACKEND_URL      Backend base URL (default http://localhost:1350)
    REACT_APP_BACKEND_URL     Also accepted for the backend URL
    PLANGLOW_PARTICIPANT      Prefills the participant ID
    PLANGLOW_LOG              Log filter, e.g. debug or planglow=trace

FILES:
    ~/.planglow/config.toml   Backend, store, fetch and theme settings
    ~/.planglow/.env          Environment overrides
    ~/.planglow/planglow.log  Log output"
    );
}
