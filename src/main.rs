//! swatplus-shell: desktop shell for the SWAT+ Editor.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads configuration, starts the API process on a free port
//! and then serves the UI bridge until the application quits. With
//! `--cmd-only` it runs a single batch job instead.

mod batch;
mod bridge;
mod config;
mod events;
mod paths;
mod port;
mod project;
mod relay;
mod shutdown;
mod store;
mod supervisor;
mod tools;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::batch::BatchOptions;
use crate::bridge::{BridgeHandle, Command, Globals, Shell};
use crate::config::{AppSettings, ShellConfig};
use crate::events::Event;
use crate::paths::{PathResolver, Platform, REST_API_SCRIPT};
use crate::shutdown::{AppPhase, Lifecycle, ShutdownCoordinator, DEFAULT_SHUTDOWN_TIMEOUT_MS};
use crate::store::SettingsStore;
use crate::supervisor::ProcessSupervisor;

const API_PROCESS: &str = "api";
const CONFIG_FILE: &str = "swatplus-shell.toml";
const DEV_ENV: &str = "SWATPLUS_SHELL_DEV";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "swatplus-shell",
    version,
    about = "Desktop shell for the SWAT+ Editor",
    styles = help_styles(),
    after_help = "Examples:\n  swatplus-shell path/to/project-database.sqlite\n  \
                  swatplus-shell path/to/project-database.sqlite --cmd-only --weather-dir=path/to/weather_files"
)]
struct Cli {
    /// Path to a project database to open.
    project_db: Option<String>,
    /// Run in command line only mode (the weather/wgn options apply to this mode).
    #[arg(long)]
    cmd_only: bool,
    #[command(flatten)]
    batch: BatchOptions,
    /// Path to swatplus-shell.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any swatplus-shell.toml in the current directory.
    #[arg(long)]
    no_config: bool,
    /// Directory containing the static/ resources.
    #[arg(long)]
    app_root: Option<PathBuf>,
    /// Run API scripts from the source tree.
    #[arg(long)]
    dev: bool,
    /// First port to try for the API.
    #[arg(long)]
    base_port: Option<u16>,
    /// Time to wait for the API to stop itself on quit (ms).
    #[arg(long)]
    shutdown_timeout_ms: Option<u64>,
    /// Location of the persisted settings store.
    #[arg(long)]
    store: Option<PathBuf>,
    /// Interpreter executable used for API scripts (taken verbatim).
    #[arg(long)]
    python: Option<String>,
    /// Extra interpreter arguments placed before the script, e.g. "-3 -X utf8".
    #[arg(long, allow_hyphen_values = true)]
    python_args: Option<String>,
    /// Log filter (e.g. "debug").
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_shell_config(&cli)?;
    let settings = RunSettings::from_cli(&cli, config)?;
    init_logging(&settings.log_filter);

    let app_settings = config::load_app_settings(&settings.app_root)?;
    let paths = PathResolver::new(
        settings.dev_mode,
        settings.app_root.clone(),
        &app_settings,
        settings.python_path.as_deref(),
        &settings.python_args,
        Platform::current(),
    )?;
    tracing::debug!(layout = ?paths.layout(), platform = paths.platform().as_str(), "resolved paths");
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let mut supervisor = ProcessSupervisor::new(paths, event_tx);

    if cli.cmd_only {
        let project_db = cli
            .project_db
            .as_deref()
            .context("--cmd-only needs a project database")?;
        let editor_version = app_settings.version.clone().unwrap_or_default();
        let code = batch::run(
            project_db,
            &editor_version,
            &cli.batch,
            &mut supervisor,
            &mut event_rx,
        )
        .await?;
        return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
    }

    let project_db = if settings.dev_mode {
        None
    } else {
        cli.project_db.clone()
    };
    run_interactive(settings, app_settings, supervisor, event_rx, project_db).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_interactive(
    settings: RunSettings,
    app_settings: AppSettings,
    mut supervisor: ProcessSupervisor,
    event_rx: mpsc::Receiver<Event>,
    project_db: Option<String>,
) -> Result<()> {
    let mut lifecycle = Lifecycle::new();

    let port = match port::allocate_port(settings.base_port) {
        Ok(port) => port,
        Err(err) => {
            tracing::error!(error = %err, "could not find port");
            return Err(err.context("startup aborted"));
        }
    };

    let store_path = settings
        .store_path
        .clone()
        .or_else(SettingsStore::default_path)
        .context("no location for the settings store")?;
    let store = SettingsStore::open(store_path)?;
    tracing::debug!(path = %store.path().display(), "settings store opened");

    match supervisor.spawn_script(API_PROCESS, REST_API_SCRIPT, vec![port.to_string()]) {
        Ok(pid) => tracing::info!(port, pid, "API started"),
        Err(err) => tracing::error!(error = %format!("{:#}", err), "API failed to start"),
    }
    lifecycle.advance(AppPhase::Running)?;

    let globals = Globals {
        dev_mode: settings.dev_mode,
        platform: supervisor.paths().platform().as_str().to_string(),
        project_db,
        api_port: Some(port),
    };
    let coordinator = ShutdownCoordinator::new(Some(port), settings.shutdown_timeout);
    let shell = Shell::new(
        supervisor,
        store,
        app_settings,
        globals,
        lifecycle,
        coordinator,
    );

    let (handle, calls) = bridge::channel();
    spawn_signal_listener(handle.clone());
    let (out, stdio) = bridge::serve_stdio(handle);
    let _report = shell.run(calls, event_rx, out).await;
    stdio.close().await;
    Ok(())
}

fn spawn_signal_listener(handle: BridgeHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("signal received, quitting");
        let _ = handle.call(Command::Quit).await;
    });
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_shell_config(cli: &Cli) -> Result<ShellConfig> {
    if cli.no_config {
        return Ok(ShellConfig::default());
    }
    let path = cli.config.clone().or_else(default_config_path);
    match path {
        Some(path) => config::load_config(&path),
        None => Ok(ShellConfig::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(CONFIG_FILE);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    dev_mode: bool,
    app_root: PathBuf,
    base_port: u16,
    shutdown_timeout: Duration,
    store_path: Option<PathBuf>,
    python_path: Option<String>,
    python_args: Vec<String>,
    log_filter: String,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: ShellConfig) -> Result<Self> {
        let dev_mode = cli.dev
            || std::env::var(DEV_ENV)
                .map(|value| is_truthy(&value))
                .unwrap_or(false);
        let app_root = match cli.app_root.clone().or(config.app_root) {
            Some(root) => root,
            None => default_app_root(dev_mode)?,
        };
        let base_port = cli
            .base_port
            .or(config.base_port)
            .unwrap_or(port::DEFAULT_BASE_PORT);
        let shutdown_timeout = Duration::from_millis(
            cli.shutdown_timeout_ms
                .or(config.shutdown_timeout_ms)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        );
        let store_path = cli.store.clone().or(config.store_path);
        let python_path = cli.python.clone().or(config.python_path);
        let python_args = match &cli.python_args {
            Some(raw) => shell_words::split(raw)
                .with_context(|| format!("failed to parse --python-args {}", raw))?,
            None => config.python_args.unwrap_or_default(),
        };
        let log_filter = cli
            .log_level
            .clone()
            .or(config.log_level)
            .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
            .unwrap_or_else(|| "info".to_string());
        Ok(Self {
            dev_mode,
            app_root,
            base_port,
            shutdown_timeout,
            store_path,
            python_path,
            python_args,
            log_filter,
        })
    }
}

fn default_app_root(dev_mode: bool) -> Result<PathBuf> {
    if dev_mode {
        return std::env::current_dir().context("failed to read current directory");
    }
    let exe = std::env::current_exe().context("failed to locate executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::parse_from([
            "swatplus-shell",
            "--app-root",
            "/cli",
            "--base-port",
            "7000",
            "--log-level",
            "debug",
            "demo.sqlite",
        ]);
        let config = ShellConfig {
            base_port: Some(6000),
            shutdown_timeout_ms: Some(500),
            app_root: Some(PathBuf::from("/config")),
            python_path: Some("python3".into()),
            ..ShellConfig::default()
        };
        let settings = RunSettings::from_cli(&cli, config).unwrap();
        assert_eq!(settings.app_root, PathBuf::from("/cli"));
        assert_eq!(settings.base_port, 7000);
        assert_eq!(settings.shutdown_timeout, Duration::from_millis(500));
        assert_eq!(settings.python_path.as_deref(), Some("python3"));
        assert_eq!(settings.log_filter, "debug");
        assert_eq!(cli.project_db.as_deref(), Some("demo.sqlite"));
    }

    #[test]
    fn python_args_from_cli_replace_config() {
        let cli = Cli::parse_from([
            "swatplus-shell",
            "--app-root",
            "/app",
            "--python",
            "C:/Program Files/Python/python.exe",
            "--python-args",
            "-3 -X utf8",
        ]);
        let config = ShellConfig {
            python_args: Some(vec!["-B".into()]),
            ..ShellConfig::default()
        };
        let settings = RunSettings::from_cli(&cli, config).unwrap();
        assert_eq!(
            settings.python_path.as_deref(),
            Some("C:/Program Files/Python/python.exe")
        );
        assert_eq!(settings.python_args, vec!["-3", "-X", "utf8"]);

        let cli = Cli::parse_from(["swatplus-shell", "--app-root", "/app"]);
        let config = ShellConfig {
            python_args: Some(vec!["-B".into()]),
            ..ShellConfig::default()
        };
        let settings = RunSettings::from_cli(&cli, config).unwrap();
        assert_eq!(settings.python_args, vec!["-B"]);
    }

    #[test]
    fn defaults_apply_without_config() {
        let cli = Cli::parse_from(["swatplus-shell", "--app-root", "/app"]);
        let settings = RunSettings::from_cli(&cli, ShellConfig::default()).unwrap();
        assert_eq!(settings.base_port, port::DEFAULT_BASE_PORT);
        assert_eq!(
            settings.shutdown_timeout,
            Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS)
        );
        assert!(settings.store_path.is_none());
    }

    #[test]
    fn cmd_only_flags_parse() {
        let cli = Cli::parse_from([
            "swatplus-shell",
            "demo.sqlite",
            "--cmd-only",
            "--weather-dir=/w",
            "--wgn-table",
            "wgn_local",
        ]);
        assert!(cli.cmd_only);
        assert_eq!(cli.batch.weather_dir.as_deref(), Some("/w"));
        assert_eq!(cli.batch.wgn_table, "wgn_local");
    }

    #[test]
    fn truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
