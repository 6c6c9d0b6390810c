//! One-shot `--cmd-only` mode.
//!
//! Runs the API's `run` command against a project and mirrors its output
//! on the terminal until it exits.

use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;

use crate::events::Event;
use crate::paths::RUN_API_SCRIPT;
use crate::supervisor::ProcessSupervisor;

const BATCH_PROCESS: &str = "cmd-only";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WeatherImportFormat {
    Plus,
    Old,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WgnImportMethod {
    Database,
    Csv,
}

impl WeatherImportFormat {
    fn as_str(&self) -> &'static str {
        match self {
            WeatherImportFormat::Plus => "plus",
            WeatherImportFormat::Old => "old",
        }
    }
}

impl WgnImportMethod {
    fn as_str(&self) -> &'static str {
        match self {
            WgnImportMethod::Database => "database",
            WgnImportMethod::Csv => "csv",
        }
    }
}

/// Options only meaningful together with `--cmd-only`.
#[derive(Debug, Clone, clap::Args)]
pub struct BatchOptions {
    /// Full path of weather files location (required with --cmd-only).
    #[arg(long)]
    pub weather_dir: Option<String>,
    /// Weather files import format.
    #[arg(long, value_enum, default_value_t = WeatherImportFormat::Plus)]
    pub weather_import_format: WeatherImportFormat,
    /// Where to save converted plus weather files when importing the old format.
    #[arg(long)]
    pub weather_save_dir: Option<String>,
    /// Weather generator import method.
    #[arg(long, value_enum, default_value_t = WgnImportMethod::Database)]
    pub wgn_import_method: WgnImportMethod,
    /// Full path of the wgn database.
    #[arg(long, default_value = "C:/SWAT/SWATPlus/Databases/swatplus_wgn.sqlite")]
    pub wgn_db: String,
    /// Table name in the wgn database.
    #[arg(long, default_value = "wgn_cfsr_world")]
    pub wgn_table: String,
    /// Wgn stations csv file, if import method is csv.
    #[arg(long)]
    pub wgn_csv_sta_file: Option<String>,
    /// Wgn monthly values csv file, if import method is csv.
    #[arg(long)]
    pub wgn_csv_mon_file: Option<String>,
    /// Starting year of simulation (defaults to weather file dates).
    #[arg(long)]
    pub year_start: Option<u32>,
    /// Starting day of simulation.
    #[arg(long)]
    pub day_start: Option<u32>,
    /// Ending year of simulation.
    #[arg(long)]
    pub year_end: Option<u32>,
    /// Ending day of simulation.
    #[arg(long)]
    pub day_end: Option<u32>,
    /// Where to write input files (defaults to Scenarios/Default/TxtInOut).
    #[arg(long)]
    pub input_files_dir: Option<String>,
}

/// Arguments passed to the API's one-shot `run` command.
pub fn build_run_args(
    project_db: &str,
    editor_version: &str,
    swat_exe: &Path,
    opts: &BatchOptions,
) -> Result<Vec<String>> {
    let weather_dir = opts
        .weather_dir
        .as_deref()
        .ok_or_else(|| anyhow!("--weather-dir is required with --cmd-only"))?;
    let mut args = vec![
        "run".to_string(),
        format!("--project_db_file={}", project_db),
        format!("--editor_version={}", editor_version),
        format!("--swat_exe_file={}", swat_exe.display()),
        format!("--weather_dir={}", weather_dir),
        format!("--weather_import_format={}", opts.weather_import_format.as_str()),
        format!("--wgn_import_method={}", opts.wgn_import_method.as_str()),
        format!("--wgn_db={}", opts.wgn_db),
        format!("--wgn_table={}", opts.wgn_table),
    ];

    let optional = [
        ("weather_save_dir", opts.weather_save_dir.clone()),
        ("wgn_csv_sta_file", opts.wgn_csv_sta_file.clone()),
        ("wgn_csv_mon_file", opts.wgn_csv_mon_file.clone()),
        ("year_start", opts.year_start.map(|v| v.to_string())),
        ("day_start", opts.day_start.map(|v| v.to_string())),
        ("year_end", opts.year_end.map(|v| v.to_string())),
        ("day_end", opts.day_end.map(|v| v.to_string())),
        ("input_files_dir", opts.input_files_dir.clone()),
    ];
    for (flag, value) in optional {
        if let Some(value) = value {
            args.push(format!("--{}={}", flag, value));
        }
    }
    Ok(args)
}

/// Runs the one-shot job and returns its exit code.
pub async fn run(
    project_db: &str,
    editor_version: &str,
    opts: &BatchOptions,
    supervisor: &mut ProcessSupervisor,
    events: &mut mpsc::Receiver<Event>,
) -> Result<i32> {
    let interrupt = tokio::signal::ctrl_c();
    run_until(project_db, editor_version, opts, supervisor, events, interrupt).await
}

/// Mirrors the job's output until it closes or `interrupt` resolves.
/// `interrupt` is polled across the whole run, not once per event.
async fn run_until<F>(
    project_db: &str,
    editor_version: &str,
    opts: &BatchOptions,
    supervisor: &mut ProcessSupervisor,
    events: &mut mpsc::Receiver<Event>,
    interrupt: F,
) -> Result<i32>
where
    F: std::future::Future,
{
    let swat_exe = supervisor.paths().swat_exe(false);
    let args = build_run_args(project_db, editor_version, &swat_exe, opts)?;
    tracing::info!(?args, "starting one-shot run");
    let pid = supervisor.spawn_script(BATCH_PROCESS, RUN_API_SCRIPT, args)?;

    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(anyhow!("event channel closed before the run finished"));
                };
                match event {
                    Event::Stdout { chunk, .. } => {
                        let mut out = std::io::stdout().lock();
                        out.write_all(chunk.as_bytes()).context("failed to write stdout")?;
                        out.flush().context("failed to flush stdout")?;
                    }
                    Event::Stderr { text, .. } => {
                        eprint!("stderr: {}", text);
                    }
                    Event::Close { pid: closed, code, .. } if closed == pid => {
                        supervisor.forget(pid);
                        println!("Done.");
                        return Ok(code.unwrap_or(1));
                    }
                    Event::Close { .. } => {}
                }
            }
            _ = &mut interrupt => {
                tracing::info!("interrupted, stopping run");
                let _ = supervisor.kill_all();
                return Ok(130);
            }
        }
    }
}
