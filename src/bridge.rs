//! UI bridge and control loop.
//!
//! The UI talks to the shell with JSON lines on stdin/stdout. Inside the
//! shell every request becomes a `BridgeCall` carrying a oneshot reply, so
//! callers await a result while the control loop never blocks on them.
//! Process events are pushed to the UI as they arrive.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::AppSettings;
use crate::events::{ChannelKind, Event};
use crate::paths;
use crate::project::{self, ProjectSettings};
use crate::shutdown::{Lifecycle, ShutdownCoordinator, ShutdownReport};
use crate::store::SettingsStore;
use crate::supervisor::{ManagedProcess, ProcessSupervisor};
use crate::tools::{self, ExternalTool};

/// Requests the UI can make.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    Globals,
    GetAppSettings,
    GetAppPath,
    SpawnProcess {
        name: String,
        script: String,
        #[serde(default)]
        args: Vec<String>,
    },
    RunSwat {
        #[serde(default = "default_swat_name")]
        name: String,
        #[serde(default)]
        debug: bool,
        input_dir: PathBuf,
    },
    KillProcess {
        pid: u32,
    },
    ListProcesses,
    GetProcess {
        pid: u32,
    },
    FindProcesses {
        name: String,
    },
    AddToStore {
        key: String,
        value: Value,
    },
    GetStoreSetting {
        key: String,
    },
    DeleteFromStore {
        key: String,
    },
    GetRecentProjects,
    GetMostRecentProject,
    PushRecentProject {
        project: ProjectSettings,
    },
    DeleteRecentProject {
        project: ProjectSettings,
    },
    VersionSupport {
        version: String,
    },
    ProjectPaths {
        project_db: PathBuf,
    },
    PathExists {
        path: String,
    },
    JoinPaths {
        paths: Vec<String>,
    },
    PathDirectoryName {
        path: String,
    },
    GetToolPath {
        tool: ExternalTool,
    },
    LaunchTool {
        tool: ExternalTool,
        project_db: String,
    },
    Quit,
}

fn default_swat_name() -> String {
    "swat".to_string()
}

#[derive(Debug, Deserialize)]
struct IncomingRequest {
    id: u64,
    #[serde(flatten)]
    command: Command,
}

/// A line written to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Outgoing {
    Response {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        ok: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Event {
        channel: String,
        data: Value,
    },
}

impl Outgoing {
    fn response(id: u64, result: Result<Value>) -> Self {
        match result {
            Ok(value) => Outgoing::Response {
                id,
                ok: Some(value),
                error: None,
            },
            Err(err) => Outgoing::Response {
                id,
                ok: None,
                error: Some(format!("{:#}", err)),
            },
        }
    }
}

impl From<&Event> for Outgoing {
    fn from(event: &Event) -> Self {
        Outgoing::Event {
            channel: event.channel(),
            data: event.payload(),
        }
    }
}

/// Values the UI needs before it can talk to the API.
#[derive(Debug, Clone, Serialize)]
pub struct Globals {
    pub dev_mode: bool,
    pub platform: String,
    pub project_db: Option<String>,
    pub api_port: Option<u16>,
}

pub struct BridgeCall {
    command: Command,
    reply: oneshot::Sender<Result<Value, String>>,
}

#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<BridgeCall>,
}

impl BridgeHandle {
    pub async fn call(&self, command: Command) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BridgeCall { command, reply })
            .await
            .map_err(|_| anyhow!("control loop has stopped"))?;
        rx.await
            .map_err(|_| anyhow!("control loop dropped the request"))?
            .map_err(|err| anyhow!(err))
    }
}

pub fn channel() -> (BridgeHandle, mpsc::Receiver<BridgeCall>) {
    let (tx, rx) = mpsc::channel(64);
    (BridgeHandle { tx }, rx)
}

/// State owned by the control loop.
pub struct Shell {
    supervisor: ProcessSupervisor,
    store: SettingsStore,
    settings: AppSettings,
    globals: Globals,
    lifecycle: Lifecycle,
    coordinator: ShutdownCoordinator,
}

impl Shell {
    pub fn new(
        supervisor: ProcessSupervisor,
        store: SettingsStore,
        settings: AppSettings,
        globals: Globals,
        lifecycle: Lifecycle,
        coordinator: ShutdownCoordinator,
    ) -> Self {
        Self {
            supervisor,
            store,
            settings,
            globals,
            lifecycle,
            coordinator,
        }
    }

    /// Serves bridge calls and forwards process events until a quit request
    /// arrives or every bridge handle is gone, then shuts down.
    pub async fn run(
        mut self,
        mut calls: mpsc::Receiver<BridgeCall>,
        mut events: mpsc::Receiver<Event>,
        out: mpsc::UnboundedSender<Outgoing>,
    ) -> Option<ShutdownReport> {
        let _ = out.send(Outgoing::Event {
            channel: "ready".to_string(),
            data: json!(self.globals),
        });

        loop {
            tokio::select! {
                call = calls.recv() => {
                    let Some(call) = call else {
                        tracing::info!("bridge closed");
                        break;
                    };
                    if call.command == Command::Quit {
                        let _ = call.reply.send(Ok(Value::Null));
                        break;
                    }
                    let result = self.handle(call.command).map_err(|err| format!("{:#}", err));
                    let _ = call.reply.send(result);
                }
                Some(event) = events.recv() => {
                    tracing::trace!(channel = %event.channel(), pid = event.pid(), "process event");
                    self.observe(&event);
                    let _ = out.send(Outgoing::from(&event));
                }
            }
        }

        self.coordinator
            .shutdown(&mut self.lifecycle, &mut self.supervisor)
            .await
    }

    fn observe(&mut self, event: &Event) {
        match event {
            Event::Stdout { .. } => {}
            Event::Stderr { name, pid, text } => {
                tracing::debug!(%name, pid, stderr = %text.trim_end(), "process stderr");
            }
            Event::Close { name, pid, code } => {
                self.supervisor.forget_closed(*pid, name);
                tracing::info!(%name, pid, ?code, remaining = self.supervisor.len(), "process exited");
            }
        }
    }

    fn handle(&mut self, command: Command) -> Result<Value> {
        match command {
            Command::Globals => Ok(json!(self.globals)),
            Command::GetAppSettings => Ok(serde_json::to_value(&self.settings)?),
            Command::GetAppPath => Ok(serde_json::to_value(self.supervisor.paths().static_dir())?),
            Command::SpawnProcess { name, script, args } => {
                let pid = self.supervisor.spawn_script(&name, &script, args)?;
                Ok(json!(pid))
            }
            Command::RunSwat {
                name,
                debug,
                input_dir,
            } => {
                let pid = self.supervisor.run_swat(&name, debug, input_dir)?;
                Ok(json!(pid))
            }
            Command::KillProcess { pid } => {
                let killed = self.supervisor.kill(pid).is_done();
                Ok(json!({ "killed": killed }))
            }
            Command::ListProcesses => Ok(Value::Array(
                self.supervisor.processes().map(process_json).collect(),
            )),
            Command::GetProcess { pid } => {
                Ok(self.supervisor.get(pid).map(process_json).unwrap_or(Value::Null))
            }
            Command::FindProcesses { name } => Ok(Value::Array(
                self.supervisor.by_name(&name).map(process_json).collect(),
            )),
            Command::AddToStore { key, value } => {
                self.store.set(&key, value)?;
                Ok(Value::Null)
            }
            Command::GetStoreSetting { key } => Ok(self.store.get(&key).cloned().unwrap_or(Value::Null)),
            Command::DeleteFromStore { key } => Ok(json!(self.store.delete(&key)?)),
            Command::GetRecentProjects => Ok(json!(self.store.recent_projects())),
            Command::GetMostRecentProject => Ok(json!(self.store.most_recent_project())),
            Command::PushRecentProject { project } => {
                Ok(json!(self.store.push_recent_project(project)?))
            }
            Command::DeleteRecentProject { project } => Ok(json!(self
                .store
                .delete_recent_project(project.project_db.as_deref())?)),
            Command::VersionSupport { version } => Ok(json!(project::version_support(
                self.settings.version.as_deref(),
                &version
            ))),
            Command::ProjectPaths { project_db } => {
                Ok(serde_json::to_value(project::project_paths(&project_db))?)
            }
            Command::PathExists { path } => Ok(json!(paths::path_exists(&path))),
            Command::JoinPaths { paths: parts } => Ok(serde_json::to_value(paths::join_paths(&parts))?),
            Command::PathDirectoryName { path } => {
                Ok(serde_json::to_value(paths::directory_name(&path))?)
            }
            Command::GetToolPath { tool } => Ok(serde_json::to_value(tools::tool_path(
                tool,
                &self.settings,
                self.supervisor.paths().platform(),
            ))?),
            Command::LaunchTool { tool, project_db } => Ok(json!(tools::launch_tool(
                tool,
                &self.settings,
                self.supervisor.paths().platform(),
                &project_db
            ))),
            Command::Quit => Ok(Value::Null),
        }
    }
}

/// Running stdio transport.
pub struct StdioBridge {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl StdioBridge {
    /// Stops reading requests and waits until every queued line is written.
    pub async fn close(self) {
        self.reader.abort();
        let _ = self.reader.await;
        let _ = self.writer.await;
    }
}

fn process_json(process: &ManagedProcess) -> Value {
    json!({
        "pid": process.pid,
        "name": process.name,
        "program": process.program,
        "uptime_ms": process.started_at.elapsed().as_millis() as u64,
        "stdout": process.channel(ChannelKind::Stdout),
        "stderr": process.channel(ChannelKind::Stderr),
        "close": process.channel(ChannelKind::Close),
    })
}

/// Connects stdin/stdout to the control loop. The returned sender is the
/// control loop's output; the writer ends once it and the reader are gone.
pub fn serve_stdio(handle: BridgeHandle) -> (mpsc::UnboundedSender<Outgoing>, StdioBridge) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = spawn_output_writer(out_rx);

    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    spawn_stdin_listener(line_tx);

    let reader_out = out_tx.clone();
    let reader = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            if line.trim().is_empty() {
                continue;
            }
            let response = match parse_request(&line) {
                Ok(request) => Outgoing::response(request.id, handle.call(request.command).await),
                Err((id, err)) => Outgoing::response(id, Err(err)),
            };
            if reader_out.send(response).is_err() {
                return;
            }
        }
        // stdin closed: the UI is gone.
        tracing::info!("stdin closed, quitting");
        let _ = handle.call(Command::Quit).await;
    });

    (out_tx, StdioBridge { reader, writer })
}

fn parse_request(line: &str) -> std::result::Result<IncomingRequest, (u64, anyhow::Error)> {
    let value: Value = serde_json::from_str(line)
        .context("invalid request")
        .map_err(|err| (0, err))?;
    let id = value.get("id").and_then(Value::as_u64).unwrap_or(0);
    serde_json::from_value(value)
        .context("invalid request")
        .map_err(|err| (id, err))
}

fn spawn_stdin_listener(tx: mpsc::Sender<String>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
}

fn spawn_output_writer(mut rx: mpsc::UnboundedReceiver<Outgoing>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut out = std::io::LineWriter::new(stdout.lock());
        while let Some(message) = rx.blocking_recv() {
            match serde_json::to_string(&message) {
                Ok(line) => {
                    if writeln!(out, "{}", line).is_err() {
                        break;
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to encode bridge message"),
            }
        }
        let _ = out.flush();
    })
}
