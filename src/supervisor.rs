//! Spawning, tracking and killing child processes.
//!
//! The `ProcessSupervisor` owns the registry of every process the shell
//! started. It is held by the control loop and mutated only from there.
//! Output of each child is handed to the relay as soon as it is spawned.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::events::{channel_name, ChannelKind, Event};
use crate::paths::{Launch, PathResolver};
use crate::relay;

/// A process started by the shell and not yet observed to close.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub pid: u32,
    /// Caller chosen tag used to namespace event channels.
    pub name: String,
    pub program: String,
    pub started_at: Instant,
}

impl ManagedProcess {
    pub fn channel(&self, kind: ChannelKind) -> String {
        channel_name(kind, &self.name)
    }
}

/// Everything needed to start one child.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl From<Launch> for SpawnSpec {
    fn from(launch: Launch) -> Self {
        Self {
            program: launch.program,
            args: launch.args,
            ..Self::default()
        }
    }
}

/// Outcome of a best-effort cleanup step. Failures are recorded and logged
/// at debug level, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    Done,
    Failed(String),
}

impl Cleanup {
    pub fn capture<E: fmt::Display>(action: &str, result: std::result::Result<(), E>) -> Self {
        match result {
            Ok(()) => Cleanup::Done,
            Err(err) => {
                tracing::debug!(action, error = %err, "best-effort cleanup failed");
                Cleanup::Failed(err.to_string())
            }
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Cleanup::Done)
    }
}

pub struct ProcessSupervisor {
    processes: BTreeMap<u32, ManagedProcess>,
    paths: PathResolver,
    event_tx: mpsc::Sender<Event>,
}

impl ProcessSupervisor {
    pub fn new(paths: PathResolver, event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            processes: BTreeMap::new(),
            paths,
            event_tx,
        }
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    /// Starts an API script under `name` and returns its pid.
    pub fn spawn_script(&mut self, name: &str, script: &str, args: Vec<String>) -> Result<u32> {
        let launch = self.paths.resolve_script(script, args);
        self.spawn(name, launch.into())
    }

    /// Starts the simulation executable inside the model's input directory.
    pub fn run_swat(&mut self, name: &str, debug: bool, input_dir: PathBuf) -> Result<u32> {
        let spec = SpawnSpec {
            program: self.paths.swat_exe(debug).display().to_string(),
            args: Vec::new(),
            cwd: Some(input_dir),
            env: self.paths.swat_env(),
        };
        self.spawn(name, spec)
    }

    /// Spawns a child, registers it and starts relaying its output.
    ///
    /// Returns as soon as the OS has created the process.
    pub fn spawn(&mut self, name: &str, spec: SpawnSpec) -> Result<u32> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        if !spec.env.is_empty() {
            command.envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        // Each child leads its own group so the whole tree can be killed.
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn {} ({})", name, spec.program))?;
        let pid = child
            .id()
            .with_context(|| format!("spawned {} has no pid", name))?;
        tracing::info!(%name, pid, program = %spec.program, "process started");

        self.track(pid, name, &spec.program);
        relay::relay_child(name.to_string(), pid, child, self.event_tx.clone());
        Ok(pid)
    }

    pub(crate) fn track(&mut self, pid: u32, name: &str, program: &str) {
        self.processes.insert(
            pid,
            ManagedProcess {
                pid,
                name: name.to_string(),
                program: program.to_string(),
                started_at: Instant::now(),
            },
        );
    }

    /// Removes a process once its close event was observed.
    pub fn forget(&mut self, pid: u32) -> Option<ManagedProcess> {
        self.processes.remove(&pid)
    }

    /// Like `forget`, but leaves the entry alone when the pid now belongs
    /// to a process registered under another name.
    pub fn forget_closed(&mut self, pid: u32, name: &str) -> Option<ManagedProcess> {
        match self.processes.get(&pid) {
            Some(entry) if entry.name == name => self.processes.remove(&pid),
            Some(entry) => {
                tracing::debug!(pid, closed = %name, live = %entry.name, "pid reused, keeping entry");
                None
            }
            None => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn event_sender(&self) -> mpsc::Sender<Event> {
        self.event_tx.clone()
    }

    /// Force-kills the process tree rooted at `pid`.
    pub fn kill(&mut self, pid: u32) -> Cleanup {
        tracing::info!(pid, "killing process");
        Cleanup::capture("kill", kill_tree(pid))
    }

    /// Kills every registered process and empties the registry.
    pub fn kill_all(&mut self) -> Vec<(u32, Cleanup)> {
        let processes = std::mem::take(&mut self.processes);
        processes
            .into_keys()
            .map(|pid| (pid, Cleanup::capture("kill", kill_tree(pid))))
            .collect()
    }

    pub fn get(&self, pid: u32) -> Option<&ManagedProcess> {
        self.processes.get(&pid)
    }

    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ManagedProcess> + 'a {
        self.processes.values().filter(move |p| p.name == name)
    }

    pub fn processes(&self) -> impl Iterator<Item = &ManagedProcess> {
        self.processes.values()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(unix)]
pub fn kill_tree(pid: u32) -> io::Result<()> {
    let pid = i32::try_from(pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))?;
    let (group, direct) = unsafe { (libc::kill(-pid, libc::SIGKILL), libc::kill(pid, libc::SIGKILL)) };
    if group == 0 || direct == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) -> io::Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill exited with {}", status),
        ))
    }
}

#[cfg(not(any(unix, windows)))]
pub fn kill_tree(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process kill not supported on this platform",
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AppSettings;
    use crate::paths::Platform;

    pub(crate) fn test_supervisor() -> (ProcessSupervisor, mpsc::Receiver<Event>) {
        let settings: AppSettings =
            serde_json::from_value(serde_json::json!({ "swatplus": "61.0" })).unwrap();
        let paths = PathResolver::new(
            false,
            PathBuf::from("/nonexistent"),
            &settings,
            None,
            &[],
            Platform::current(),
        )
        .unwrap();
        let (tx, rx) = mpsc::channel(64);
        (ProcessSupervisor::new(paths, tx), rx)
    }

    fn shell(script: &str) -> SpawnSpec {
        SpawnSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            ..SpawnSpec::default()
        }
    }

    #[test]
    fn cleanup_captures_errors() {
        assert!(Cleanup::capture::<String>("noop", Ok(())).is_done());
        let failed = Cleanup::capture("noop", Err("gone"));
        assert_eq!(failed, Cleanup::Failed("gone".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_pid_can_be_killed() {
        let (mut supervisor, mut rx) = test_supervisor();
        let pid = supervisor.spawn("sleeper", shell("sleep 30")).unwrap();
        assert_eq!(supervisor.len(), 1);
        assert_eq!(supervisor.get(pid).unwrap().name, "sleeper");
        assert!(supervisor.kill(pid).is_done());

        let close = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(close, Event::Close { code: None, .. }));
        assert_eq!(close.pid(), pid);

        // Second kill of the same pid must not panic.
        let _ = supervisor.kill(pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_reaches_grandchildren() {
        let (mut supervisor, mut rx) = test_supervisor();
        let pid = supervisor
            .spawn("tree", shell("sleep 30 & sleep 30 & wait"))
            .unwrap();
        assert!(supervisor.kill(pid).is_done());
        // The relay only closes after every holder of the pipes is gone.
        let close = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(close, Event::Close { .. }));
    }

    #[test]
    fn killing_unknown_pid_is_captured() {
        let (mut supervisor, _rx) = test_supervisor();
        assert!(!supervisor.kill(i32::MAX as u32).is_done());
        assert!(!supervisor.kill(0).is_done());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn forget_prunes_closed_process() {
        let (mut supervisor, mut rx) = test_supervisor();
        let pid = supervisor.spawn("quick", shell("echo hi")).unwrap();
        loop {
            let event = rx.recv().await.unwrap();
            if let Event::Close { pid: closed, .. } = event {
                assert_eq!(closed, pid);
                break;
            }
        }
        assert!(supervisor.forget(pid).is_some());
        assert!(supervisor.is_empty());
    }

    #[test]
    fn stale_close_keeps_reused_pid() {
        let (mut supervisor, _rx) = test_supervisor();
        supervisor.track(42, "fresh", "b");
        assert!(supervisor.forget_closed(42, "old").is_none());
        assert_eq!(supervisor.get(42).unwrap().name, "fresh");
        assert!(supervisor.forget_closed(42, "fresh").is_some());
        assert!(supervisor.forget_closed(42, "fresh").is_none());
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let (mut supervisor, _rx) = test_supervisor();
        let err = supervisor
            .spawn_script("api", "swatplus_rest_api", vec!["5000".into()])
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn api"));
        assert!(supervisor.is_empty());
    }

    #[test]
    fn lookup_by_name() {
        let (mut supervisor, _rx) = test_supervisor();
        supervisor.track(10, "setup", "a");
        supervisor.track(11, "setup", "a");
        supervisor.track(12, "run", "b");
        assert_eq!(supervisor.by_name("setup").count(), 2);
        assert_eq!(
            supervisor.get(12).unwrap().channel(ChannelKind::Stderr),
            "process-stderr:run"
        );
    }
}
