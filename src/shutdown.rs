//! Application lifecycle and shutdown coordination.
//!
//! Shutdown asks the API to stop itself, then force-kills whatever is
//! still registered. None of these steps can keep the shell from exiting.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::supervisor::{Cleanup, ProcessSupervisor};

pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AppPhase {
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for AppPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppPhase::Starting => "starting",
            AppPhase::Running => "running",
            AppPhase::ShuttingDown => "shutting down",
            AppPhase::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Tracks the phase of the application. Phases only move forward.
#[derive(Debug)]
pub struct Lifecycle {
    phase: AppPhase,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: AppPhase::Starting,
        }
    }

    pub fn phase(&self) -> AppPhase {
        self.phase
    }

    pub fn advance(&mut self, next: AppPhase) -> Result<()> {
        if next <= self.phase {
            bail!("cannot move from {} to {}", self.phase, next);
        }
        tracing::info!(from = %self.phase, to = %next, "lifecycle transition");
        self.phase = next;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened during shutdown. Purely informational.
#[derive(Debug)]
pub struct ShutdownReport {
    pub graceful: Cleanup,
    pub attempted: usize,
    pub failed: usize,
}

pub struct ShutdownCoordinator {
    api_port: Option<u16>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(api_port: Option<u16>, timeout: Duration) -> Self {
        Self { api_port, timeout }
    }

    /// Sends `GET /shutdown` to the API, bounded by the configured timeout
    /// so a wedged API cannot hold up the exit.
    pub async fn request_graceful(&self) -> Cleanup {
        let Some(port) = self.api_port else {
            return Cleanup::Failed("api port unknown".to_string());
        };
        let url = format!("http://localhost:{}/shutdown", port);
        let client = match reqwest::Client::builder().timeout(self.timeout).build() {
            Ok(client) => client,
            Err(err) => return Cleanup::capture("build http client", Err(err)),
        };
        let result = client.get(&url).send().await.map(|_| ());
        Cleanup::capture("graceful shutdown", result)
    }

    /// Runs the whole shutdown sequence. Returns `None` if shutdown had
    /// already started.
    pub async fn shutdown(
        &self,
        lifecycle: &mut Lifecycle,
        supervisor: &mut ProcessSupervisor,
    ) -> Option<ShutdownReport> {
        if lifecycle.advance(AppPhase::ShuttingDown).is_err() {
            return None;
        }

        let graceful = self.request_graceful().await;
        let results = supervisor.kill_all();
        let attempted = results.len();
        let failed = results.iter().filter(|(_, c)| !c.is_done()).count();
        tracing::info!(
            graceful = graceful.is_done(),
            attempted,
            failed,
            "shutdown complete"
        );

        let _ = lifecycle.advance(AppPhase::Terminated);
        Some(ShutdownReport {
            graceful,
            attempted,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::allocate_port;
    use crate::supervisor::tests::test_supervisor;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn phases_only_move_forward() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(AppPhase::Running).unwrap();
        assert!(lifecycle.advance(AppPhase::Starting).is_err());
        assert!(lifecycle.advance(AppPhase::Running).is_err());
        lifecycle.advance(AppPhase::ShuttingDown).unwrap();
        assert_eq!(lifecycle.phase(), AppPhase::ShuttingDown);
    }

    #[tokio::test]
    async fn graceful_request_reaches_shutdown_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let coordinator = ShutdownCoordinator::new(Some(port), Duration::from_secs(2));
        assert!(coordinator.request_graceful().await.is_done());
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /shutdown"));
    }

    #[tokio::test]
    async fn unreachable_api_is_swallowed() {
        let port = allocate_port(20_000).unwrap();
        let coordinator = ShutdownCoordinator::new(Some(port), Duration::from_secs(2));
        assert!(!coordinator.request_graceful().await.is_done());
    }

    #[tokio::test]
    async fn wedged_api_is_bounded_by_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let coordinator = ShutdownCoordinator::new(Some(port), Duration::from_millis(200));
        let started = Instant::now();
        assert!(!coordinator.request_graceful().await.is_done());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_tolerates_dead_pids() {
        use crate::supervisor::SpawnSpec;

        let (mut supervisor, _rx) = test_supervisor();
        let live = supervisor
            .spawn(
                "sleeper",
                SpawnSpec {
                    program: "sleep".into(),
                    args: vec!["30".into()],
                    ..SpawnSpec::default()
                },
            )
            .unwrap();
        supervisor.track(i32::MAX as u32 - 1, "gone", "x");
        supervisor.track(i32::MAX as u32 - 2, "gone", "x");

        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(AppPhase::Running).unwrap();
        let coordinator = ShutdownCoordinator::new(None, Duration::from_millis(200));
        let report = coordinator
            .shutdown(&mut lifecycle, &mut supervisor)
            .await
            .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, 2);
        assert!(!report.graceful.is_done());
        assert!(supervisor.is_empty());
        assert!(supervisor.get(live).is_none());
        assert_eq!(lifecycle.phase(), AppPhase::Terminated);

        // A second quit is a no-op.
        assert!(coordinator
            .shutdown(&mut lifecycle, &mut supervisor)
            .await
            .is_none());
    }
}
