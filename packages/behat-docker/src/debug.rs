//! Debug-session capability. Only the start/stop lifecycle is modeled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DebugConfiguration;
use crate::error::{BehatDockerError, Result};

/// Handle to a running debug session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSession {
    pub id: u64,
    pub name: String,
    pub port: u16,
}

/// Starts and stops debug sessions. At most one session is active at a time.
#[async_trait]
pub trait DebugAdapter: Send + Sync {
    fn active_session(&self) -> Option<DebugSession>;

    async fn start(&self, config: &DebugConfiguration) -> Result<DebugSession>;

    async fn stop(&self, session: &DebugSession) -> Result<()>;
}

struct ActiveListener {
    session: DebugSession,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Listens on the Xdebug client port for the duration of a debug run.
///
/// Incoming step-debugger connections are logged and closed, which lets the
/// script continue; attaching an interactive debugger is left to the IDE.
#[derive(Default)]
pub struct XdebugListener {
    bind_host: String,
    active: Mutex<Option<ActiveListener>>,
    next_id: AtomicU64,
}

impl XdebugListener {
    pub fn new() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            ..Self::default()
        }
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<ActiveListener>>> {
        self.active
            .lock()
            .map_err(|e| BehatDockerError::DebugSession(format!("listener state poisoned: {e}")))
    }
}

#[async_trait]
impl DebugAdapter for XdebugListener {
    fn active_session(&self) -> Option<DebugSession> {
        self.lock()
            .ok()
            .and_then(|active| active.as_ref().map(|a| a.session.clone()))
    }

    async fn start(&self, config: &DebugConfiguration) -> Result<DebugSession> {
        if let Some(session) = self.active_session() {
            return Err(BehatDockerError::DebugSession(format!(
                "debug session '{}' is already active",
                session.name
            )));
        }

        let host = if self.bind_host.is_empty() {
            "0.0.0.0"
        } else {
            self.bind_host.as_str()
        };
        let listener = TcpListener::bind((host, config.port)).await.map_err(|e| {
            BehatDockerError::DebugSession(format!("failed to listen on port {}: {e}", config.port))
        })?;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(config.port);

        let session = DebugSession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            name: config.name.clone(),
            port,
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, cancel.clone()));

        tracing::info!(name = %session.name, port, "debug listener started");
        *self.lock()? = Some(ActiveListener {
            session: session.clone(),
            cancel,
            task,
        });
        Ok(session)
    }

    async fn stop(&self, session: &DebugSession) -> Result<()> {
        let active = {
            let mut guard = self.lock()?;
            match guard.as_ref() {
                Some(active) if active.session.id == session.id => guard.take(),
                _ => None,
            }
        };
        let Some(active) = active else {
            return Err(BehatDockerError::DebugSession(format!(
                "debug session '{}' is not active",
                session.name
            )));
        };

        active.cancel.cancel();
        active
            .task
            .await
            .map_err(|e| BehatDockerError::DebugSession(format!("listener task failed: {e}")))?;
        tracing::info!(name = %session.name, "debug listener stopped");
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "step debugger connected, detaching");
                    drop(stream);
                }
                Err(e) => tracing::warn!(error = %e, "debug listener accept failed"),
            },
        }
    }
}

/// Recording debug adapter for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use super::*;

    /// Tracks starts and stops; can be told to fail either.
    #[derive(Debug, Default)]
    pub struct RecordingDebugger {
        active: Mutex<Option<DebugSession>>,
        started: Mutex<Vec<DebugConfiguration>>,
        stopped: Mutex<Vec<DebugSession>>,
        fail_start: bool,
        fail_stop: bool,
    }

    impl RecordingDebugger {
        pub fn new() -> Self {
            Self::default()
        }

        /// Pretend a session started elsewhere is already running.
        pub fn with_active(self, session: DebugSession) -> Self {
            if let Ok(mut active) = self.active.lock() {
                *active = Some(session);
            }
            self
        }

        pub fn failing_start(mut self) -> Self {
            self.fail_start = true;
            self
        }

        pub fn failing_stop(mut self) -> Self {
            self.fail_stop = true;
            self
        }

        pub fn started(&self) -> Vec<DebugConfiguration> {
            self.started.lock().map(|s| s.clone()).unwrap_or_default()
        }

        pub fn stopped(&self) -> Vec<DebugSession> {
            self.stopped.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl DebugAdapter for RecordingDebugger {
        fn active_session(&self) -> Option<DebugSession> {
            self.active.lock().ok().and_then(|a| a.clone())
        }

        async fn start(&self, config: &DebugConfiguration) -> Result<DebugSession> {
            if self.fail_start {
                return Err(BehatDockerError::DebugSession("port already in use".into()));
            }
            let session = DebugSession {
                id: 1,
                name: config.name.clone(),
                port: config.port,
            };
            if let Ok(mut started) = self.started.lock() {
                started.push(config.clone());
            }
            if let Ok(mut active) = self.active.lock() {
                *active = Some(session.clone());
            }
            Ok(session)
        }

        async fn stop(&self, session: &DebugSession) -> Result<()> {
            if let Ok(mut stopped) = self.stopped.lock() {
                stopped.push(session.clone());
            }
            if self.fail_stop {
                return Err(BehatDockerError::DebugSession("adapter did not respond".into()));
            }
            if let Ok(mut active) = self.active.lock() {
                *active = None;
            }
            Ok(())
        }
    }
}
