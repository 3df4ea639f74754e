//! Interactive shells over WebSocket.
//!
//! Each socket owns one PTY-backed shell. [`TerminalManager`] caps the number
//! of live shells and closes the ones nobody has touched for the idle window.

mod pty;
mod socket;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conduit_core::{OrchestratorError, TerminalId};
use conduit_settings::TerminalSettings;

pub use pty::NativePtySpawner;
pub use socket::run_terminal;

/// WebSocket close code sent when the shell cap is reached.
pub const CAPACITY_CLOSE_CODE: u16 = 1008;

/// A running shell attached to a pseudo-terminal.
pub trait PtyProcess: Send + Sync {
    fn write(&self, data: &[u8]) -> io::Result<()>;
    fn resize(&self, rows: u16, cols: u16) -> io::Result<()>;
    /// Signal the shell and reap it without blocking.
    fn terminate(&self);
}

/// A freshly spawned shell and the receiving end of its output.
pub struct PtyHandle {
    pub process: Box<dyn PtyProcess>,
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
}

pub trait PtySpawner: Send + Sync {
    fn spawn(&self, rows: u16, cols: u16) -> io::Result<PtyHandle>;
}

pub struct TerminalSession {
    id: TerminalId,
    process: Box<dyn PtyProcess>,
    last_activity: Mutex<Instant>,
    closed: CancellationToken,
}

impl TerminalSession {
    pub fn id(&self) -> &TerminalId {
        &self.id
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }

    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        self.process.write(data)
    }

    pub fn resize(&self, rows: u16, cols: u16) -> io::Result<()> {
        self.process.resize(rows, cols)
    }

    /// Cancelled once the session is closed, by its socket or by the reaper.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TerminalStatus {
    pub active: usize,
    pub max: usize,
    pub sessions: Vec<String>,
}

#[derive(Default)]
struct Slots {
    sessions: HashMap<TerminalId, Arc<TerminalSession>>,
    /// Opens that passed the cap check and are still spawning their shell.
    spawning: usize,
}

pub struct TerminalManager {
    slots: Mutex<Slots>,
    spawner: Arc<dyn PtySpawner>,
    max_sessions: usize,
    idle_timeout: Duration,
    poll_interval: Duration,
    rows: u16,
    cols: u16,
}

impl TerminalManager {
    pub fn new(spawner: Arc<dyn PtySpawner>, settings: &TerminalSettings) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            spawner,
            max_sessions: settings.max_sessions,
            idle_timeout: settings.idle_timeout(),
            poll_interval: settings.poll_interval(),
            rows: settings.rows,
            cols: settings.cols,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Size used when a resize request leaves a dimension out.
    pub fn default_size(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a shell and register it. At capacity nothing is spawned and no
    /// record is created. The shell is started on the blocking pool with a
    /// slot held, so the table stays usable while it starts.
    pub async fn open(
        &self,
    ) -> Result<(Arc<TerminalSession>, mpsc::UnboundedReceiver<Vec<u8>>), OrchestratorError> {
        let slot = self.reserve()?;
        let spawner = Arc::clone(&self.spawner);
        let (rows, cols) = (self.rows, self.cols);
        let handle = tokio::task::spawn_blocking(move || spawner.spawn(rows, cols))
            .await
            .map_err(|e| OrchestratorError::TerminalIo(e.to_string()))?
            .map_err(|e| OrchestratorError::TerminalIo(e.to_string()))?;

        let session = Arc::new(TerminalSession {
            id: TerminalId::new(),
            process: handle.process,
            last_activity: Mutex::new(Instant::now()),
            closed: CancellationToken::new(),
        });
        let active = slot.fill(Arc::clone(&session));
        info!(terminal_id = %session.id, active, "terminal opened");
        Ok((session, handle.output))
    }

    fn reserve(&self) -> Result<SpawnSlot<'_>, OrchestratorError> {
        let mut slots = self.slots.lock();
        if slots.sessions.len() + slots.spawning >= self.max_sessions {
            return Err(OrchestratorError::TerminalCapacityExceeded {
                max: self.max_sessions,
            });
        }
        slots.spawning += 1;
        Ok(SpawnSlot {
            slots: &self.slots,
            filled: false,
        })
    }

    /// Remove and stop a session. Closing an unknown or already closed id is
    /// a no-op.
    pub fn close(&self, id: &TerminalId) -> bool {
        let Some(session) = self.slots.lock().sessions.remove(id) else {
            return false;
        };
        session.closed.cancel();
        session.process.terminate();
        info!(terminal_id = %id, "terminal closed");
        true
    }

    /// Close every session idle for longer than the timeout.
    pub fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let idle: Vec<TerminalId> = self
            .slots
            .lock()
            .sessions
            .values()
            .filter(|s| s.idle_for(now) > self.idle_timeout)
            .map(|s| s.id.clone())
            .collect();
        let mut reaped = 0;
        for id in idle {
            if self.close(&id) {
                warn!(terminal_id = %id, "closing idle terminal");
                reaped += 1;
            }
        }
        reaped
    }

    pub fn status(&self) -> TerminalStatus {
        self.reap_idle();
        let slots = self.slots.lock();
        let mut ids: Vec<String> = slots.sessions.keys().map(|id| id.to_string()).collect();
        ids.sort();
        TerminalStatus {
            active: slots.sessions.len(),
            max: self.max_sessions,
            sessions: ids,
        }
    }

    pub fn close_all(&self) -> usize {
        let ids: Vec<TerminalId> = self.slots.lock().sessions.keys().cloned().collect();
        ids.iter().filter(|id| self.close(id)).count()
    }
}

/// A capacity slot held while a shell spawns. Dropping it unfilled (spawn
/// failed, or the socket went away) gives the slot back.
struct SpawnSlot<'a> {
    slots: &'a Mutex<Slots>,
    filled: bool,
}

impl SpawnSlot<'_> {
    /// Turn the reservation into a live session; returns the live count.
    fn fill(mut self, session: Arc<TerminalSession>) -> usize {
        let mut slots = self.slots.lock();
        slots.spawning -= 1;
        slots.sessions.insert(session.id.clone(), session);
        self.filled = true;
        slots.sessions.len()
    }
}

impl Drop for SpawnSlot<'_> {
    fn drop(&mut self) {
        if !self.filled {
            self.slots.lock().spawning -= 1;
        }
    }
}
