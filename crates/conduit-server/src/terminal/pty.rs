use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use conduit_settings::TerminalSettings;

use super::{PtyHandle, PtyProcess, PtySpawner};

const READ_CHUNK: usize = 4096;

fn pty_err(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(e.to_string())
}

fn size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Spawns the user's login shell on a native pseudo-terminal.
pub struct NativePtySpawner {
    shell: String,
    cwd: Option<PathBuf>,
}

impl NativePtySpawner {
    pub fn new(shell: impl Into<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            cwd,
        }
    }

    /// Configured shell (or `$SHELL`), started in the home directory.
    pub fn from_settings(settings: &TerminalSettings) -> Self {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::new(settings.resolve_shell(), home)
    }
}

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, rows: u16, cols: u16) -> io::Result<PtyHandle> {
        let pair = native_pty_system().openpty(size(rows, cols)).map_err(pty_err)?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.arg("--login");
        cmd.env("TERM", "xterm-256color");
        if let Some(cwd) = &self.cwd {
            cmd.cwd(cwd);
        }
        let child = pair.slave.spawn_command(cmd).map_err(pty_err)?;
        drop(pair.slave);

        let mut reader = pair.master.try_clone_reader().map_err(pty_err)?;
        let writer = pair.master.take_writer().map_err(pty_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "pty read ended");
                        break;
                    }
                }
            }
        });

        debug!(shell = %self.shell, pid = ?child.process_id(), "shell spawned");
        Ok(PtyHandle {
            process: Box::new(NativePty {
                master: Mutex::new(pair.master),
                writer: Mutex::new(writer),
                child: Mutex::new(child),
            }),
            output: rx,
        })
    }
}

struct NativePty {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
}

impl PtyProcess for NativePty {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()
    }

    fn resize(&self, rows: u16, cols: u16) -> io::Result<()> {
        self.master.lock().resize(size(rows, cols)).map_err(pty_err)
    }

    fn terminate(&self) {
        let mut child = self.child.lock();
        #[cfg(unix)]
        let signalled = child.process_id().is_some_and(|pid| {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
        });
        #[cfg(not(unix))]
        let signalled = false;
        if !signalled {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to kill shell");
            }
        }
        // Reap if it already exited; otherwise the descriptor close finishes it.
        let _ = child.try_wait();
    }
}
