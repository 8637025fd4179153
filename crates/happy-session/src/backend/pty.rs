//! Native PTY backend built on portable-pty
//!
//! Each process gets two OS threads: a reader that pumps PTY output into the
//! output channel and reports the exit status once the PTY closes, and a writer
//! that drains the input channel into the PTY.

use super::{ProcessHandle, SpawnRequest, SpawnedProcess, TerminalBackend, OUTPUT_CHANNEL_CAPACITY};
use crate::{Result, SessionError};
use async_trait::async_trait;
use bytes::Bytes;
use happy_types::TermSize;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const INPUT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Default, Clone, Copy)]
pub struct PtyBackend;

impl PtyBackend {
    pub fn new() -> Self {
        Self
    }
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        cols: size.cols,
        rows: size.rows,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_error(request: &SpawnRequest, e: impl std::fmt::Display) -> SessionError {
    SessionError::Spawn {
        cwd: request.cwd.clone(),
        message: e.to_string(),
    }
}

impl TerminalBackend for PtyBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedProcess> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(request.size))
            .map_err(|e| spawn_error(request, e))?;

        let mut cmd = CommandBuilder::new(&request.command.program);
        cmd.args(request.args());
        cmd.cwd(&request.cwd);
        for (key, value) in &request.command.env_vars {
            cmd.env(key, value);
        }
        cmd.env("HAPPY_SESSION_ID", &request.session_id);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_error(request, e))?;
        // The child holds its own copy; ours would keep the PTY open past exit
        drop(pair.slave);

        let pid = child.process_id();
        let master = pair.master;
        let streams = master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, master.take_writer()?)));
        let (mut reader, mut writer) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                let _ = child.kill();
                return Err(spawn_error(request, e));
            }
        };
        let killer = child.clone_killer();

        info!(
            "Spawned {} for session {} (pid: {:?}, cwd: {:?}, mode: {:?})",
            request.command.program, request.session_id, pid, request.cwd, request.mode
        );

        let (output_tx, output_rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel::<Option<i32>>();
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(INPUT_CHANNEL_CAPACITY);

        let session_id = request.session_id.clone();
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", session_id))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if output_tx
                                .blocking_send(Bytes::copy_from_slice(&buf[..n]))
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            // EIO is the normal end of a PTY whose child exited
                            debug!("PTY read for session {} ended: {}", session_id, e);
                            break;
                        }
                    }
                }
                let code = child.wait().ok().map(|status| status.exit_code() as i32);
                debug!("Session {} process exited with {:?}", session_id, code);
                let _ = exit_tx.send(code);
            })
            .map_err(|e| spawn_error(request, e))?;

        let session_id = request.session_id.clone();
        std::thread::Builder::new()
            .name(format!("pty-writer-{}", session_id))
            .spawn(move || {
                while let Some(data) = input_rx.blocking_recv() {
                    if writer.write_all(&data).is_err() || writer.flush().is_err() {
                        warn!("PTY writer for session {} closed", session_id);
                        break;
                    }
                }
            })
            .map_err(|e| spawn_error(request, e))?;

        Ok(SpawnedProcess {
            handle: Box::new(PtyProcess {
                pid,
                input_tx,
                master: Mutex::new(master),
                killer: Mutex::new(killer),
            }),
            output: output_rx,
            exit: exit_rx,
        })
    }
}

struct PtyProcess {
    pid: Option<u32>,
    input_tx: mpsc::Sender<Vec<u8>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

#[async_trait]
impl ProcessHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        self.input_tx
            .send(data.to_vec())
            .await
            .map_err(|_| SessionError::Process("Input channel closed".to_string()))
    }

    async fn resize(&self, size: TermSize) -> Result<()> {
        let master = self
            .master
            .lock()
            .map_err(|_| SessionError::Process("PTY master lock poisoned".to_string()))?;
        master
            .resize(pty_size(size))
            .map_err(|e| SessionError::Process(format!("Failed to resize PTY: {}", e)))
    }

    async fn kill(&self) -> Result<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| SessionError::Process("Child killer lock poisoned".to_string()))?;
        if let Err(e) = killer.kill() {
            // Already gone
            debug!("Kill of pid {:?} reported: {}", self.pid, e);
        }
        Ok(())
    }
}
