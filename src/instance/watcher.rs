use std::{
    io::{ErrorKind, Read, Write},
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tracing::{debug, warn};

use crate::{error::WatcherError, utils::Utf8Carry};

use super::ConsoleHistory;

pub const STOPPED_SENTINEL: &str = "*** process stopped ***";

const READ_BUF: usize = 1024;
/// Linux reports a hung-up pty master as EIO rather than a zero-length read.
const EIO: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleChunk {
    Output(String),
    Stopped,
    Fault(String),
}

impl ConsoleChunk {
    pub fn text(&self) -> String {
        match self {
            ConsoleChunk::Output(text) => text.clone(),
            ConsoleChunk::Stopped => STOPPED_SENTINEL.to_string(),
            ConsoleChunk::Fault(reason) => {
                format!("*** exception occurred while reading output: {reason} ***")
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConsoleChunk::Output(_))
    }
}

pub type OutputCallback = Box<dyn FnMut(ConsoleChunk) + Send + 'static>;

/// Owns a child process attached to a pseudo-terminal.
///
/// A dedicated thread reads the pty, appends every chunk to the console
/// history and hands it to the output callback on that same thread. The
/// callback therefore runs concurrently with everything else and must only
/// do cheap, thread-safe work such as pushing into a channel.
pub struct ProcessWatcher {
    pid: Option<u32>,
    alive: Arc<AtomicBool>,
    history: Arc<Mutex<ConsoleHistory>>,
    writer: Mutex<Box<dyn Write + Send>>,
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl std::fmt::Debug for ProcessWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessWatcher")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ProcessWatcher {
    pub fn spawn<S: AsRef<str>>(
        args: &[S],
        working_dir: &Path,
        history_capacity: usize,
        on_output: OutputCallback,
    ) -> Result<Self, WatcherError> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| WatcherError::Spawn("empty command".to_string()))?;

        if !working_dir.is_dir() {
            return Err(WatcherError::Spawn(format!(
                "invalid working directory: {}",
                working_dir.display()
            )));
        }

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 50,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WatcherError::Pty(e.to_string()))?;

        let mut command = CommandBuilder::new(program.as_ref());
        for arg in rest {
            command.arg(arg.as_ref());
        }
        command.cwd(working_dir);

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|e| WatcherError::Spawn(e.to_string()))?;
        // The slave end must be closed here or the master never sees EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| WatcherError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| WatcherError::Pty(e.to_string()))?;

        let pid = child.process_id();
        let alive = Arc::new(AtomicBool::new(true));
        let history = Arc::new(Mutex::new(ConsoleHistory::new(history_capacity)));

        Self::start_reader(reader, child, alive.clone(), history.clone(), on_output)?;

        Ok(Self {
            pid,
            alive,
            history,
            writer: Mutex::new(writer),
            _master: Mutex::new(pair.master),
        })
    }

    fn start_reader(
        reader: Box<dyn Read + Send>,
        mut child: Box<dyn Child + Send + Sync>,
        alive: Arc<AtomicBool>,
        history: Arc<Mutex<ConsoleHistory>>,
        mut on_output: OutputCallback,
    ) -> Result<(), WatcherError> {
        let name = format!("pty-reader-{}", child.process_id().unwrap_or_default());

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let last = pump(reader, &history, &mut on_output);
                alive.store(false, Ordering::SeqCst);
                on_output(last);

                match child.wait() {
                    Ok(status) => debug!(?status, "watched process exited"),
                    Err(e) => warn!(error = %e, "failed to reap watched process"),
                }
            })
            .map(|_| ())
            .map_err(|e| WatcherError::Spawn(e.to_string()))
    }

    /// Forwards `text` to the process input. Does nothing once the process
    /// has gone away; returns whether the text was written.
    pub fn write(&self, text: &str) -> bool {
        if !self.is_alive() {
            return false;
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer
            .write_all(text.as_bytes())
            .and_then(|_| writer.flush())
        {
            Ok(()) => true,
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "console write failed");
                false
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn console_history(&self) -> String {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_str()
            .to_string()
    }
}

fn pump<R: Read>(
    mut reader: R,
    history: &Mutex<ConsoleHistory>,
    on_output: &mut OutputCallback,
) -> ConsoleChunk {
    let mut buf = [0u8; READ_BUF];
    let mut carry = Utf8Carry::new();

    let emit = |text: String, on_output: &mut OutputCallback| {
        if text.is_empty() {
            return;
        }
        history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(&text);
        on_output(ConsoleChunk::Output(text));
    };

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                emit(carry.finish(), on_output);
                return ConsoleChunk::Stopped;
            }
            Ok(n) => emit(carry.decode(&buf[..n]), on_output),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(EIO) => {
                emit(carry.finish(), on_output);
                return ConsoleChunk::Stopped;
            }
            Err(e) => {
                emit(carry.finish(), on_output);
                return ConsoleChunk::Fault(e.to_string());
            }
        }
    }
}
