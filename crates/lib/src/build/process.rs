//! Backend process execution with process-group cancellation.
//!
//! Every backend step runs in its own process group (on Unix). Cancelling a
//! step signals the whole group, so compilers spawned by make or ninja stop
//! along with the driver, and then reaps the child before returning.

use std::collections::BTreeMap;
use std::future::pending;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How long a cancelled process group gets between TERM and KILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
  tx: watch::Sender<bool>,
}

/// Receiving half of a cancellation signal; cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
  rx: watch::Receiver<bool>,
}

/// Create a linked handle and token.
pub fn cancellation() -> (CancelHandle, CancelToken) {
  let (tx, rx) = watch::channel(false);
  (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
  pub fn cancel(&self) {
    let _ = self.tx.send(true);
  }

  pub fn token(&self) -> CancelToken {
    CancelToken { rx: self.tx.subscribe() }
  }
}

impl CancelToken {
  /// A token that is never cancelled.
  pub fn never() -> Self {
    let (_, token) = cancellation();
    token
  }

  pub fn is_cancelled(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once cancellation is requested.
  pub async fn cancelled(&mut self) {
    loop {
      if *self.rx.borrow_and_update() {
        return;
      }
      if self.rx.changed().await.is_err() {
        // Handle dropped without cancelling.
        pending::<()>().await;
      }
    }
  }
}

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("failed to start '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("failed waiting for '{program}': {source}")]
  Wait {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("cancelled")]
  Cancelled,
}

/// Output of a finished process, captured byte for byte.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
  pub status: ExitStatus,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.status.success()
  }
}

/// Run `program` with `args` in `cwd` until it exits or `cancel` fires.
pub async fn run(
  program: &str,
  args: &[String],
  cwd: &Path,
  env: &BTreeMap<String, String>,
  cancel: &CancelToken,
) -> Result<ProcessOutput, ProcessError> {
  if cancel.is_cancelled() {
    return Err(ProcessError::Cancelled);
  }

  let mut command = Command::new(program);
  command
    .args(args)
    .current_dir(cwd)
    .envs(env)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);

  debug!(program, ?args, cwd = %cwd.display(), "spawning backend process");

  let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
    program: program.to_string(),
    source,
  })?;
  // Gone from the handle once the child has been reaped.
  let pid = child.id();

  let stdout = child.stdout.take().map(|pipe| tokio::spawn(read_all(pipe)));
  let stderr = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

  let mut cancel = cancel.clone();
  let status = tokio::select! {
    status = child.wait() => status.map_err(|source| ProcessError::Wait {
      program: program.to_string(),
      source,
    })?,
    _ = cancel.cancelled() => {
      info!(program, "cancelling backend process");
      terminate(&mut child, pid).await;
      return Err(ProcessError::Cancelled);
    }
  };

  // The leader is gone; make sure nothing it started outlives it.
  #[cfg(unix)]
  if let Some(pid) = pid {
    signal_group(pid, rustix::process::Signal::KILL);
  }

  Ok(ProcessOutput {
    status,
    stdout: collect(stdout).await,
    stderr: collect(stderr).await,
  })
}

async fn read_all(mut pipe: impl AsyncRead + Unpin) -> Vec<u8> {
  let mut buf = Vec::new();
  if let Err(e) = pipe.read_to_end(&mut buf).await {
    warn!(error = %e, "failed to read backend output");
  }
  buf
}

async fn collect(reader: Option<tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
  match reader {
    Some(handle) => handle.await.unwrap_or_default(),
    None => Vec::new(),
  }
}

/// Stop the child's process group and reap the child.
#[cfg(unix)]
async fn terminate(child: &mut Child, pid: Option<u32>) {
  use rustix::process::Signal;

  let Some(pid) = pid else {
    let _ = child.wait().await;
    return;
  };

  signal_group(pid, Signal::TERM);
  match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
    Ok(_) => signal_group(pid, Signal::KILL),
    Err(_) => {
      warn!(pid, "backend ignored TERM, killing process group");
      signal_group(pid, Signal::KILL);
      let _ = child.wait().await;
    }
  }
}

#[cfg(windows)]
async fn terminate(child: &mut Child, _pid: Option<u32>) {
  if let Err(e) = child.kill().await {
    warn!(error = %e, "failed to kill backend process");
  }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: rustix::process::Signal) {
  use rustix::process::{Pid, kill_process_group};

  let Some(pgid) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
    return;
  };
  if let Err(e) = kill_process_group(pgid, signal)
    && e != rustix::io::Errno::SRCH
  {
    debug!(pid, error = %e, "failed to signal process group");
  }
}
