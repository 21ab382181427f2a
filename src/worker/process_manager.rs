//! Model host child process lifecycle.
//!
//! Spawns the host as a child process (same binary with `--worker` flag)
//! and kills it when dropped.

use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use crate::error::BridgeError;

/// Owns the model host child process.
pub struct ProcessManager {
    child: Mutex<Option<Child>>,
}

impl ProcessManager {
    /// Spawn a new host process, forwarding the config path if one was given.
    pub fn spawn(config_path: Option<&Path>) -> Result<Self, BridgeError> {
        let exe = std::env::current_exe().map_err(BridgeError::Executable)?;
        let child = spawn_host_process(&exe, config_path)?;
        Ok(Self {
            child: Mutex::new(Some(child)),
        })
    }

    /// Take the child's stdin handle for writing commands.
    pub fn take_stdin(&self) -> Option<ChildStdin> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdin.take()))
    }

    /// Take the child's stdout handle for reading messages.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdout.take()))
    }

    /// Kill the host process immediately and reap it.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(ref mut child) = *guard {
                log::info!("Killing model host process (pid={})", child.id());
                let _ = child.kill();
                let _ = child.wait();
            }
            *guard = None;
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

fn host_args(config_path: Option<&Path>) -> Vec<std::ffi::OsString> {
    let mut args = vec!["--worker".into()];
    if let Some(path) = config_path {
        args.push("--config".into());
        args.push(path.as_os_str().to_owned());
    }
    args
}

fn spawn_host_process(exe: &Path, config_path: Option<&Path>) -> Result<Child, BridgeError> {
    let args = host_args(config_path);
    log::info!("Spawning model host: {} {args:?}", exe.display());

    Command::new(exe)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit()) // host logs go to parent's stderr
        .spawn()
        .map_err(BridgeError::Spawn)
}
