//! Opening URLs in an external browsing context.
//!
//! Launching is fire-and-forget: success only means the opener process was
//! started. Whatever happens in the opened window (OAuth consent, the
//! backend callback) is invisible to the client.

use std::process::{Command, Stdio};
use std::thread::JoinHandle;

use crate::config::BrowserConfig;
use crate::error::{ClientError, ClientResult};

pub trait Launcher: Send + Sync {
    fn open(&self, url: &str) -> ClientResult<()>;
}

/// Opens URLs with the platform opener or a configured program.
pub struct SystemLauncher {
    command: Option<String>,
}

impl SystemLauncher {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    fn opener(&self) -> (String, Vec<String>) {
        if let Some(cmd) = &self.command {
            let mut parts = cmd.split_whitespace().map(str::to_string);
            let program = parts.next().unwrap_or_default();
            return (program, parts.collect());
        }
        platform_opener(std::env::consts::OS)
    }

    /// Start the opener and reap it on a background thread.
    fn spawn(&self, url: &str) -> ClientResult<JoinHandle<()>> {
        let (program, args) = self.opener();
        if program.is_empty() {
            return Err(ClientError::Launch {
                url: url.to_string(),
                message: "browser.command is empty".to_string(),
            });
        }

        tracing::debug!(program = %program, url, "opening browser");
        let mut child = Command::new(&program)
            .args(&args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ClientError::Launch {
                url: url.to_string(),
                message: format!("failed to start {}: {}", program, e),
            })?;

        Ok(std::thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                tracing::debug!(program = %program, %status, "opener exited with failure")
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(program = %program, error = %e, "failed to reap opener"),
        }))
    }
}

/// Default opener for `os`. URLs are passed as a single argument to a
/// program that does not re-parse them, since `cmd /C start` would split
/// query strings at `&`.
fn platform_opener(os: &str) -> (String, Vec<String>) {
    match os {
        "macos" => ("open".to_string(), Vec::new()),
        "windows" => (
            "rundll32".to_string(),
            vec!["url.dll,FileProtocolHandler".to_string()],
        ),
        _ => ("xdg-open".to_string(), Vec::new()),
    }
}

impl Launcher for SystemLauncher {
    fn open(&self, url: &str) -> ClientResult<()> {
        self.spawn(url).map(|_| ())
    }
}

/// Prints the URL for the user to open by hand.
pub struct PrintLauncher;

impl Launcher for PrintLauncher {
    fn open(&self, url: &str) -> ClientResult<()> {
        println!("Open this link in your browser:\n  {}", url);
        Ok(())
    }
}

pub fn build_launcher(config: &BrowserConfig) -> Box<dyn Launcher> {
    if config.enabled {
        Box::new(SystemLauncher::new(config.command.clone()))
    } else {
        Box::new(PrintLauncher)
    }
}
