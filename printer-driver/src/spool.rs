//! OS print spool adapter (`lp` / `lpstat`)
//!
//! Commands go through a [`CommandRunner`] so the agent can substitute a fake
//! in tests. The system runner spawns children with `kill_on_drop`, so
//! dropping a print future (e.g. on job timeout) kills the command.

use crate::error::{PrintError, PrintResult};
use crate::printer::Printer;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<CommandOutput>;
}

/// Runs commands with `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> std::io::Result<CommandOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(data).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// How the spool should treat the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolMode {
    /// Pass bytes through untouched (`-o raw`), for ESC/POS printers
    Raw,
    /// Let the driver format the document
    Formatted,
}

/// Printer reached through the OS print command
#[derive(Clone)]
pub struct SpoolPrinter {
    queue: String,
    mode: SpoolMode,
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for SpoolPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoolPrinter")
            .field("queue", &self.queue)
            .field("mode", &self.mode)
            .field("program", &self.program)
            .finish()
    }
}

impl SpoolPrinter {
    pub fn new(queue: impl Into<String>, mode: SpoolMode, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            queue: queue.into(),
            mode,
            program: "lp".to_string(),
            runner,
        }
    }

    /// Override the print command (default `lp`)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn mode(&self) -> SpoolMode {
        self.mode
    }

    /// Arguments passed to the print command
    pub fn print_args(&self) -> Vec<String> {
        let mut args = vec!["-d".to_string(), self.queue.clone()];
        if self.mode == SpoolMode::Raw {
            args.push("-o".to_string());
            args.push("raw".to_string());
        }
        args
    }
}

impl Printer for SpoolPrinter {
    #[instrument(skip(self, data), fields(queue = %self.queue, mode = ?self.mode, data_len = data.len()))]
    async fn print(&self, data: &[u8]) -> PrintResult<()> {
        let output = self
            .runner
            .run(&self.program, &self.print_args(), Some(data))
            .await
            .map_err(|e| PrintError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.success {
            warn!(code = ?output.code, stderr = %output.stderr, "Print command failed");
            return Err(PrintError::CommandFailed {
                code: output.code,
                stderr: output.stderr,
            });
        }

        info!(stdout = %output.stdout.trim(), "Spooled");
        Ok(())
    }

    async fn is_online(&self) -> bool {
        let args = vec!["-p".to_string(), self.queue.clone()];
        match self.runner.run("lpstat", &args, None).await {
            Ok(out) if out.success => parse_lpstat(&out.stdout)
                .into_iter()
                .any(|p| p.name == self.queue && p.state != SpoolState::Disabled),
            Ok(out) => {
                debug!(stderr = %out.stderr, "lpstat reported an error");
                false
            }
            Err(e) => {
                debug!(error = %e, "lpstat not available");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolState {
    Idle,
    Printing,
    Disabled,
}

/// One queue registered with the OS spool
#[derive(Debug, Clone, PartialEq)]
pub struct SpoolEntry {
    pub name: String,
    pub state: SpoolState,
    pub is_default: bool,
    pub device_uri: Option<String>,
    pub description: Option<String>,
    pub make_model: Option<String>,
}

impl SpoolEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: SpoolState::Idle,
            is_default: false,
            device_uri: None,
            description: None,
            make_model: None,
        }
    }

    /// `(host, port)` for `socket://`, `ipp://` and `lpd://` device URIs
    pub fn network_endpoint(&self) -> Option<(String, u16)> {
        let uri = self.device_uri.as_deref()?;
        let (scheme, rest) = uri.split_once("://")?;
        let default_port = match scheme {
            "socket" => 9100,
            "ipp" | "http" => 631,
            "lpd" => 515,
            _ => return None,
        };
        let authority = rest.split(['/', '?']).next()?;
        let authority = authority.rsplit('@').next()?;
        match authority.rsplit_once(':') {
            Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
            None if !authority.is_empty() => Some((authority.to_string(), default_port)),
            None => None,
        }
    }

    /// Whether the queue is backed by a USB device
    pub fn is_usb(&self) -> bool {
        self.device_uri
            .as_deref()
            .is_some_and(|u| u.starts_with("usb://"))
    }

    /// Manufacturer segment of a `usb://Vendor/Model` URI
    pub fn usb_manufacturer(&self) -> Option<String> {
        let rest = self.device_uri.as_deref()?.strip_prefix("usb://")?;
        rest.split('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.replace("%20", " "))
    }
}

/// List spool queues via `lpstat -l -p -d -v`
pub async fn list_printers(runner: &dyn CommandRunner) -> PrintResult<Vec<SpoolEntry>> {
    let args: Vec<String> = ["-l", "-p", "-d", "-v"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let output = runner
        .run("lpstat", &args, None)
        .await
        .map_err(|e| PrintError::Spawn {
            program: "lpstat".to_string(),
            reason: e.to_string(),
        })?;

    // lpstat exits non-zero when no destinations exist
    if !output.success && output.stdout.trim().is_empty() {
        if output.stderr.to_lowercase().contains("no destinations") {
            return Ok(Vec::new());
        }
        return Err(PrintError::CommandFailed {
            code: output.code,
            stderr: output.stderr,
        });
    }

    Ok(parse_lpstat(&output.stdout))
}

/// Parse combined `lpstat` output into spool entries (in order of appearance)
pub fn parse_lpstat(output: &str) -> Vec<SpoolEntry> {
    let mut entries: Vec<SpoolEntry> = Vec::new();
    let mut default_name: Option<String> = None;
    let mut current: Option<usize> = None;

    fn entry_index(entries: &mut Vec<SpoolEntry>, name: &str) -> usize {
        if let Some(i) = entries.iter().position(|e| e.name == name) {
            return i;
        }
        entries.push(SpoolEntry::new(name));
        entries.len() - 1
    }

    for raw in output.lines() {
        let indented = raw.starts_with([' ', '\t']);
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if indented {
            let Some(i) = current else { continue };
            if let Some(desc) = line.strip_prefix("Description:") {
                let desc = desc.trim();
                if !desc.is_empty() {
                    entries[i].description = Some(desc.to_string());
                }
            } else if let Some(model) = line.strip_prefix("Make and Model:") {
                entries[i].make_model = Some(model.trim().to_string());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("printer ") {
            let mut parts = rest.split_whitespace();
            let Some(name) = parts.next() else { continue };
            let i = entry_index(&mut entries, name);
            let lower = rest.to_lowercase();
            entries[i].state = if lower.contains("disabled") {
                SpoolState::Disabled
            } else if lower.contains("now printing") {
                SpoolState::Printing
            } else {
                SpoolState::Idle
            };
            current = Some(i);
        } else if let Some(rest) = line.strip_prefix("device for ") {
            if let Some((name, uri)) = rest.split_once(':') {
                let i = entry_index(&mut entries, name.trim());
                entries[i].device_uri = Some(uri.trim().to_string());
            }
            current = None;
        } else if let Some(rest) = line.strip_prefix("system default destination:") {
            default_name = Some(rest.trim().to_string());
            current = None;
        } else {
            current = None;
        }
    }

    if let Some(name) = default_name {
        for e in entries.iter_mut() {
            e.is_default = e.name == name;
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const LPSTAT: &str = "\
printer Kitchen is idle.  enabled since Mon 01 Jan 2024 10:00:00 AM
\tForm mounted:
\tDescription: Kitchen TM-T20
\tLocation: back
printer Office disabled since Mon 01 Jan 2024 10:00:00 AM -
\tPaused
\tDescription: LaserJet
printer Bar now printing Bar-12.  enabled since Mon 01 Jan 2024
system default destination: Kitchen
device for Kitchen: socket://192.168.1.50:9100
device for Office: ipp://10.0.0.8/ipp/print
device for Bar: usb://EPSON/TM-T88V?serial=1234
";

    #[test]
    fn parses_states_devices_and_default() {
        let entries = parse_lpstat(LPSTAT);
        assert_eq!(entries.len(), 3);

        let kitchen = &entries[0];
        assert_eq!(kitchen.name, "Kitchen");
        assert_eq!(kitchen.state, SpoolState::Idle);
        assert!(kitchen.is_default);
        assert_eq!(kitchen.description.as_deref(), Some("Kitchen TM-T20"));
        assert_eq!(
            kitchen.network_endpoint(),
            Some(("192.168.1.50".to_string(), 9100))
        );

        let office = &entries[1];
        assert_eq!(office.state, SpoolState::Disabled);
        assert!(!office.is_default);
        assert_eq!(office.network_endpoint(), Some(("10.0.0.8".to_string(), 631)));

        let bar = &entries[2];
        assert_eq!(bar.state, SpoolState::Printing);
        assert!(bar.is_usb());
        assert_eq!(bar.usb_manufacturer().as_deref(), Some("EPSON"));
        assert!(bar.network_endpoint().is_none());
    }

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
        output: CommandOutput,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            stdin: Option<&[u8]>,
        ) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push((
                program.to_string(),
                args.to_vec(),
                stdin.unwrap_or_default().to_vec(),
            ));
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn raw_mode_passes_raw_option_and_stdin() {
        let runner = Arc::new(RecordingRunner {
            output: CommandOutput {
                success: true,
                code: Some(0),
                stdout: "request id is Kitchen-1".into(),
                stderr: String::new(),
            },
            ..Default::default()
        });
        let printer = SpoolPrinter::new("Kitchen", SpoolMode::Raw, runner.clone());
        printer.print(b"abc").await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, "lp");
        assert_eq!(calls[0].1, vec!["-d", "Kitchen", "-o", "raw"]);
        assert_eq!(calls[0].2, b"abc");
    }

    #[tokio::test]
    async fn failed_command_surfaces_stderr() {
        let runner = Arc::new(RecordingRunner {
            output: CommandOutput {
                success: false,
                code: Some(1),
                stdout: String::new(),
                stderr: "lp: Unable to print".into(),
            },
            ..Default::default()
        });
        let printer = SpoolPrinter::new("Office", SpoolMode::Formatted, runner.clone());
        let err = printer.print(b"x").await.unwrap_err();
        assert_eq!(err.to_string(), "lp: Unable to print");
        assert_eq!(runner.calls.lock().unwrap()[0].1, vec!["-d", "Office"]);
    }

    #[tokio::test]
    async fn no_destinations_is_empty_list() {
        let runner = RecordingRunner {
            output: CommandOutput {
                success: false,
                code: Some(1),
                stdout: String::new(),
                stderr: "lpstat: No destinations added.".into(),
            },
            ..Default::default()
        };
        assert!(list_printers(&runner).await.unwrap().is_empty());
    }
}
