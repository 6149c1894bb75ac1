// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The external agent-tool driver capability set.
//!
//! No production provider ships here: the concrete CLI invocations
//! (`claude`, `gemini`, ...) are out of scope for this crate. This module
//! only fixes the trait boundary and, for tests, a scriptable
//! [`MockProvider`].
//!
//! Grounded on the driver/claude and driver/gemini module pair in the
//! source pack: one struct per provider behind a shared trait, with the
//! provider name threaded into remediation strings rather than branching
//! on the caller.

use std::path::Path;
use std::sync::Arc;

use tokio::process::Command;

/// One parsed token from a provider's stdout stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    IterationStart,
    Status(String),
    Error(String),
    CompletionHint,
    Log(String),
}

/// Capability set a loop executor drives a provider through.
///
/// `loop_command` and friends return a ready-to-spawn [`Command`]; the
/// executor owns spawning, timeout enforcement, and stdout consumption.
pub trait Provider: Send + Sync {
    /// Short identifier used in remediation hints and log file names.
    fn name(&self) -> &'static str;

    /// Absolute path to the provider's CLI binary, or a bare command name
    /// to resolve via `PATH`.
    fn cli_path(&self) -> &Path;

    /// Build the command for one non-interactive loop iteration.
    fn loop_command(&self, working_dir: &Path, prompt: &str) -> Command;

    /// Build the command for an interactive session against the same
    /// working directory (used by session-attach control messages).
    fn interactive_command(&self, working_dir: &Path) -> Command;

    /// Build the command that converts a provider-native session log into
    /// the agent's common log shape.
    fn convert_command(&self, input: &Path, output: &Path) -> Command;

    /// Build the command that repairs a malformed JSON artifact the
    /// provider produced (some providers emit recoverably-broken JSON).
    fn fix_json_command(&self, input: &Path) -> Command;

    /// Parse one line of stdout into an event, or `None` if it carries no
    /// signal the executor needs to act on.
    fn parse_line(&self, line: &str) -> Option<ProviderEvent>;

    /// File name (not path) this provider's session log is written under.
    fn log_file_name(&self) -> &'static str;

    /// Remediation hint for a given execution failure kind, branching on
    /// `name()` so the message can reference provider-specific
    /// configuration when one exists.
    fn remediation_hint(&self, kind: RemediationKind) -> String {
        match kind {
            RemediationKind::MissingBinary => {
                format!("install the {} CLI and ensure it is on PATH", self.name())
            }
            RemediationKind::Timeout => {
                "the run exceeded its configured timeout; consider raising it or reducing iteration scope".to_owned()
            }
            RemediationKind::NonZeroExit => {
                format!("the {} process exited with an error; inspect its stderr above", self.name())
            }
            RemediationKind::ProcessFailed => {
                "the provider process failed to run to completion; check system resources and permissions".to_owned()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationKind {
    MissingBinary,
    Timeout,
    NonZeroExit,
    ProcessFailed,
}

/// Resolves the provider a given loop name should run against. No
/// concrete production provider ships in this crate (see module docs
/// above), so the agent root is handed this as configuration rather than
/// constructing providers itself; a caller embedding this crate supplies
/// one, and `None` means "no provider configured for this name".
pub type ProviderResolver = Arc<dyn Fn(&str) -> Option<Arc<dyn Provider>> + Send + Sync>;

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Test-only provider whose line parser and command shapes are fully
    /// scripted, standing in for a real `claude`/`gemini` driver.
    ///
    /// When `script` is set, `loop_command` runs it through `sh -c` so
    /// tests can control stdout/stderr/exit-code directly; otherwise it
    /// shells out to `cli_path` (useful for exercising the
    /// missing-binary path with a path that does not exist).
    pub struct MockProvider {
        pub cli_path: std::path::PathBuf,
        pub script: Option<String>,
    }

    impl MockProvider {
        pub fn new(cli_path: impl Into<std::path::PathBuf>) -> Self {
            Self { cli_path: cli_path.into(), script: None }
        }

        pub fn with_script(script: impl Into<String>) -> Self {
            Self { cli_path: std::path::PathBuf::from("/nonexistent/mock"), script: Some(script.into()) }
        }
    }

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn cli_path(&self) -> &Path {
            &self.cli_path
        }

        fn loop_command(&self, working_dir: &Path, prompt: &str) -> Command {
            if let Some(script) = &self.script {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script).current_dir(working_dir);
                cmd
            } else {
                let mut cmd = Command::new(&self.cli_path);
                cmd.arg("--loop").arg("--prompt").arg(prompt).current_dir(working_dir);
                cmd
            }
        }

        fn interactive_command(&self, working_dir: &Path) -> Command {
            let mut cmd = Command::new(&self.cli_path);
            cmd.arg("--interactive").current_dir(working_dir);
            cmd
        }

        fn convert_command(&self, input: &Path, output: &Path) -> Command {
            let mut cmd = Command::new(&self.cli_path);
            cmd.arg("--convert").arg(input).arg(output);
            cmd
        }

        fn fix_json_command(&self, input: &Path) -> Command {
            let mut cmd = Command::new(&self.cli_path);
            cmd.arg("--fix-json").arg(input);
            cmd
        }

        fn parse_line(&self, line: &str) -> Option<ProviderEvent> {
            if let Some(rest) = line.strip_prefix("STATUS:") {
                Some(ProviderEvent::Status(rest.trim().to_owned()))
            } else if let Some(rest) = line.strip_prefix("ERROR:") {
                Some(ProviderEvent::Error(rest.trim().to_owned()))
            } else if line.trim() == "ITERATION_START" {
                Some(ProviderEvent::IterationStart)
            } else if line.trim() == "COMPLETE" {
                Some(ProviderEvent::CompletionHint)
            } else if line.trim().is_empty() {
                None
            } else {
                Some(ProviderEvent::Log(line.to_owned()))
            }
        }

        fn log_file_name(&self) -> &'static str {
            "mock.log"
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
