// SPDX-License-Identifier: GPL-3.0-only

//! External command execution
//!
//! Secrets are fed through stdin and never appear in rendered command lines.

use std::ffi::{OsStr, OsString};
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Result, SysError};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// First non-empty stdout line, trimmed
    pub fn first_line(&self) -> Option<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    pub fn into_error(self) -> SysError {
        SysError::CommandFailed {
            command: self.command,
            code: self.code,
            stderr: self.stderr.trim().to_string(),
        }
    }
}

pub fn render(program: &str, args: &[OsString]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        let args: Vec<_> = args.iter().map(|arg| arg.to_string_lossy()).collect();
        format!("{} {}", program, args.join(" "))
    }
}

/// Builder for one invocation of an external tool
#[derive(Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Bytes written to the child's stdin, e.g. a passphrase for `--key-file=-`
    pub fn stdin_secret(mut self, input: &[u8]) -> Self {
        self.stdin = Some(input.to_vec());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn render(&self) -> String {
        render(&self.program, &self.args)
    }

    /// Run to completion and capture output, whatever the exit status
    pub fn output(&self) -> Result<CommandOutput> {
        let rendered = self.render();
        debug!("Running {}", rendered);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|error| match error.kind() {
            ErrorKind::NotFound => SysError::ToolNotFound(self.program.clone()),
            ErrorKind::PermissionDenied => SysError::PermissionDenied(rendered.clone()),
            _ => SysError::Io(error),
        })?;

        if let Some(input) = &self.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            // The tool may exit before reading everything it was given.
            if let Err(error) = stdin.write_all(input)
                && error.kind() != ErrorKind::BrokenPipe
            {
                return Err(SysError::Io(error));
            }
        }

        let output = child.wait_with_output()?;
        Ok(CommandOutput {
            command: rendered,
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run to completion; a non-zero exit status is an error
    pub fn run(&self) -> Result<CommandOutput> {
        let output = self.output()?;
        if !output.success() {
            return Err(output.into_error());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_command_context() {
        let command = ToolCommand::new("cryptsetup")
            .args(["open", "--type", "luks", "--key-file=-"])
            .arg("/dev/sdb1")
            .arg("sdb1")
            .stdin_secret(b"secret");
        assert_eq!(
            command.render(),
            "cryptsetup open --type luks --key-file=- /dev/sdb1 sdb1"
        );
        assert!(!command.render().contains("secret"));
    }

    #[test]
    fn missing_tool_is_reported() {
        let error = ToolCommand::new("partcrypt-no-such-tool")
            .output()
            .expect_err("tool must not exist");
        assert!(matches!(error, SysError::ToolNotFound(_)));
    }

    #[test]
    fn captures_exit_code_and_stdin() {
        let output = ToolCommand::new("sh")
            .args(["-c", "cat; exit 3"])
            .stdin_secret(b"piped")
            .output()
            .expect("sh runs");
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "piped");

        let error = ToolCommand::new("sh")
            .args(["-c", "echo boom >&2; exit 1"])
            .run()
            .expect_err("non-zero exit");
        assert_eq!(error.exit_code(), Some(1));
        assert!(error.to_string().contains("boom"));
    }
}
