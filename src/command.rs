use std::fmt;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// An external program plus its fixed leading arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Appends fixed arguments after the existing ones.
    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|arg| arg.to_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the command with `extra` appended and returns its stdout. A non-zero
    /// exit is an error carrying the trimmed stderr.
    pub fn output(&self, extra: &[&str]) -> Result<Vec<u8>, HarvestError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| HarvestError::Command(format!("{}: {err}", self.program)))?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", self.program, output.status)
        } else {
            format!("{} exited with {}: {stderr}", self.program, output.status)
        };
        Err(HarvestError::Command(message))
    }

    /// Like [`CommandSpec::output`] but discards stdout.
    pub fn run(&self, extra: &[&str]) -> Result<(), HarvestError> {
        self.output(extra).map(|_| ())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<String>> for CommandSpec {
    type Error = HarvestError;

    fn try_from(mut value: Vec<String>) -> Result<Self, Self::Error> {
        if value.is_empty() || value[0].trim().is_empty() {
            return Err(HarvestError::ConfigValue(
                "command must name a program".to_string(),
            ));
        }
        let program = value.remove(0);
        Ok(Self {
            program,
            args: value,
        })
    }
}

impl From<CommandSpec> for Vec<String> {
    fn from(value: CommandSpec) -> Self {
        let mut out = vec![value.program];
        out.extend(value.args);
        out
    }
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn captures_stdout() {
        let spec = CommandSpec::new("sh", &["-c", "printf hello"]);
        assert_eq!(spec.output(&[]).unwrap(), b"hello");
    }

    #[test]
    fn appends_extra_arguments() {
        let spec = CommandSpec::new("sh", &["-c", "printf \"$0\""]);
        assert_eq!(spec.output(&["u1"]).unwrap(), b"u1");
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let spec = CommandSpec::new("sh", &["-c", "echo boom >&2; exit 3"]);
        let err = spec.run(&[]).unwrap_err();
        assert_matches!(&err, HarvestError::Command(message) if message.contains("boom"));
    }

    #[test]
    fn empty_argv_is_rejected() {
        let err = CommandSpec::try_from(Vec::<String>::new()).unwrap_err();
        assert_matches!(err, HarvestError::ConfigValue(_));
    }
}
