//! Process spawn configuration

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// How command lines are turned into child processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Shell that interprets the command line
    pub shell: String,
}

impl ProcessConfig {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Flag that makes the shell run a single command line
    pub fn command_flag(&self) -> &'static str {
        let name = Path::new(&self.shell)
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_ascii_lowercase();

        if name == "cmd" {
            "/C"
        } else {
            "-c"
        }
    }

    /// Build the command for one command line
    ///
    /// All three standard streams are piped. On Unix the child leads its own
    /// process group so the whole pipeline can be killed at once.
    pub fn build(&self, command_line: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(self.command_flag())
            .arg(command_line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new(if cfg!(windows) { "cmd" } else { "/bin/sh" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_flag() {
        assert_eq!(ProcessConfig::new("/bin/sh").command_flag(), "-c");
        assert_eq!(ProcessConfig::new("/usr/bin/bash").command_flag(), "-c");
        assert_eq!(ProcessConfig::new("cmd").command_flag(), "/C");
        assert_eq!(ProcessConfig::new("CMD.EXE").command_flag(), "/C");
    }

    #[test]
    fn test_build_args() {
        let cmd = ProcessConfig::new("/bin/sh").build("echo hi");
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "/bin/sh");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, ["-c", "echo hi"]);
    }
}
