use anyhow::{Context, Result};
use declarative::CommandOutput;
use std::process::{Command, Stdio};

/// Run a command and capture its full output, whatever the exit status
pub fn output(cmd: &str, args: &[&str]) -> Result<CommandOutput> {
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map(CommandOutput::from)
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
}

/// Run a command and capture stdout
pub fn run_capture(cmd: &str, args: &[&str]) -> Result<String> {
    let output = output(cmd, args)?;

    if output.success {
        Ok(output.stdout_str().trim().to_string())
    } else {
        anyhow::bail!(
            "{} {} failed: {}",
            cmd,
            args.join(" "),
            output.stderr_str().trim()
        )
    }
}

/// Run a command silently, returning success/failure
pub fn run_quiet(cmd: &str, args: &[&str]) -> bool {
    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a command line through `sh -c`, optionally with its own search path
pub fn shell(command: &str, path: Option<&str>) -> Result<CommandOutput> {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]).stdin(Stdio::null());
    if let Some(path) = path {
        cmd.env("PATH", path);
    }
    cmd.output()
        .map(CommandOutput::from)
        .with_context(|| format!("Failed to execute: sh -c {command}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_reports_exit_code() {
        let out = shell("echo hi; exit 3", None).unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout_str(), "hi\n");
    }

    #[test]
    fn test_shell_uses_given_path() {
        let out = shell("echo $PATH", Some("/usr/bin:/bin")).unwrap();
        assert_eq!(out.stdout_str().trim(), "/usr/bin:/bin");
    }

    #[test]
    fn test_run_capture() {
        assert_eq!(run_capture("echo", &["  padded  "]).unwrap(), "padded");
        let err = run_capture("sh", &["-c", "echo nope >&2; exit 1"]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_run_quiet() {
        assert!(run_quiet("true", &[]));
        assert!(!run_quiet("false", &[]));
        assert!(!run_quiet("definitely-not-a-command-xyz", &[]));
    }
}
