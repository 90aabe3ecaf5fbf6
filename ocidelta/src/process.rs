use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Run a command to completion, capturing stdout. A non-zero exit status is
/// an error carrying the captured stderr.
pub async fn run_capture<S: AsRef<str>>(args: &[S], cwd: Option<&Path>) -> Result<String> {
    let args: Vec<&str> = args.iter().map(|s| s.as_ref()).collect();
    debug!(?args, ?cwd, "exec");

    let mut cmd = Command::new(args[0]);
    cmd.env_remove("LANG");
    cmd.env_remove("LC_CTYPE");
    cmd.env_remove("LC_NUMERIC");
    cmd.env_remove("LC_TIME");
    cmd.env_remove("LC_COLLATE");
    cmd.env_remove("LC_MONETARY");
    cmd.env_remove("LC_MESSAGES");
    cmd.env_remove("LC_ALL");

    if args.len() > 1 {
        cmd.args(&args[1..]);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let output = cmd.output().await.map_err(|e| Error::Subprocess {
        command: args[0].to_string(),
        message: e.to_string(),
    })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(Error::Subprocess {
            command: args.join(" "),
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_capture(&["echo", "hello"], None).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let err = run_capture(&["sh", "-c", "echo oops >&2; exit 3"], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        assert!(run_capture(&["definitely-not-a-real-binary"], None)
            .await
            .is_err());
    }
}
