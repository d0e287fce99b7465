use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;
use webbridge_protocol::Backend;

use crate::credentials::CredentialSet;
use crate::error::{BrowserError, BrowserResult};

/// Obtains credentials interactively when a caller supplies none.
#[async_trait]
pub trait LoginProvider: Send + Sync {
    async fn login(&self, backend: Backend) -> BrowserResult<CredentialSet>;
}

/// Runs an external login helper that opens a visible browser, waits for
/// the user to sign in and writes the resulting cookies as JSON.
///
/// Invoked as `<program> <args..> -service <claude|github> -output <file>`.
#[derive(Debug, Clone)]
pub struct CommandLogin {
    program: String,
    args: Vec<String>,
    cookie_dir: PathBuf,
}

impl CommandLogin {
    pub fn new(program: impl Into<String>, args: Vec<String>, cookie_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cookie_dir: cookie_dir.into(),
        }
    }

    pub fn cookie_file(&self, backend: Backend) -> PathBuf {
        self.cookie_dir
            .join(format!("{}_cookies.json", backend.login_service()))
    }
}

#[async_trait]
impl LoginProvider for CommandLogin {
    async fn login(&self, backend: Backend) -> BrowserResult<CredentialSet> {
        let output = self.cookie_file(backend);
        tokio::fs::create_dir_all(&self.cookie_dir).await?;

        info!(
            service = backend.login_service(),
            output = %output.display(),
            "Waiting for interactive login"
        );

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("-service")
            .arg(backend.login_service())
            .arg("-output")
            .arg(&output)
            .status()
            .await
            .map_err(|e| BrowserError::Login(format!("failed to run {}: {}", self.program, e)))?;

        if !status.success() {
            return Err(BrowserError::Login(format!(
                "{} exited with {}",
                self.program, status
            )));
        }

        let raw = tokio::fs::read_to_string(&output).await.map_err(|e| {
            BrowserError::Login(format!("cannot read {}: {}", output.display(), e))
        })?;
        let credentials = CredentialSet::parse(&raw)
            .map_err(|e| BrowserError::Login(format!("{}: {}", output.display(), e)))?;
        if credentials.is_empty() {
            return Err(BrowserError::Login(format!(
                "{} contains no cookies",
                output.display()
            )));
        }
        Ok(credentials)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script_login(dir: &std::path::Path, body: &str) -> CommandLogin {
        // `sh -c <script> <argv0> -service X -output FILE` puts FILE in $4.
        CommandLogin::new(
            "sh",
            vec!["-c".to_string(), body.to_string(), "login".to_string()],
            dir,
        )
    }

    #[tokio::test]
    async fn test_command_login_reads_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let login = script_login(
            dir.path(),
            r#"echo '[{"name":"user_session","value":"abc"}]' > "$4""#,
        );

        let credentials = login.login(Backend::CopilotCode).await.unwrap();
        assert_eq!(credentials.len(), 1);
        assert!(dir.path().join("github_cookies.json").exists());
    }

    #[tokio::test]
    async fn test_command_login_propagates_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let login = script_login(dir.path(), "exit 3");

        let err = login.login(Backend::ClaudeChat).await.unwrap_err();
        assert!(matches!(err, BrowserError::Login(_)));
    }

    #[tokio::test]
    async fn test_command_login_rejects_empty_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let login = script_login(dir.path(), r#"echo '[]' > "$4""#);

        let err = login.login(Backend::ClaudeChat).await.unwrap_err();
        assert!(matches!(err, BrowserError::Login(_)));
    }

    #[tokio::test]
    async fn test_command_login_rejects_blank_cookie_file() {
        let dir = tempfile::tempdir().unwrap();
        let login = script_login(dir.path(), r#"printf '' > "$4""#);

        let err = login.login(Backend::CopilotCode).await.unwrap_err();
        assert!(matches!(err, BrowserError::Login(msg) if msg.contains("no cookies")));
    }
}
