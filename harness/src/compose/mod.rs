use crate::config::ComposeConfig;
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Result of a command run inside a service container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs commands inside the container of a compose service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerExec: Send + Sync {
    /// Fails with [`HarnessError::ExecFailed`] on a non-zero exit code when
    /// `check` is set.
    async fn exec_in_container(
        &self,
        service_name: &str,
        command: &[String],
        check: bool,
    ) -> Result<ExecOutput>;
}

/// `docker compose` driven through its command line.
#[derive(Debug, Clone)]
pub struct DockerCompose {
    binary: Vec<String>,
    project_name: Option<String>,
    compose_files: Vec<PathBuf>,
    project_directory: Option<PathBuf>,
}

impl DockerCompose {
    pub fn new(config: &ComposeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            project_name: config.project_name.clone(),
            compose_files: config.compose_files.clone(),
            project_directory: config.project_directory.clone(),
        }
    }

    /// The compose invocation prefix, e.g. `docker compose -p proj -f a.yml`.
    pub fn compose_command(&self) -> Vec<String> {
        let mut cmd = self.binary.clone();
        if let Some(ref dir) = self.project_directory {
            cmd.push("--project-directory".to_string());
            cmd.push(dir.display().to_string());
        }
        if let Some(ref name) = self.project_name {
            cmd.push("-p".to_string());
            cmd.push(name.clone());
        }
        for file in &self.compose_files {
            cmd.push("-f".to_string());
            cmd.push(file.display().to_string());
        }
        cmd
    }

    fn exec_command(&self, service_name: &str, command: &[String]) -> Vec<String> {
        let mut cmd = self.compose_command();
        cmd.push("exec".to_string());
        cmd.push("-T".to_string());
        cmd.push(service_name.to_string());
        cmd.extend(command.iter().cloned());
        cmd
    }
}

#[async_trait]
impl ContainerExec for DockerCompose {
    async fn exec_in_container(
        &self,
        service_name: &str,
        command: &[String],
        check: bool,
    ) -> Result<ExecOutput> {
        let full = self.exec_command(service_name, command);
        let (program, args) = full
            .split_first()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty compose binary")
            })?;
        debug!("Executing in {}: {:?}", service_name, command);

        let mut cmd = Command::new(program);
        let _ = cmd.args(args);
        if let Some(ref dir) = self.project_directory {
            let _ = cmd.current_dir(dir);
        }
        let output = cmd.output().await?;

        let result = ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        };

        if check && result.exit_code != 0 {
            return Err(HarnessError::ExecFailed {
                service: service_name.to_string(),
                command: command.to_vec(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_command_layout() {
        let compose = DockerCompose::new(&ComposeConfig {
            binary: vec!["docker".to_string(), "compose".to_string()],
            project_name: Some("review".to_string()),
            compose_files: vec![PathBuf::from("docker-compose.yaml")],
            project_directory: None,
        });

        let cmd = compose.exec_command(
            "agent-kea",
            &["cat".to_string(), "/var/lib/kea/kea-leases4.csv".to_string()],
        );
        assert_eq!(
            cmd,
            vec![
                "docker",
                "compose",
                "-p",
                "review",
                "-f",
                "docker-compose.yaml",
                "exec",
                "-T",
                "agent-kea",
                "cat",
                "/var/lib/kea/kea-leases4.csv"
            ]
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        // `false` stands in for the compose binary; it ignores its arguments.
        let compose = DockerCompose::new(&ComposeConfig {
            binary: vec!["false".to_string()],
            ..ComposeConfig::default()
        });

        let result = compose
            .exec_in_container("agent-kea", &["true".to_string()], true)
            .await;
        match result {
            Err(HarnessError::ExecFailed { exit_code, .. }) => assert_ne!(exit_code, 0),
            other => panic!("unexpected result: {:?}", other),
        }

        let unchecked = compose
            .exec_in_container("agent-kea", &["true".to_string()], false)
            .await
            .unwrap();
        assert_ne!(unchecked.exit_code, 0);
    }
}
