mod kea;

pub use kea::{IpFamily, KeaService, LeaseRow, LeaseRows};

use crate::compose::ContainerExec;
use crate::error::{HarnessError, Result};
use std::sync::Arc;

/// A continuously running compose service with access to its container
/// filesystem.
#[derive(Clone)]
pub struct ComposeService {
    exec: Arc<dyn ContainerExec>,
    service_name: String,
}

impl ComposeService {
    pub fn new(exec: Arc<dyn ContainerExec>, service_name: impl Into<String>) -> Self {
        Self {
            exec,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Content of a file inside the container.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        let output = self
            .exec
            .exec_in_container(&self.service_name, &["cat".to_string(), path.to_string()], true)
            .await?;
        Ok(output.stdout)
    }

    /// SHA-1 of a file inside the container, as printed by `sha1sum`.
    pub async fn hash_file(&self, path: &str) -> Result<String> {
        let output = self
            .exec
            .exec_in_container(
                &self.service_name,
                &["sha1sum".to_string(), path.to_string()],
                true,
            )
            .await?;
        output
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| HarnessError::Malformed(format!("empty sha1sum output for {}", path)))
    }
}
