use crate::compose::ContainerExec;
use crate::error::{HarnessError, Result};
use crate::services::ComposeService;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// IP family of a Kea DHCP daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn number(&self) -> u8 {
        match self {
            IpFamily::V4 => 4,
            IpFamily::V6 => 6,
        }
    }

    /// Location of the memfile lease database inside a Kea container.
    pub fn lease_file_path(&self) -> String {
        format!("/var/lib/kea/kea-leases{}.csv", self.number())
    }
}

impl TryFrom<u8> for IpFamily {
    type Error = HarnessError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            4 => Ok(IpFamily::V4),
            6 => Ok(IpFamily::V6),
            other => Err(HarnessError::Malformed(format!(
                "unsupported IP family {}",
                other
            ))),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// One lease, keyed by the column names of the header row.
pub type LeaseRow = HashMap<String, String>;

/// Rows of a lease file, parsed one at a time as they are consumed.
pub struct LeaseRows {
    inner: csv::DeserializeRecordsIntoIter<Cursor<Vec<u8>>, LeaseRow>,
}

impl LeaseRows {
    pub fn from_csv(content: String) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(Cursor::new(content.into_bytes()));
        Self {
            inner: reader.into_deserialize(),
        }
    }
}

impl Iterator for LeaseRows {
    type Item = Result<LeaseRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|row| row.map_err(HarnessError::from))
    }
}

/// A compose service running the Kea DHCP daemons next to the agent.
#[derive(Clone)]
pub struct KeaService {
    service: ComposeService,
}

impl KeaService {
    pub fn new(exec: Arc<dyn ContainerExec>, service_name: impl Into<String>) -> Self {
        Self {
            service: ComposeService::new(exec, service_name),
        }
    }

    pub fn service(&self) -> &ComposeService {
        &self.service
    }

    pub async fn read_lease_file(&self, family: IpFamily) -> Result<LeaseRows> {
        let path = family.lease_file_path();
        debug!("Reading {} from {}", path, self.service.service_name());
        let content = self.service.read_file(&path).await?;
        Ok(LeaseRows::from_csv(content))
    }
}
