//! Configuration review scenarios.
//!
//! Each scenario logs in with its own session, authorizes the machines the
//! compose stack brought up, waits for their fresh states and verifies the
//! review reports of the relevant DHCP daemons. The session is logged out
//! on success; on failure it is simply dropped.

use crate::api::{DaemonState, MachineState, ReportCollection, ServerClient, Session};
use crate::error::{HarnessError, Result};
use crate::review::{ReviewExpectation, TotalBound};
use clap::ValueEnum;
use std::collections::BTreeSet;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Standalone Kea with DHCPv4 and DHCPv6 configuration issues.
    DhcpReview,
    /// HA pair with multi-threading enabled only at the top level.
    HaOnlyTopMt,
    /// HA pair with full multi-threading talking through the control agent.
    HaMt,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scenario::DhcpReview => "dhcp-review",
            Scenario::HaOnlyTopMt => "ha-only-top-mt",
            Scenario::HaMt => "ha-mt",
        };
        f.write_str(name)
    }
}

/// Verified reports of one daemon.
#[derive(Debug, Clone)]
pub struct DaemonOutcome {
    pub machine_id: i64,
    pub daemon: DaemonState,
    pub reports: ReportCollection,
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub daemons: Vec<DaemonOutcome>,
}

pub async fn run(client: &ServerClient, scenario: Scenario) -> Result<ScenarioOutcome> {
    info!("Running scenario {}", scenario);
    let session = client.log_in_as_admin().await?;
    let daemons = match scenario {
        Scenario::DhcpReview => dhcp_config_review(&session).await?,
        Scenario::HaOnlyTopMt => ha_pair_only_top_mt(&session).await?,
        Scenario::HaMt => ha_pair_mt(&session).await?,
    };
    session.log_out().await?;
    info!("Scenario {} passed ({} daemons)", scenario, daemons.len());
    Ok(ScenarioOutcome { scenario, daemons })
}

/// The DHCPv4 daemon must flag five checkers and the DHCPv6 daemon two.
/// Only some of them are named; the rest depend on the daemon configuration.
pub fn dhcp4_expectation() -> ReviewExpectation {
    ReviewExpectation {
        total: TotalBound::GreaterThan(5),
        flagged_count: Some(5),
        includes: vec![
            "stat_cmds_presence",
            "overlapping_subnet",
            "canonical_prefix",
            "address_pools_exhausted_by_reservations",
        ],
        excludes: vec![],
    }
}

pub fn dhcp6_expectation() -> ReviewExpectation {
    ReviewExpectation {
        total: TotalBound::AtLeast(2),
        flagged_count: Some(2),
        includes: vec!["pd_pools_exhausted_by_reservations"],
        excludes: vec![],
    }
}

pub fn ha_only_top_mt_expectation() -> ReviewExpectation {
    ReviewExpectation {
        total: TotalBound::GreaterThan(1),
        flagged_count: None,
        includes: vec!["ha_mt_presence"],
        excludes: vec![],
    }
}

pub fn ha_mt_expectation() -> ReviewExpectation {
    ReviewExpectation {
        total: TotalBound::GreaterThan(1),
        flagged_count: None,
        includes: vec!["ha_dedicated_ports"],
        excludes: vec!["ha_mt_presence"],
    }
}

/// Prepares the server: authorizes machines and returns their fresh states.
async fn discover(session: &Session) -> Result<Vec<MachineState>> {
    let _ = session.authorize_all_machines().await?;
    session.wait_for_next_machine_states().await
}

async fn verify_daemon(
    session: &Session,
    machine_id: i64,
    daemon: &DaemonState,
    expectation: &ReviewExpectation,
) -> Result<DaemonOutcome> {
    let reports = session.wait_for_config_reports(daemon.id).await?;
    expectation.verify(&reports)?;
    info!(
        "Daemon {} ({}) on machine {}: {} reports, flagged {:?}",
        daemon.id,
        daemon.name,
        machine_id,
        reports.total,
        reports.flagged_checkers()
    );
    Ok(DaemonOutcome {
        machine_id,
        daemon: daemon.clone(),
        reports,
    })
}

fn single_daemon<'a>(state: &'a MachineState, name: &str) -> Result<&'a DaemonState> {
    let daemons = state.daemons_named(&[name]);
    match daemons.as_slice() {
        [daemon] => Ok(*daemon),
        _ => Err(count_mismatch(
            format!("{} daemons on machine {}", name, state.id),
            1,
            &daemons,
        )),
    }
}

fn count_mismatch(what: String, expected: usize, found: &[&DaemonState]) -> HarnessError {
    HarnessError::AssertionMismatch {
        what: format!("{} (expected {}, got {})", what, expected, found.len()),
        expected: BTreeSet::new(),
        actual: found.iter().map(|d| format!("{}#{}", d.name, d.id)).collect(),
    }
}

pub async fn dhcp_config_review(session: &Session) -> Result<Vec<DaemonOutcome>> {
    let states = discover(session).await?;
    let state = states.first().ok_or_else(|| HarnessError::AssertionMismatch {
        what: "authorized machines (expected at least 1)".to_string(),
        expected: BTreeSet::new(),
        actual: BTreeSet::new(),
    })?;

    let dhcp4 = single_daemon(state, "dhcp4")?;
    let dhcp6 = single_daemon(state, "dhcp6")?;

    Ok(vec![
        verify_daemon(session, state.id, dhcp4, &dhcp4_expectation()).await?,
        verify_daemon(session, state.id, dhcp6, &dhcp6_expectation()).await?,
    ])
}

async fn ha_pair(session: &Session, expectation: &ReviewExpectation) -> Result<Vec<DaemonOutcome>> {
    let states = discover(session).await?;
    if states.len() != 2 {
        return Err(HarnessError::AssertionMismatch {
            what: format!("HA peers (expected 2, got {})", states.len()),
            expected: BTreeSet::new(),
            actual: states.iter().map(|s| s.address.clone()).collect(),
        });
    }

    let mut outcomes = Vec::new();
    for state in &states {
        let daemons = state.daemons_named(&["dhcp4", "dhcp6"]);
        if daemons.len() != 2 {
            return Err(count_mismatch(
                format!("DHCP daemons on machine {}", state.id),
                2,
                &daemons,
            ));
        }
        for daemon in daemons {
            outcomes.push(verify_daemon(session, state.id, daemon, expectation).await?);
        }
    }
    Ok(outcomes)
}

pub async fn ha_pair_only_top_mt(session: &Session) -> Result<Vec<DaemonOutcome>> {
    ha_pair(session, &ha_only_top_mt_expectation()).await
}

pub async fn ha_pair_mt(session: &Session) -> Result<Vec<DaemonOutcome>> {
    ha_pair(session, &ha_mt_expectation()).await
}
