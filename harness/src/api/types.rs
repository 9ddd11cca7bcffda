//! Records exchanged with the management server REST API.
//!
//! Responses are mapped onto these types as soon as they arrive so that a
//! shape the harness does not understand fails at the boundary instead of
//! deep inside an assertion.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// A single checker result produced by a configuration review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub checker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ConfigReport {
    /// Whether the checker found something worth reporting.
    pub fn is_issue(&self) -> bool {
        self.content.as_deref().map_or(false, |c| !c.is_empty())
    }
}

/// One page of configuration reports for a daemon. `total` counts every
/// report the review produced, so it may exceed `items.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCollection {
    pub total: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<ConfigReport>,
}

impl ReportCollection {
    /// Checker names whose report carries content.
    pub fn flagged_checkers(&self) -> BTreeSet<String> {
        self.items
            .iter()
            .filter(|r| r.is_issue())
            .map(|r| r.checker.clone())
            .collect()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppDetails {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub daemons: Vec<DaemonState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub id: i64,
    #[serde(rename = "type")]
    pub app_type: String,
    #[serde(default)]
    pub details: AppDetails,
}

impl AppState {
    pub fn daemons_named(&self, names: &[&str]) -> Vec<&DaemonState> {
        self.details
            .daemons
            .iter()
            .filter(|d| names.iter().any(|n| *n == d.name))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineState {
    pub id: i64,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub authorized: bool,
    #[serde(with = "server_timestamp")]
    pub last_visited_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub apps: Vec<AppState>,
}

impl MachineState {
    /// Every daemon of every app with one of the given names.
    pub fn daemons_named(&self, names: &[&str]) -> Vec<&DaemonState> {
        self.apps
            .iter()
            .flat_map(|app| app.daemons_named(names))
            .collect()
    }
}

/// A machine as listed and updated through `/machines`. Unknown fields are
/// kept so that an update sends back what the server returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: i64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub agent_port: u16,
    #[serde(default)]
    pub authorized: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineList {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<Machine>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub groups: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: i64,
    #[serde(with = "server_timestamp")]
    pub created_at: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub level: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventList {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<Event>,
    pub total: u64,
}

/// Login request body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Credentials<'a> {
    pub useremail: &'a str,
    pub userpassword: &'a str,
}

/// The server writes timestamps as RFC 3339, sometimes without an offset.
/// Offset-less values are read as UTC.
pub(crate) mod server_timestamp {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))
    }
}
