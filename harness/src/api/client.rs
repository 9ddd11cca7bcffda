use crate::api::types::{
    Credentials, Event, EventList, Machine, MachineList, MachineState, ReportCollection, User,
};
use crate::config::{HarnessConfig, ServerConfig, WaiterConfig};
use crate::error::{HarnessError, Result};
use crate::review::{ReportSource, ReportWaiter};
use crate::util::{wait_for_success, WaitConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// Entry point to the management server. Holds no authentication state;
/// every [`Session`] it creates carries its own cookie jar.
#[derive(Debug, Clone)]
pub struct ServerClient {
    api_url: String,
    request_timeout: Duration,
    admin_login: String,
    admin_password: String,
    waiter: WaiterConfig,
}

impl ServerClient {
    pub fn new(server: &ServerConfig, waiter: &WaiterConfig) -> Self {
        Self {
            api_url: server.api_url(),
            request_timeout: server.request_timeout(),
            admin_login: server.admin_login.clone(),
            admin_password: server.admin_password.clone(),
            waiter: waiter.clone(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.server, &config.waiter)
    }

    pub async fn log_in(&self, login: &str, password: &str) -> Result<Session> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.request_timeout)
            .build()?;

        let response = http
            .post(format!("{}/sessions", self.api_url))
            .json(&Credentials {
                useremail: login,
                userpassword: password,
            })
            .send()
            .await?;
        let user: User = expect_json(response, "/sessions", StatusCode::OK).await?;
        info!("Logged in as {} (user id {})", user.login, user.id);

        Ok(Session {
            http,
            api_url: self.api_url.clone(),
            user,
            wait: WaitConfig::from(&self.waiter),
            report_page_limit: self.waiter.report_page_limit,
        })
    }

    pub async fn log_in_as_admin(&self) -> Result<Session> {
        self.log_in(&self.admin_login, &self.admin_password).await
    }
}

/// An authenticated conversation with the server. Created by
/// [`ServerClient::log_in`] and ended by [`Session::log_out`].
#[derive(Debug)]
pub struct Session {
    http: reqwest::Client,
    api_url: String,
    user: User,
    wait: WaitConfig,
    report_page_limit: u32,
}

impl Session {
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    pub async fn log_out(self) -> Result<()> {
        let response = self.request(Method::DELETE, "/sessions").send().await?;
        expect_status(&response, "/sessions", StatusCode::OK)?;
        info!("Logged out {}", self.user.login);
        Ok(())
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        debug!("{} {}{}", method, self.api_url, endpoint);
        self.http.request(method, format!("{}{}", self.api_url, endpoint))
    }

    // List / Search

    pub async fn list_machines(
        &self,
        authorized: Option<bool>,
        start: u32,
        limit: u32,
    ) -> Result<MachineList> {
        let mut query = vec![("start", start.to_string()), ("limit", limit.to_string())];
        if let Some(authorized) = authorized {
            query.push(("authorized", authorized.to_string()));
        }
        let response = self
            .request(Method::GET, "/machines")
            .query(&query)
            .send()
            .await?;
        expect_json(response, "/machines", StatusCode::OK).await
    }

    pub async fn list_events(&self, start: u32, limit: u32) -> Result<EventList> {
        let response = self
            .request(Method::GET, "/events")
            .query(&[("start", start), ("limit", limit)])
            .send()
            .await?;
        expect_json(response, "/events", StatusCode::OK).await
    }

    /// One page of configuration reports. A review that has not finished
    /// yet is answered with `202 Accepted` or `204 No Content`.
    pub async fn list_config_reports(
        &self,
        daemon_id: i64,
        start: u32,
        limit: u32,
    ) -> Result<ReportCollection> {
        let endpoint = format!("/daemons/{}/config-reports", daemon_id);
        let response = self
            .request(Method::GET, &endpoint)
            .query(&[("start", start), ("limit", limit)])
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
                Err(HarnessError::ReviewInProgress { daemon_id })
            }
            _ => expect_json(response, &endpoint, StatusCode::OK).await,
        }
    }

    /// Every configuration report of a daemon, page after page. A review
    /// that changes while it is being paged is reported as not ready.
    pub async fn list_all_config_reports(&self, daemon_id: i64) -> Result<ReportCollection> {
        let limit = self.report_page_limit.max(1);
        let mut collection = self.list_config_reports(daemon_id, 0, limit).await?;
        while (collection.items.len() as u64) < collection.total {
            let start = u32::try_from(collection.items.len()).map_err(|_| {
                HarnessError::Malformed(format!(
                    "too many config reports for daemon {}",
                    daemon_id
                ))
            })?;
            let page = self.list_config_reports(daemon_id, start, limit).await?;
            if page.items.is_empty() || page.total != collection.total {
                return Err(HarnessError::NotReady(format!(
                    "config reports of daemon {} changed while paging ({} of {} read)",
                    daemon_id,
                    collection.items.len(),
                    collection.total
                )));
            }
            collection.items.extend(page.items);
        }
        Ok(collection)
    }

    // Read

    pub async fn read_machine_state(&self, machine_id: i64) -> Result<MachineState> {
        let endpoint = format!("/machines/{}/state", machine_id);
        let response = self.request(Method::GET, &endpoint).send().await?;
        expect_json(response, &endpoint, StatusCode::OK).await
    }

    // Update

    pub async fn update_machine(&self, machine: &Machine) -> Result<Machine> {
        let endpoint = format!("/machines/{}", machine.id);
        let response = self
            .request(Method::PUT, &endpoint)
            .json(machine)
            .send()
            .await?;
        expect_json(response, &endpoint, StatusCode::OK).await
    }

    // Complex

    /// Marks every unauthorized machine as authorized.
    pub async fn authorize_all_machines(&self) -> Result<MachineList> {
        let mut machines = self.list_machines(Some(false), 0, 100).await?;
        for machine in machines.items.iter_mut() {
            machine.authorized = true;
            let _ = self.update_machine(machine).await?;
            info!("Authorized machine {} ({})", machine.id, machine.address);
        }
        Ok(machines)
    }

    // Waits

    /// Waits until the server has pulled the machine state at or after
    /// `since`.
    pub async fn wait_for_next_machine_state(
        &self,
        machine_id: i64,
        since: DateTime<Utc>,
    ) -> Result<MachineState> {
        wait_for_success(
            &self.wait,
            move || async move {
                let state = self.read_machine_state(machine_id).await?;
                if state.last_visited_at < since {
                    return Err(HarnessError::NotReady(format!(
                        "machine {} last visited at {}",
                        machine_id, state.last_visited_at
                    )));
                }
                Ok(state)
            },
            &format!("next state of machine {}", machine_id),
        )
        .await
    }

    /// Fresh states of all authorized machines, fetched one after another.
    pub async fn wait_for_next_machine_states(&self) -> Result<Vec<MachineState>> {
        let since = Utc::now();
        let machines = self.list_machines(Some(true), 0, 100).await?;
        let mut states = Vec::with_capacity(machines.items.len());
        for machine in &machines.items {
            states.push(self.wait_for_next_machine_state(machine.id, since).await?);
        }
        Ok(states)
    }

    /// Waits until the configuration reports of a daemon stop changing.
    pub async fn wait_for_config_reports(&self, daemon_id: i64) -> Result<ReportCollection> {
        ReportWaiter::new(&self.wait)
            .wait_for_stable_reports(self, daemon_id)
            .await
    }

    /// Waits for an event newer than any seen before that satisfies
    /// `condition`.
    pub async fn wait_for_event<F>(&self, condition: F, description: &str) -> Result<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let watermark = Mutex::new(DateTime::<Utc>::MIN_UTC);
        let watermark = &watermark;
        let condition = &condition;
        wait_for_success(
            &self.wait,
            move || async move {
                let events = self.list_events(0, 100).await?;
                // The server lists the newest event first.
                for event in events.items.iter().rev() {
                    {
                        let mut seen = watermark.lock().unwrap_or_else(|e| e.into_inner());
                        if event.created_at < *seen {
                            continue;
                        }
                        *seen = event.created_at;
                    }
                    if condition(event) {
                        return Ok(event.clone());
                    }
                }
                Err(HarnessError::NotReady(format!(
                    "no matching event among {}",
                    events.items.len()
                )))
            },
            description,
        )
        .await
    }

    /// Waits for the "added subnets" event of a daemon.
    pub async fn wait_for_adding_subnets(
        &self,
        daemon_id: Option<i64>,
        daemon_name: Option<&str>,
        app_id: Option<i64>,
    ) -> Result<Event> {
        self.wait_for_event(
            |event| match added_subnets_pattern().captures(&event.text) {
                Some(caps) => {
                    daemon_id.map_or(true, |id| caps["daemon_id"] == id.to_string())
                        && daemon_name.map_or(true, |name| &caps["daemon_name"] == name)
                        && app_id.map_or(true, |id| caps["app_id"] == id.to_string())
                }
                None => false,
            },
            "subnets added to daemon",
        )
        .await
    }
}

#[async_trait]
impl ReportSource for Session {
    async fn fetch_reports(&self, daemon_id: i64) -> Result<ReportCollection> {
        self.list_all_config_reports(daemon_id).await
    }
}

fn added_subnets_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"added (?:(?:\d+ subnets)|(?:<subnet.*>)) to <daemon id="(?P<daemon_id>\d+)" name="(?P<daemon_name>[^"]*)" appId="(?P<app_id>\d+)""#,
        )
        .expect("added subnets pattern is valid")
    })
}

fn expect_status(response: &Response, endpoint: &str, expected: StatusCode) -> Result<()> {
    if response.status() != expected {
        return Err(HarnessError::UnexpectedStatus {
            endpoint: endpoint.to_string(),
            expected: expected.as_u16(),
            actual: response.status().as_u16(),
        });
    }
    Ok(())
}

async fn expect_json<T: DeserializeOwned>(
    response: Response,
    endpoint: &str,
    expected: StatusCode,
) -> Result<T> {
    expect_status(&response, endpoint, expected)?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| HarnessError::Malformed(format!("{}: {}", endpoint, e)))
}
