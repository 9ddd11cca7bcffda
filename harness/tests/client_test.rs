// Integration tests: REST client against the mock management server

#[cfg(test)]
mod tests {
    use review_harness::api::ServerClient;
    use review_harness::config::{ServerConfig, WaiterConfig};
    use review_harness::HarnessError;
    use review_server_mock::{MockMachine, MockServer, ReportResponse};
    use serde_json::json;
    use tokio_test::assert_ok;

    fn client_for(server: &MockServer, password: &str) -> ServerClient {
        client_with_page_limit(server, password, 100)
    }

    fn client_with_page_limit(server: &MockServer, password: &str, limit: u32) -> ServerClient {
        let server_config = ServerConfig {
            host: server.host(),
            port: server.port(),
            admin_login: "admin".to_string(),
            admin_password: password.to_string(),
            request_timeout_secs: 5,
        };
        let waiter = WaiterConfig {
            max_wait_secs: 2,
            poll_interval_ms: 20,
            report_page_limit: limit,
        };
        ServerClient::new(&server_config, &waiter)
    }

    #[tokio::test]
    async fn test_log_in_and_out() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server, "admin");

        let session = client.log_in_as_admin().await.unwrap();
        assert_eq!(session.user().login, "admin");
        assert_eq!(server.active_sessions(), 1);

        assert_ok!(session.log_out().await);
        assert_eq!(server.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server, "wrong");

        match client.log_in_as_admin().await {
            Err(HarnessError::UnexpectedStatus { actual, .. }) => assert_eq!(actual, 400),
            other => panic!("unexpected result: {:?}", other.map(|s| s.user().clone())),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server, "admin");

        let first = client.log_in_as_admin().await.unwrap();
        let second = client.log_in_as_admin().await.unwrap();
        assert_eq!(server.active_sessions(), 2);

        first.log_out().await.unwrap();
        assert_eq!(server.active_sessions(), 1);
        let machines = assert_ok!(second.list_machines(None, 0, 10).await);
        assert_eq!(machines.total, 0);
    }

    #[tokio::test]
    async fn test_authorize_all_machines() {
        let server = MockServer::start().await.unwrap();
        server.add_machine(MockMachine::kea(1, "agent-kea", &[(11, "dhcp4")]));
        server.add_machine(MockMachine::kea(2, "agent-kea6", &[(21, "dhcp6")]));
        let session = client_for(&server, "admin").log_in_as_admin().await.unwrap();

        let authorized = session.authorize_all_machines().await.unwrap();
        assert_eq!(authorized.items.len(), 2);
        assert!(server.machine(1).unwrap().authorized);
        assert!(server.machine(2).unwrap().authorized);

        let pending = session.list_machines(Some(false), 0, 100).await.unwrap();
        assert_eq!(pending.total, 0);
    }

    #[tokio::test]
    async fn test_wait_for_next_machine_states_skips_stale_states() {
        let server = MockServer::start().await.unwrap();
        server.add_machine(
            MockMachine::kea(1, "agent-kea", &[(10, "ca"), (11, "dhcp4"), (12, "dhcp6")])
                .with_stale_state_reads(3),
        );
        let session = client_for(&server, "admin").log_in_as_admin().await.unwrap();
        let _ = session.authorize_all_machines().await.unwrap();

        let states = session.wait_for_next_machine_states().await.unwrap();
        assert_eq!(states.len(), 1);
        let names: Vec<&str> = states[0]
            .daemons_named(&["dhcp4", "dhcp6"])
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["dhcp4", "dhcp6"]);

        let state_reads = server
            .requests()
            .iter()
            .filter(|r| r.as_str() == "GET /api/machines/1/state")
            .count();
        assert_eq!(state_reads, 4);
    }

    #[tokio::test]
    async fn test_config_reports_status_handling() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(11, vec![ReportResponse::InProgress]);
        server.script_reports(12, vec![ReportResponse::Status(404)]);
        server.script_reports(13, vec![ReportResponse::Body(json!({"total": "many"}))]);
        server.script_reports(14, vec![ReportResponse::Status(204)]);
        let session = client_for(&server, "admin").log_in_as_admin().await.unwrap();

        let in_progress = session.list_config_reports(11, 0, 100).await.unwrap_err();
        assert!(matches!(
            in_progress,
            HarnessError::ReviewInProgress { daemon_id: 11 }
        ));
        assert!(in_progress.is_transient());

        let missing = session.list_config_reports(12, 0, 100).await.unwrap_err();
        assert!(matches!(
            missing,
            HarnessError::UnexpectedStatus { actual: 404, .. }
        ));
        assert!(!missing.is_transient());

        let malformed = session.list_config_reports(13, 0, 100).await.unwrap_err();
        assert!(matches!(malformed, HarnessError::Malformed(_)));

        let no_content = session.list_config_reports(14, 0, 100).await.unwrap_err();
        assert!(matches!(
            no_content,
            HarnessError::ReviewInProgress { daemon_id: 14 }
        ));
        assert!(no_content.is_transient());
    }

    #[tokio::test]
    async fn test_wait_for_adding_subnets() {
        let server = MockServer::start().await.unwrap();
        server.push_event("machine 1 authorized");
        server.push_event(r#"added 2 subnets to <daemon id="12" name="dhcp6" appId="100">"#);
        server.push_event(r#"added 3 subnets to <daemon id="11" name="dhcp4" appId="100">"#);
        let session = client_for(&server, "admin").log_in_as_admin().await.unwrap();

        let event = session
            .wait_for_adding_subnets(Some(11), None, Some(100))
            .await
            .unwrap();
        assert!(event.text.contains(r#"name="dhcp4""#));
    }

    #[tokio::test]
    async fn test_wait_for_event_times_out() {
        let server = MockServer::start().await.unwrap();
        server.push_event("machine 1 authorized");
        let session = client_for(&server, "admin").log_in_as_admin().await.unwrap();

        let err = session
            .wait_for_adding_subnets(None, Some("dhcp4"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::TimeoutExceeded { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_ready() {
        let server = MockServer::start().await.unwrap();
        let client = client_for(&server, "admin");
        drop(server);
        // Give the listener task a moment to shut down.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let err = client.log_in_as_admin().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_all_report_pages_are_read() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(
            11,
            vec![ReportResponse::reports(
                &["stat_cmds_presence", "canonical_prefix"],
                &["host_cmds_presence", "dispensable_shared_network", "subnet_dispensable"],
            )],
        );
        server.script_reports(
            12,
            vec![ReportResponse::reports(
                &["host_cmds_presence", "dispensable_shared_network", "subnet_dispensable"],
                &[],
            )],
        );
        let session = client_with_page_limit(&server, "admin", 2)
            .log_in_as_admin()
            .await
            .unwrap();

        let reports = session.list_all_config_reports(11).await.unwrap();
        assert_eq!(reports.total, 5);
        assert_eq!(reports.items.len(), 5);
        assert_eq!(reports.flagged_checkers().len(), 2);

        // The last flagged checker sits on the second page.
        let reports = session.list_all_config_reports(12).await.unwrap();
        assert!(reports.flagged_checkers().contains("subnet_dispensable"));

        let pages = server
            .requests()
            .iter()
            .filter(|r| r.as_str() == "GET /api/daemons/11/config-reports")
            .count();
        assert_eq!(pages, 3);
    }
}
