// Integration tests: report waiter polling the mock management server

#[cfg(test)]
mod tests {
    use review_harness::api::ServerClient;
    use review_harness::config::{ServerConfig, WaiterConfig};
    use review_harness::review::{FlaggedSetUnchanged, MinimumTotal, ReportWaiter};
    use review_harness::HarnessError;
    use review_server_mock::{MockServer, ReportResponse};
    use std::time::{Duration, Instant};

    fn client_for(server: &MockServer, max_wait_secs: u64) -> ServerClient {
        let server_config = ServerConfig {
            host: server.host(),
            port: server.port(),
            admin_login: "admin".to_string(),
            admin_password: "admin".to_string(),
            request_timeout_secs: 5,
        };
        let waiter = WaiterConfig {
            max_wait_secs,
            poll_interval_ms: 20,
            report_page_limit: 100,
        };
        ServerClient::new(&server_config, &waiter)
    }

    #[tokio::test]
    async fn test_waits_through_review_in_progress() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(
            11,
            vec![
                ReportResponse::InProgress,
                ReportResponse::reports(&["stat_cmds_presence"], &["host_cmds_presence"]),
                ReportResponse::reports(
                    &["stat_cmds_presence", "overlapping_subnet"],
                    &["host_cmds_presence"],
                ),
            ],
        );
        let session = client_for(&server, 5).log_in_as_admin().await.unwrap();

        let reports = session.wait_for_config_reports(11).await.unwrap();
        let flagged = reports.flagged_checkers();
        assert_eq!(flagged.len(), 2);
        assert!(flagged.contains("overlapping_subnet"));
        assert_eq!(reports.total, 3);
        // 202, first page, changed page, repeated page.
        assert_eq!(server.report_polls(11), 4);
    }

    #[tokio::test]
    async fn test_waits_through_no_content() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(
            12,
            vec![
                ReportResponse::Status(204),
                ReportResponse::Status(204),
                ReportResponse::reports(&["pd_pools_exhausted_by_reservations"], &[]),
            ],
        );
        let session = client_for(&server, 5).log_in_as_admin().await.unwrap();

        let reports = session.wait_for_config_reports(12).await.unwrap();
        assert!(reports
            .flagged_checkers()
            .contains("pd_pools_exhausted_by_reservations"));
        assert_eq!(server.report_polls(12), 4);
    }

    #[tokio::test]
    async fn test_stable_reports_need_two_polls() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(
            21,
            vec![ReportResponse::reports(&["pd_pools_exhausted_by_reservations"], &[])],
        );
        let session = client_for(&server, 5).log_in_as_admin().await.unwrap();

        let first = session.wait_for_config_reports(21).await.unwrap();
        let second = session.wait_for_config_reports(21).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.report_polls(21), 4);
    }

    #[tokio::test]
    async fn test_times_out_when_reports_keep_changing() {
        let server = MockServer::start().await.unwrap();
        let changing: Vec<ReportResponse> = (0..500)
            .map(|i| {
                if i % 2 == 0 {
                    ReportResponse::reports(&["canonical_prefix"], &[])
                } else {
                    ReportResponse::reports(&["overlapping_subnet"], &[])
                }
            })
            .collect();
        server.script_reports(11, changing);
        let session = client_for(&server, 1).log_in_as_admin().await.unwrap();

        let started = Instant::now();
        let err = session.wait_for_config_reports(11).await.unwrap_err();
        let elapsed = started.elapsed();

        match err {
            HarnessError::TimeoutExceeded {
                waited, last_error, ..
            } => {
                // One request may run past the deadline before the budget is checked.
                assert!(waited < Duration::from_millis(1500));
                assert!(last_error.unwrap().contains("still changing"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(
            11,
            vec![
                ReportResponse::Status(503),
                ReportResponse::reports(&["ha_mt_presence"], &["ha_dedicated_ports"]),
            ],
        );
        let session = client_for(&server, 5).log_in_as_admin().await.unwrap();

        let reports = session.wait_for_config_reports(11).await.unwrap();
        assert!(reports.flagged_checkers().contains("ha_mt_presence"));
    }

    #[tokio::test]
    async fn test_terminal_status_is_not_retried() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(11, vec![ReportResponse::Status(403)]);
        let session = client_for(&server, 5).log_in_as_admin().await.unwrap();

        let err = session.wait_for_config_reports(11).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::UnexpectedStatus { actual: 403, .. }
        ));
        assert_eq!(server.report_polls(11), 1);
    }

    #[tokio::test]
    async fn test_minimum_total_predicate_over_http() {
        let server = MockServer::start().await.unwrap();
        server.script_reports(
            11,
            vec![
                ReportResponse::reports(&["stat_cmds_presence"], &[]),
                ReportResponse::reports(&["stat_cmds_presence"], &[]),
                ReportResponse::reports(&["stat_cmds_presence"], &["host_cmds_presence"]),
            ],
        );
        let session = client_for(&server, 5).log_in_as_admin().await.unwrap();

        let waiter = ReportWaiter::new(session.wait_config()).with_predicate(MinimumTotal {
            inner: FlaggedSetUnchanged,
            min_total: 2,
        });
        let reports = waiter.wait_for_stable_reports(&session, 11).await.unwrap();
        assert_eq!(reports.total, 2);
    }
}
