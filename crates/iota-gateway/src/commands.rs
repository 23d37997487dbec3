//! Command executor
//!
//! Delivers broker-originated commands to a device endpoint, one HTTP POST
//! per command, strictly in sequence. The first failure aborts the batch.
//!
//! ```text
//! encode ──▶ POST endpoint ──▶ 200 ──▶ decode ──▶ (spawned) report COMPLETED
//!                 │              └───▶ non-200 ──▶ CommandResponse
//!                 └──────────────────▶ transport error / timeout ──▶ CommandTransport
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iota_core::{CommandInvocation, CommandStatus, Entity, GatewayError, GatewayResult};
use iota_ul::{decode_result, encode_command};
use reqwest::{Client, StatusCode};
use tracing::{debug, error, info, instrument};

/// Receives command status changes
#[async_trait]
pub trait CommandReporter: Send + Sync {
    async fn report(
        &self,
        api_key: &str,
        device: &Entity,
        command: &str,
        status: CommandStatus,
        result: &str,
    ) -> GatewayResult<()>;
}

pub struct CommandExecutor {
    client: Client,
    reporter: Arc<dyn CommandReporter>,
}

impl CommandExecutor {
    pub fn new(timeout: Duration, reporter: Arc<dyn CommandReporter>) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, reporter })
    }

    /// Run a batch of commands against `device`.
    ///
    /// Devices without an endpoint are polled: nothing is sent and their
    /// commands stay pending.
    #[instrument(skip(self, api_key, device, commands), fields(device_id = %device.id))]
    pub async fn execute(
        &self,
        api_key: Option<&str>,
        device: &Entity,
        commands: &[CommandInvocation],
    ) -> GatewayResult<()> {
        let Some(endpoint) = device.endpoint.as_deref() else {
            debug!(commands = commands.len(), "Device polls for commands, nothing to send");
            return Ok(());
        };

        for command in commands {
            self.send(api_key, device, endpoint, command).await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        api_key: Option<&str>,
        device: &Entity,
        endpoint: &str,
        command: &CommandInvocation,
    ) -> GatewayResult<()> {
        let transport = |cause: String| GatewayError::CommandTransport {
            command: command.name.clone(),
            cause,
        };

        let payload = encode_command(&device.id, &command.name, &command.value)
            .map_err(|e| transport(e.to_string()))?;
        debug!(command = %command.name, payload = %payload, "Sending command to {}", endpoint);

        let response = self
            .client
            .post(endpoint)
            .header("fiware-service", &device.service)
            .header("fiware-servicepath", &device.subservice)
            .body(payload)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| transport(e.to_string()))?;

        if status != StatusCode::OK {
            let message = decode_result(&body).map(|r| r.result).unwrap_or(body);
            return Err(GatewayError::CommandResponse {
                status: status.as_u16(),
                message,
                command: command.name.clone(),
            });
        }

        let Some(api_key) = api_key else {
            debug!(command = %command.name, "No API key, not recording the result");
            return Ok(());
        };

        let (name, result) = match decode_result(&body) {
            Ok(decoded) => (decoded.command, decoded.result),
            Err(e) => {
                debug!(command = %command.name, error = %e, "Undecodable result, keeping raw body");
                (command.name.clone(), body)
            }
        };
        info!(command = %name, "Command completed");

        let reporter = self.reporter.clone();
        let api_key = api_key.to_string();
        let device = device.clone();
        tokio::spawn(async move {
            if let Err(e) = reporter
                .report(&api_key, &device, &name, CommandStatus::Completed, &result)
                .await
            {
                error!(device_id = %device.id, command = %name, error = %e, "Failed to record command result");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::Router;
    use iota_core::EntityKind;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<(String, CommandStatus, String)>>,
    }

    #[async_trait]
    impl CommandReporter for Recorder {
        async fn report(
            &self,
            _api_key: &str,
            _device: &Entity,
            command: &str,
            status: CommandStatus,
            result: &str,
        ) -> GatewayResult<()> {
            self.reports
                .lock()
                .push((command.to_string(), status, result.to_string()));
            Ok(())
        }
    }

    type Received = Arc<Mutex<Vec<String>>>;

    /// Device answering `c2` with a 500 and everything else with success
    async fn device_endpoint(State(received): State<Received>, body: String) -> (AxumStatus, String) {
        received.lock().push(body.clone());
        let (target, _) = body.split_once('|').unwrap_or((&body, ""));
        if target.ends_with("@c2") {
            (AxumStatus::INTERNAL_SERVER_ERROR, format!("{}|boom", target))
        } else if target.ends_with("@slow") {
            tokio::time::sleep(Duration::from_secs(2)).await;
            (AxumStatus::OK, format!("{}|late", target))
        } else {
            (AxumStatus::OK, format!("{}|done", target))
        }
    }

    async fn spawn_device() -> (String, Received) {
        let received: Received = Arc::default();
        let router = Router::new()
            .route("/", post(device_endpoint))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}/", addr), received)
    }

    fn device(endpoint: Option<String>) -> Entity {
        let mut d = Entity::new("1", EntityKind::Device, "knot", "/knot/t1");
        d.endpoint = endpoint;
        d
    }

    fn executor(timeout: Duration) -> (CommandExecutor, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (CommandExecutor::new(timeout, recorder.clone()).unwrap(), recorder)
    }

    async fn wait_for_reports(recorder: &Recorder, n: usize) {
        for _ in 0..50 {
            if recorder.reports.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn success_reports_completion() {
        let (url, received) = spawn_device().await;
        let (exec, recorder) = executor(Duration::from_secs(5));

        exec.execute(
            Some("key"),
            &device(Some(url)),
            &[CommandInvocation::new("command", json!("on"))],
        )
        .await
        .unwrap();

        assert_eq!(received.lock().as_slice(), ["1@command|on"]);
        wait_for_reports(&recorder, 1).await;
        assert_eq!(
            recorder.reports.lock()[0],
            ("command".to_string(), CommandStatus::Completed, "done".to_string())
        );
    }

    #[tokio::test]
    async fn without_api_key_nothing_is_reported() {
        let (url, received) = spawn_device().await;
        let (exec, recorder) = executor(Duration::from_secs(5));

        exec.execute(None, &device(Some(url)), &[CommandInvocation::new("c1", json!(1))])
            .await
            .unwrap();

        assert_eq!(received.lock().len(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn batch_stops_at_first_failure() {
        let (url, received) = spawn_device().await;
        let (exec, _) = executor(Duration::from_secs(5));

        let err = exec
            .execute(
                Some("key"),
                &device(Some(url)),
                &[
                    CommandInvocation::new("c1", json!("a")),
                    CommandInvocation::new("c2", json!("b")),
                    CommandInvocation::new("c3", json!("c")),
                ],
            )
            .await
            .unwrap_err();

        match err {
            GatewayError::CommandResponse { status, message, command } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
                assert_eq!(command, "c2");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(received.lock().as_slice(), ["1@c1|a", "1@c2|b"]);
    }

    #[tokio::test]
    async fn poll_mode_sends_nothing() {
        let (exec, recorder) = executor(Duration::from_secs(5));
        exec.execute(Some("key"), &device(None), &[CommandInvocation::new("c1", json!(1))])
            .await
            .unwrap();
        assert!(recorder.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_transport_error() {
        let (url, _) = spawn_device().await;
        let (exec, _) = executor(Duration::from_millis(200));

        let err = exec
            .execute(None, &device(Some(url)), &[CommandInvocation::new("slow", json!(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommandTransport { ref command, .. } if command == "slow"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (exec, _) = executor(Duration::from_secs(1));
        let err = exec
            .execute(
                None,
                &device(Some(format!("http://{}/", addr))),
                &[CommandInvocation::new("c1", json!(1))],
            )
            .await
            .unwrap_err();
        assert_eq!(err.command(), Some("c1"));
    }
}
