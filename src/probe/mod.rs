//! Probe engine for single-shot reachability checks.
//!
//! A target with a port gets a TCP connect probe; one without gets an
//! ICMP-style echo probe. Probes never fail the overall status request:
//! every outcome is folded into a [`ProbeResult`].

mod ping;
mod tcp;

pub use ping::run_echo_probe;
pub use tcp::run_tcp_probe;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::store::Target;

/// Probe error types. Internal to the engine: by the time a probe settles,
/// errors have been captured into the result's `reason` field.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Outcome of one reachability check. Ephemeral: computed, returned,
/// discarded — never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub is_up: bool,
    pub response_ms: u64,
    pub reason: Option<String>,
}

impl ProbeResult {
    fn up(elapsed: Duration) -> Self {
        Self {
            is_up: true,
            response_ms: elapsed.as_millis() as u64,
            reason: None,
        }
    }

    fn down(elapsed: Duration, reason: impl Into<String>) -> Self {
        Self {
            is_up: false,
            response_ms: elapsed.as_millis() as u64,
            reason: Some(reason.into()),
        }
    }
}

/// Run exactly one probe for the given endpoint.
pub async fn probe_one(host: &str, port: Option<u16>) -> ProbeResult {
    match port {
        Some(port) => tcp::run_tcp_probe(host, port).await,
        None => ping::run_echo_probe(host).await,
    }
}

/// Probe all targets concurrently and return results in input order.
///
/// Each probe runs as its own task with its own timeout clock, so the total
/// time is bounded by the slowest single probe. One target failing never
/// affects its siblings.
pub async fn probe_all(targets: Vec<Target>) -> Vec<(Target, ProbeResult)> {
    let handles: Vec<_> = targets
        .iter()
        .map(|t| {
            let host = t.host.clone();
            let port = t.port;
            tokio::spawn(async move { probe_one(&host, port).await })
        })
        .collect();

    let mut results = Vec::with_capacity(targets.len());
    for (target, handle) in targets.into_iter().zip(handles) {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Probe task for {} failed: {}", target.host, e);
                ProbeResult::down(Duration::ZERO, "probe_failed")
            }
        };
        results.push((target, result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::net::TcpListener;

    fn target(name: &str, host: &str, port: Option<u16>) -> Target {
        Target {
            id: name.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            port,
            pinned: false,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_probe_one_tcp_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe_one("127.0.0.1", Some(port)).await;
        assert!(result.is_up);
        assert!(result.reason.is_none());
        assert!(result.response_ms < 3000);
    }

    #[tokio::test]
    async fn test_probe_one_tcp_refused() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = probe_one("127.0.0.1", Some(port)).await;
        assert!(!result.is_up);
        assert_eq!(result.reason.as_deref(), Some("ECONNREFUSED"));
        assert!(result.response_ms < 3000);
    }

    #[tokio::test]
    async fn test_probe_all_preserves_order_and_length() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let targets = vec![
            target("a", "127.0.0.1", Some(closed_port)),
            target("b", "127.0.0.1", Some(open_port)),
            target("c", "127.0.0.1", Some(closed_port)),
            target("d", "127.0.0.1", Some(open_port)),
        ];

        let results = probe_all(targets).await;
        assert_eq!(results.len(), 4);
        let ids: Vec<_> = results.iter().map(|(t, _)| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(!results[0].1.is_up);
        assert!(results[1].1.is_up);
        assert!(!results[2].1.is_up);
        assert!(results[3].1.is_up);
    }
}
