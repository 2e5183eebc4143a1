//! Loopback HTTP control service backend.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{BranchBackend, VcsOp};
use crate::error::{ConductorError, Result};

/// Whether `url` parses and names a loopback host.
#[must_use]
pub fn is_loopback_url(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}

/// Talks to a control service at `POST /branches`, `/checkout`, `/commit`.
#[derive(Debug, Clone)]
pub struct ServiceBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ServiceBackend {
    /// # Errors
    ///
    /// Returns [`ConductorError::InvalidConfig`] for a non-loopback URL.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        if !is_loopback_url(base_url) {
            return Err(ConductorError::invalid(
                "isolation.service_url",
                format!("{base_url} is not a loopback address"),
            ));
        }
        // HTTP(S)_PROXY must never see traffic meant for the local service.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .no_proxy()
            .build()
            .map_err(|e| ConductorError::invalid("isolation.service_url", e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BranchBackend for ServiceBackend {
    fn name(&self) -> &'static str {
        "control service"
    }

    async fn apply(&self, op: &VcsOp) -> Result<()> {
        let (path, body) = match op {
            VcsOp::CreateBranch(name) => ("branches", json!({ "name": name })),
            VcsOp::SwitchBranch(branch) => ("checkout", json!({ "branch": branch })),
            VcsOp::Commit(message) => ("commit", json!({ "message": message })),
        };

        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ConductorError::isolation(op.name(), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ConductorError::isolation(
                op.name(),
                format!("service returned {status}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_url("http://127.0.0.1:8080"));
        assert!(is_loopback_url("http://localhost:9000/"));
        assert!(is_loopback_url("http://[::1]:8080"));
        assert!(is_loopback_url("http://127.10.0.3"));
        assert!(!is_loopback_url("http://10.0.0.5:8080"));
        assert!(!is_loopback_url("https://example.com"));
        assert!(!is_loopback_url("not a url"));
    }

    #[test]
    fn test_new_rejects_remote() {
        let err = ServiceBackend::new("http://192.168.1.10:8080", 5).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_posts_directly_to_loopback_service() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let backend = ServiceBackend::new(&format!("http://{addr}"), 5).unwrap();
        backend
            .apply(&VcsOp::CreateBranch("task-x".into()))
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /branches "));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_isolation_error() {
        // Port 9 (discard) is closed on test hosts; connection is refused.
        let backend = ServiceBackend::new("http://127.0.0.1:9", 1).unwrap();
        let err = backend
            .apply(&VcsOp::CreateBranch("task-x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Isolation { .. }));
    }
}
