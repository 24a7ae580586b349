//! Internet-reachability probe backing `GET /health`'s `internet` field.
//! Pluggable the same way `core`'s `IdleChecker`/`TempoProvider` are, so
//! tests can stub connectivity instead of making a real network call.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Attempts a short TCP connect to a well-known resolver; treats success as
/// "online" without sending or reading any application data.
pub struct TcpProbe {
    pub target: String,
    pub timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            target: "1.1.1.1:443".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl ConnectivityChecker for TcpProbe {
    async fn is_online(&self) -> bool {
        tokio::time::timeout(self.timeout, TcpStream::connect(&self.target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

pub struct AlwaysOnline;

#[async_trait]
impl ConnectivityChecker for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}
