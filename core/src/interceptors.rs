//! The interceptor stack the MCP SSE server's `tools/call` runs every
//! external call through, in order: Logging -> Write-Own -> Privacy (§4.2).
//! Any interceptor may mutate the call or raise a [`PermissionError`], which
//! the SSE server maps to JSON-RPC error code -32003 (§4.2, §7).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::tool_executor::InternalToolCall;

/// JSON-RPC error code for an interceptor denial (§7 "Interceptor denial —
/// surfaces as JSON-RPC error -32003").
pub const PERMISSION_DENIED_CODE: i64 = -32003;

#[derive(Debug, Clone)]
pub struct PermissionError(pub String);

impl std::fmt::Display for PermissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "permission denied: {}", self.0)
    }
}
impl std::error::Error for PermissionError {}

/// Per-bank privacy configuration consulted by the Privacy interceptor.
#[derive(Debug, Clone)]
pub struct BankConfig {
    pub is_private: bool,
    pub owner: String,
}

/// Supplies bank (kb) privacy configuration; an application wires this to
/// wherever bank ownership is actually recorded (config_state row, a
/// dedicated table, ...). Out of scope for this crate's contract the same
/// way the retrieval backend is (spec.md §1).
#[async_trait]
pub trait BankConfigSource: Send + Sync {
    async fn get(&self, kb_id: &str) -> Option<BankConfig>;
}

/// One stage of the interceptor stack, run in order over a call already
/// parsed into [`InternalToolCall`]. `client_name` is the authenticated MCP
/// session's client identity.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        call: &mut InternalToolCall,
        client_name: &str,
    ) -> Result<(), PermissionError>;
}

/// Logs `(client, tool, arg-preview)` at info level (§4.2 "Logging").
/// Never denies.
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        call: &mut InternalToolCall,
        client_name: &str,
    ) -> Result<(), PermissionError> {
        tracing::info!(
            client = client_name,
            tool = call.name(),
            kb_id = call.kb_id().unwrap_or("-"),
            "tool call"
        );
        Ok(())
    }
}

/// Forces `kb_id` to the calling client's name on every write tool, so a
/// client can never write into another tenant's partition no matter what
/// argument it supplies (§4.2 "Write-Own", §8 P8).
pub struct WriteOwnInterceptor;

#[async_trait]
impl Interceptor for WriteOwnInterceptor {
    async fn intercept(
        &self,
        call: &mut InternalToolCall,
        client_name: &str,
    ) -> Result<(), PermissionError> {
        if call.is_write() {
            call.set_kb_id(client_name.to_string());
        }
        Ok(())
    }
}

/// Denies reads of a private bank by anyone but its owner (§4.2 "Privacy",
/// §8 P7). Caches decisions for 60s per `(client, kb_id)` pair.
pub struct PrivacyInterceptor {
    banks: Arc<dyn BankConfigSource>,
    cache: RwLock<HashMap<(String, String), (bool, Instant)>>,
    cache_ttl: Duration,
}

impl PrivacyInterceptor {
    pub fn new(banks: Arc<dyn BankConfigSource>) -> Self {
        Self {
            banks,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(60),
        }
    }

    fn is_read(call: &InternalToolCall) -> bool {
        matches!(
            call,
            InternalToolCall::QueryFacts { .. }
                | InternalToolCall::SemanticSearch { .. }
                | InternalToolCall::ReadResource { .. }
        )
    }

    async fn cached_decision(&self, client: &str, kb_id: &str) -> Option<bool> {
        let cache = self.cache.read().await;
        cache
            .get(&(client.to_string(), kb_id.to_string()))
            .and_then(|(allowed, at)| {
                if at.elapsed() < self.cache_ttl {
                    Some(*allowed)
                } else {
                    None
                }
            })
    }

    async fn store_decision(&self, client: &str, kb_id: &str, allowed: bool) {
        self.cache
            .write()
            .await
            .insert((client.to_string(), kb_id.to_string()), (allowed, Instant::now()));
    }
}

#[async_trait]
impl Interceptor for PrivacyInterceptor {
    async fn intercept(
        &self,
        call: &mut InternalToolCall,
        client_name: &str,
    ) -> Result<(), PermissionError> {
        if !Self::is_read(call) {
            return Ok(());
        }
        let Some(kb_id) = call.kb_id().map(|s| s.to_string()) else {
            return Ok(());
        };

        if let Some(allowed) = self.cached_decision(client_name, &kb_id).await {
            return if allowed {
                Ok(())
            } else {
                Err(PermissionError(format!("kb {kb_id} is private")))
            };
        }

        let allowed = match self.banks.get(&kb_id).await {
            Some(cfg) if cfg.is_private && cfg.owner != client_name => false,
            _ => true,
        };
        self.store_decision(client_name, &kb_id, allowed).await;

        if allowed {
            Ok(())
        } else {
            Err(PermissionError(format!("kb {kb_id} is private")))
        }
    }
}

/// Runs a call through the fixed Logging -> Write-Own -> Privacy order
/// (§4.2). Constructed once at startup and shared by the SSE server.
pub struct InterceptorStack {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorStack {
    pub fn standard(banks: Arc<dyn BankConfigSource>) -> Self {
        Self {
            stages: vec![
                Arc::new(LoggingInterceptor),
                Arc::new(WriteOwnInterceptor),
                Arc::new(PrivacyInterceptor::new(banks)),
            ],
        }
    }

    pub async fn run(
        &self,
        mut call: InternalToolCall,
        client_name: &str,
    ) -> Result<InternalToolCall, PermissionError> {
        for stage in &self.stages {
            stage.intercept(&mut call, client_name).await?;
        }
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBanks(Vec<(String, BankConfig)>);

    #[async_trait]
    impl BankConfigSource for FixedBanks {
        async fn get(&self, kb_id: &str) -> Option<BankConfig> {
            self.0
                .iter()
                .find(|(id, _)| id == kb_id)
                .map(|(_, cfg)| cfg.clone())
        }
    }

    #[tokio::test]
    async fn write_own_forces_kb_id_regardless_of_argument() {
        let stack = InterceptorStack::standard(Arc::new(FixedBanks(vec![])));
        let call = InternalToolCall::StoreFact {
            entity: "e".into(),
            relation: "r".into(),
            target: "t".into(),
            context: "c".into(),
            confidence: 0.5,
            kb_id: "someone_elses_kb".into(),
        };
        let result = stack.run(call, "alice").await.unwrap();
        assert_eq!(result.kb_id(), Some("alice"));
    }

    #[tokio::test]
    async fn privacy_denies_non_owner_read_of_private_bank() {
        let banks = Arc::new(FixedBanks(vec![(
            "k_alice".into(),
            BankConfig {
                is_private: true,
                owner: "alice".into(),
            },
        )]));
        let stack = InterceptorStack::standard(banks);
        let call = InternalToolCall::QueryFacts {
            kb_id: "k_alice".into(),
            entity: None,
        };
        let err = stack.run(call, "bob").await.unwrap_err();
        assert!(err.0.contains("private"));
    }

    #[tokio::test]
    async fn privacy_allows_owner_read_of_private_bank() {
        let banks = Arc::new(FixedBanks(vec![(
            "k_alice".into(),
            BankConfig {
                is_private: true,
                owner: "alice".into(),
            },
        )]));
        let stack = InterceptorStack::standard(banks);
        let call = InternalToolCall::QueryFacts {
            kb_id: "k_alice".into(),
            entity: None,
        };
        assert!(stack.run(call, "alice").await.is_ok());
    }
}
