//! Runtime configuration: HTTP transport policy (including SSRF posture)
//! and per-run quota limits. Each section follows the same
//! `Default` + `validate()` shape.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Top-level configuration for an engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub http: HttpConfig,
    pub quota: QuotaConfig,
}

impl RuntimeConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.http.validate()?;
        self.quota.validate()?;
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { http: HttpConfig::default(), quota: QuotaConfig::default() }
    }
}

/// Transport and SSRF policy for the HTTP operator.
///
/// `allow_http` defaults to `false`: it is the unconditional gate for the
/// `Http` operator, checked before any scheme/host/SSRF check and before
/// a workflow may reach outside the process at all, not merely a filter
/// on the plaintext `http://` scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_redirects: u32,
    pub max_response_bytes: u64,
    pub allow_http: bool,
    pub block_private_ips: bool,
    pub block_loopback: bool,
    pub block_link_local: bool,
    pub block_cloud_metadata: bool,
    pub allowed_domains: Vec<String>,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_ms: u64,
    pub tcp_keepalive_ms: u64,
    /// Not enforced: reqwest has no per-host connection cap knob.
    pub max_conns_per_host: Option<u32>,
    /// Not enforced: reqwest has no separate response-header timeout.
    pub response_header_timeout_ms: Option<u64>,
    /// Not enforced: reqwest has no Expect: 100-continue timeout knob.
    pub expect_continue_timeout_ms: Option<u64>,
}

impl HttpConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.request_timeout_ms == 0 {
            return Err(EngineError::invalid_input("request_timeout_ms must be > 0"));
        }
        if self.max_response_bytes == 0 {
            return Err(EngineError::invalid_input("max_response_bytes must be > 0"));
        }
        Ok(())
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_redirects: 5,
            max_response_bytes: 10 * 1024 * 1024,
            allow_http: false,
            block_private_ips: true,
            block_loopback: true,
            block_link_local: true,
            block_cloud_metadata: true,
            allowed_domains: Vec::new(),
            pool_max_idle_per_host: 10,
            pool_idle_timeout_ms: 90_000,
            tcp_keepalive_ms: 60_000,
            max_conns_per_host: None,
            response_header_timeout_ms: None,
            expect_continue_timeout_ms: None,
        }
    }
}

/// Per-run resource quotas enforced by the execution context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub max_node_executions: u64,
    pub max_http_calls: u64,
}

impl QuotaConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_node_executions == 0 {
            return Err(EngineError::invalid_input("max_node_executions must be > 0"));
        }
        if self.max_http_calls == 0 {
            return Err(EngineError::invalid_input("max_http_calls must be > 0"));
        }
        Ok(())
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { max_node_executions: 100_000, max_http_calls: 10_000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg = HttpConfig::default();
        cfg.request_timeout_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn allow_http_defaults_false() {
        assert!(!HttpConfig::default().allow_http);
    }
}
