//! Endpoint resolution: turn an [`Endpoint`] into a URL plus headers.

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use super::{Endpoint, VoiceConfig};
use crate::error::{Result, VoiceError};

/// Header carrying the session id on routed runtime connections.
pub const RUNTIME_SESSION_HEADER: &str = "X-Amzn-Bedrock-AgentCore-Runtime-Session-Id";

/// A fully resolved WebSocket destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Produces the connection target for a session.
///
/// Routed endpoints usually need credentials (presigned URLs, tokens) that
/// live outside this crate; supply a custom resolver to provide them.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, config: &VoiceConfig) -> Result<ConnectTarget>;
}

/// Direct URLs pass through; routed runtimes map to their regional gateway
/// with a fresh session id and an optional bearer token.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

#[async_trait]
impl EndpointResolver for DefaultResolver {
    async fn resolve(&self, config: &VoiceConfig) -> Result<ConnectTarget> {
        match &config.endpoint {
            Endpoint::Direct { url } => Ok(ConnectTarget::new(url.clone())),
            Endpoint::Runtime {
                runtime_arn,
                region,
            } => {
                let url = runtime_url(runtime_arn, region)?;
                let mut target = ConnectTarget::new(url.to_string())
                    .with_header(RUNTIME_SESSION_HEADER, Uuid::new_v4().to_string());
                if let Some(token) = &config.bearer_token {
                    target = target.with_header("Authorization", format!("Bearer {token}"));
                }
                Ok(target)
            }
        }
    }
}

/// Gateway URL for a managed runtime.
pub fn runtime_url(runtime_arn: &str, region: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("wss://bedrock-agentcore.{region}.amazonaws.com"))
        .map_err(|error| VoiceError::Configuration(format!("invalid region {region:?}: {error}")))?;
    url.path_segments_mut()
        .map_err(|_| VoiceError::Configuration("runtime gateway URL cannot carry a path".into()))?
        .push("runtimes")
        .push(runtime_arn)
        .push("ws");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_endpoint_passes_through_without_headers() {
        let config = VoiceConfig::default();
        let target = DefaultResolver.resolve(&config).await.unwrap();
        assert_eq!(target.url, "ws://localhost:8080/ws");
        assert!(target.headers.is_empty());
    }

    #[tokio::test]
    async fn runtime_endpoint_escapes_the_arn_and_adds_session_id() {
        let config = VoiceConfig::builder()
            .endpoint(Endpoint::Runtime {
                runtime_arn: "arn:aws:bedrock-agentcore:us-east-1:123:runtime/voice-abc".into(),
                region: "us-east-1".into(),
            })
            .bearer_token("tok".to_string())
            .build();

        let target = DefaultResolver.resolve(&config).await.unwrap();

        assert!(target
            .url
            .starts_with("wss://bedrock-agentcore.us-east-1.amazonaws.com/runtimes/"));
        assert!(target.url.ends_with("runtime%2Fvoice-abc/ws"));
        let session_id = target.header(RUNTIME_SESSION_HEADER).unwrap();
        assert!(Uuid::parse_str(session_id).is_ok());
        assert_eq!(target.header("authorization"), Some("Bearer tok"));
    }

    #[test]
    fn invalid_region_is_a_configuration_error() {
        let error = runtime_url("arn:x", "bad region").unwrap_err();
        assert!(matches!(error, VoiceError::Configuration(_)));
    }
}
