//! Response shapes the client accepts from the backend.
//!
//! The trace model lives in [`crate::trace`] because it needs reconciliation
//! rather than plain deserialization. Everything here maps with `serde`,
//! with aliases where the backend has used more than one field name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ClientError, ClientResult};

/// An external service that can be linked as a retrieval source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Slack,
    Drive,
    Github,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Slack, Provider::Drive, Provider::Github];

    /// Path segment used in `/connections/{provider}/...`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Slack => "slack",
            Provider::Drive => "drive",
            Provider::Github => "github",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Slack => "Slack",
            Provider::Drive => "Google Drive",
            Provider::Github => "GitHub",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slack" => Ok(Provider::Slack),
            "drive" | "gdrive" | "google-drive" => Ok(Provider::Drive),
            "github" | "gh" => Ok(Provider::Github),
            _ => Err(ClientError::UnknownProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub label: String,
    pub url: String,
}

/// A fused answer as returned by `POST /ask`.
///
/// Citations are kept in backend order and may repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    #[serde(rename = "answer", alias = "text")]
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub freshness: DateTime<Utc>,
    pub confidence: f64,
    #[serde(rename = "trace_id", alias = "traceId")]
    pub trace_id: String,
    #[serde(rename = "policy_banner", alias = "policyBanner", default)]
    pub policy_banner: Option<String>,
}

impl Answer {
    pub fn from_value(url: &str, value: Value) -> ClientResult<Answer> {
        let answer: Answer = serde_json::from_value(value).map_err(|e| ClientError::Decode {
            url: url.to_string(),
            message: format!("answer: {}", e),
        })?;

        if !answer.confidence.is_finite() || !(0.0..=1.0).contains(&answer.confidence) {
            return Err(ClientError::Decode {
                url: url.to_string(),
                message: format!("confidence {} outside [0, 1]", answer.confidence),
            });
        }

        Ok(answer)
    }

    /// Confidence as a whole percentage, e.g. `0.82` → `82`.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }

    /// Client-relative link to the trace view for this answer.
    pub fn trace_link(&self) -> String {
        format!("/trace/{}", self.trace_id)
    }
}

/// Connection state of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderConnection {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Status of every supported provider, always holding all three.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub providers: BTreeMap<Provider, ProviderConnection>,
}

/// The two observed `/connections` payloads.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConnectionsPayload {
    Map(BTreeMap<String, bool>),
    List(Vec<ConnectionRecord>),
}

#[derive(Debug, Deserialize)]
struct ConnectionRecord {
    #[serde(alias = "provider")]
    service: String,
    connected: bool,
    #[serde(default)]
    workspace: Option<String>,
}

impl ConnectionStatus {
    pub fn all_disconnected() -> Self {
        Self {
            providers: Provider::ALL
                .iter()
                .map(|p| (*p, ProviderConnection::default()))
                .collect(),
        }
    }

    pub fn from_value(url: &str, value: Value) -> ClientResult<ConnectionStatus> {
        let payload: ConnectionsPayload =
            serde_json::from_value(value).map_err(|e| ClientError::Decode {
                url: url.to_string(),
                message: format!("connections: {}", e),
            })?;

        let mut status = Self::all_disconnected();
        let entries: Vec<(String, ProviderConnection)> = match payload {
            ConnectionsPayload::Map(map) => map
                .into_iter()
                .map(|(name, connected)| {
                    (
                        name,
                        ProviderConnection {
                            connected,
                            workspace: None,
                        },
                    )
                })
                .collect(),
            ConnectionsPayload::List(records) => records
                .into_iter()
                .map(|r| {
                    (
                        r.service,
                        ProviderConnection {
                            connected: r.connected,
                            workspace: r.workspace,
                        },
                    )
                })
                .collect(),
        };

        for (name, connection) in entries {
            match name.parse::<Provider>() {
                Ok(provider) => {
                    status.providers.insert(provider, connection);
                }
                Err(_) => tracing::debug!(provider = %name, "ignoring unsupported provider"),
            }
        }

        Ok(status)
    }

    pub fn get(&self, provider: Provider) -> &ProviderConnection {
        // Every provider is inserted at construction.
        &self.providers[&provider]
    }

    pub fn is_connected(&self, provider: Provider) -> bool {
        self.get(provider).connected
    }
}

/// `POST /connections/{provider}/authorize` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub authorize_url: String,
    #[serde(default)]
    pub state: Option<String>,
}

impl AuthorizeResponse {
    pub fn from_value(url: &str, value: Value) -> ClientResult<AuthorizeResponse> {
        let resp: AuthorizeResponse =
            serde_json::from_value(value).map_err(|e| ClientError::Decode {
                url: url.to_string(),
                message: format!("authorize: {}", e),
            })?;
        if resp.authorize_url.trim().is_empty() {
            return Err(ClientError::Decode {
                url: url.to_string(),
                message: "authorize_url is empty".to_string(),
            });
        }
        Ok(resp)
    }
}

/// `GET /healthz` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_snake_case() {
        let answer = Answer::from_value(
            "u",
            json!({
                "answer": "Use the runbook.",
                "citations": [{"label": "Runbook", "url": "https://x/runbook"}],
                "freshness": "2024-01-01T00:00:00Z",
                "confidence": 0.82,
                "trace_id": "t1",
                "policy_banner": null
            }),
        )
        .unwrap();
        assert_eq!(answer.text, "Use the runbook.");
        assert_eq!(answer.confidence_percent(), 82);
        assert_eq!(answer.trace_link(), "/trace/t1");
        assert!(answer.policy_banner.is_none());
        assert_eq!(answer.citations.len(), 1);
    }

    #[test]
    fn test_answer_camel_case_and_duplicate_citations() {
        let answer = Answer::from_value(
            "u",
            json!({
                "text": "x",
                "citations": [
                    {"label": "A", "url": "https://a"},
                    {"label": "A", "url": "https://a"}
                ],
                "freshness": "2024-05-01T12:00:00+02:00",
                "confidence": 1.0,
                "traceId": "abc",
                "policyBanner": "Sources conflict"
            }),
        )
        .unwrap();
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.trace_id, "abc");
        assert_eq!(answer.policy_banner.as_deref(), Some("Sources conflict"));
    }

    #[test]
    fn test_answer_confidence_out_of_range() {
        let err = Answer::from_value(
            "u",
            json!({
                "answer": "x",
                "freshness": "2024-01-01T00:00:00Z",
                "confidence": 1.5,
                "trace_id": "t"
            }),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }

    #[test]
    fn test_connections_map_shape() {
        let status =
            ConnectionStatus::from_value("u", json!({"slack": false, "drive": true, "github": false}))
                .unwrap();
        assert!(!status.is_connected(Provider::Slack));
        assert!(status.is_connected(Provider::Drive));
        assert!(!status.is_connected(Provider::Github));
    }

    #[test]
    fn test_connections_list_shape_with_workspace() {
        let status = ConnectionStatus::from_value(
            "u",
            json!([
                {"service": "slack", "connected": true, "workspace": "acme"},
                {"service": "jira", "connected": true}
            ]),
        )
        .unwrap();
        assert!(status.is_connected(Provider::Slack));
        assert_eq!(status.get(Provider::Slack).workspace.as_deref(), Some("acme"));
        // Missing providers are reported disconnected.
        assert!(!status.is_connected(Provider::Drive));
        assert_eq!(status.providers.len(), 3);
    }

    #[test]
    fn test_connections_rejects_other_shapes() {
        assert!(ConnectionStatus::from_value("u", json!("nope")).is_err());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("GitHub".parse::<Provider>().unwrap(), Provider::Github);
        assert_eq!("drive".parse::<Provider>().unwrap(), Provider::Drive);
        assert!("dropbox".parse::<Provider>().is_err());
    }

    #[test]
    fn test_authorize_requires_url() {
        let ok = AuthorizeResponse::from_value(
            "u",
            json!({"authorize_url": "https://slack.com/oauth/v2/authorize?x=1", "state": "s"}),
        )
        .unwrap();
        assert_eq!(ok.state.as_deref(), Some("s"));
        assert!(AuthorizeResponse::from_value("u", json!({"authorize_url": ""})).is_err());
        assert!(AuthorizeResponse::from_value("u", json!({})).is_err());
    }
}
