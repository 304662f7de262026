use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// An external, untrusted source of "is this address malicious?" opinions.
#[async_trait]
pub trait ReputationSource: Send + Sync {
    async fn is_malicious(&self, addr: IpAddr) -> anyhow::Result<bool>;
}

/// Reputation service reached over HTTP: `GET {endpoint}/{ip}`.
pub struct HttpReputationSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReputationSource {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReputationSource for HttpReputationSource {
    async fn is_malicious(&self, addr: IpAddr) -> anyhow::Result<bool> {
        let url = format!("{}/{}", self.endpoint, addr);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            anyhow::bail!("reputation service returned {}", res.status());
        }
        let body: Value = res.json().await?;
        parse_verdict(&body)
            .ok_or_else(|| anyhow::anyhow!("unrecognised reputation response: {}", body))
    }
}

/// Interpret a "boolean-ish" reputation payload.
///
/// Accepted shapes: `true`, `0.8`, `{"malicious": true}`, `{"score": 0.8}`.
/// Numeric scores at or above 0.5 are malicious.
pub fn parse_verdict(body: &Value) -> Option<bool> {
    match body {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|score| score >= 0.5),
        Value::Object(map) => match (map.get("malicious"), map.get("score")) {
            (Some(Value::Bool(b)), _) => Some(*b),
            (_, Some(score)) => parse_verdict(score).filter(|_| score.is_number()),
            _ => None,
        },
        _ => None,
    }
}
