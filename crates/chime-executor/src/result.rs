use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Serialized response summary stored in a schedule's `result` column.
///
/// Either a response snapshot (`statusCode`/`headers`/`body`) or, for
/// transport-level failures, an `error` string. Multi-valued response
/// headers are joined with `;`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl CallbackResult {
    /// Snapshot a received response, consuming its body.
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status_code = resp.status().as_u16();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in resp.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push(';');
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        // A body read error after the status line still counts as a
        // received response; record what we have.
        let body = resp.text().await.unwrap_or_default();

        Self {
            error: None,
            status_code: Some(status_code),
            headers: Some(headers),
            body: Some(body),
        }
    }

    /// Record a transport-level failure (DNS, refused, timeout, …).
    pub fn from_error(err: &reqwest::Error) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    /// 2xx means the callback succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, Some(code) if (200..300).contains(&code))
    }

    /// Transport errors and 5xx consume the retry budget; any other
    /// response (2xx, 3xx, 4xx) is final on first receipt.
    pub fn is_retryable(&self) -> bool {
        self.error.is_some() || matches!(self.status_code, Some(code) if code >= 500)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
