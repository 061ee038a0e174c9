//! HTTP control channel
//!
//! Two remote operations are consumed:
//! - `GET  <server>/register` -> `{"device_id": "..."}`
//! - `POST <server>/hardware` with `{"device_id": "..."}` ->
//!   `{"device_id": "...", "mode": "...", "speed": "..."}`
//!
//! `ControlApi` returns raw bodies so callers can tell an empty reply
//! from a malformed one.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use edgepulse_core::{EdgeError, EdgeResult};

/// Remote registration and control operations
pub trait ControlApi: Send + Sync + 'static {
    /// Ask the server to assign a device identity
    fn register(&self) -> impl Future<Output = EdgeResult<String>> + Send;

    /// Fetch the desired control record for `device_id`
    fn poll_control(&self, device_id: &str) -> impl Future<Output = EdgeResult<String>> + Send;
}

/// Registration reply body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReply {
    pub device_id: String,
}

/// Control request body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub device_id: String,
}

/// Control reply body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub device_id: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub speed: String,
}

/// Parse a registration body. Empty bodies are `EmptyResponse`.
pub fn parse_registration(body: &str) -> EdgeResult<RegistrationReply> {
    if body.trim().is_empty() {
        return Err(EdgeError::EmptyResponse("register"));
    }
    serde_json::from_str(body).map_err(|e| EdgeError::MalformedResponse(e.to_string()))
}

/// Parse a control body. Empty bodies are `EmptyResponse`.
pub fn parse_control(body: &str) -> EdgeResult<ControlReply> {
    if body.trim().is_empty() {
        return Err(EdgeError::EmptyResponse("hardware"));
    }
    serde_json::from_str(body).map_err(|e| EdgeError::MalformedResponse(e.to_string()))
}

/// `ControlApi` over HTTP
#[derive(Clone, Debug)]
pub struct HttpControlApi {
    client: reqwest::Client,
    register_url: reqwest::Url,
    control_url: reqwest::Url,
}

impl HttpControlApi {
    /// Build a client for the server at `base`
    pub fn new(base: &str, request_timeout: Duration) -> EdgeResult<Self> {
        let base = base
            .trim()
            .trim_end_matches(|c: char| c.is_control() || c == '/');
        let invalid = |reason: String| EdgeError::InvalidConfig {
            key: "SERVER_URI",
            reason,
        };

        let parsed = reqwest::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
        }

        let register_url = reqwest::Url::parse(&format!("{}/register", base))
            .map_err(|e| invalid(e.to_string()))?;
        let control_url = reqwest::Url::parse(&format!("{}/hardware", base))
            .map_err(|e| invalid(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EdgeError::Http(e.to_string()))?;

        Ok(HttpControlApi {
            client,
            register_url,
            control_url,
        })
    }

    pub fn register_url(&self) -> &str {
        self.register_url.as_str()
    }

    pub fn control_url(&self) -> &str {
        self.control_url.as_str()
    }

    async fn read_body(response: reqwest::Response) -> EdgeResult<String> {
        let status = response.status();
        if !status.is_success() {
            return Err(EdgeError::Http(format!("server returned {}", status)));
        }
        response
            .text()
            .await
            .map_err(|e| EdgeError::Http(e.to_string()))
    }
}

impl ControlApi for HttpControlApi {
    fn register(&self) -> impl Future<Output = EdgeResult<String>> + Send {
        async move {
            let response = self
                .client
                .get(self.register_url.clone())
                .send()
                .await
                .map_err(|e| EdgeError::Http(e.to_string()))?;
            Self::read_body(response).await
        }
    }

    fn poll_control(&self, device_id: &str) -> impl Future<Output = EdgeResult<String>> + Send {
        let request = ControlRequest {
            device_id: device_id.to_string(),
        };
        async move {
            let response = self
                .client
                .post(self.control_url.clone())
                .json(&request)
                .send()
                .await
                .map_err(|e| EdgeError::Http(e.to_string()))?;
            Self::read_body(response).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_built_from_base() {
        let api = HttpControlApi::new("http://10.0.0.5:8080/api/\r\n", Duration::from_secs(1)).unwrap();
        assert_eq!(api.register_url(), "http://10.0.0.5:8080/api/register");
        assert_eq!(api.control_url(), "http://10.0.0.5:8080/api/hardware");
    }

    #[test]
    fn test_bad_base_is_config_error() {
        let err = HttpControlApi::new("10.0.0.5:8080", Duration::from_secs(1)).unwrap_err();
        assert!(err.is_fatal());
        assert!(HttpControlApi::new("ftp://host", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_parse_registration() {
        assert!(matches!(parse_registration("  "), Err(EdgeError::EmptyResponse(_))));
        assert!(matches!(
            parse_registration("{device_id:"),
            Err(EdgeError::MalformedResponse(_))
        ));
        let reply = parse_registration(r#"{"device_id":"ef-007"}"#).unwrap();
        assert_eq!(reply.device_id, "ef-007");
    }

    #[test]
    fn test_parse_control_tolerates_missing_tokens() {
        let reply = parse_control(r#"{"device_id":"EF-007","mode":"prediction"}"#).unwrap();
        assert_eq!(reply.mode, "prediction");
        assert_eq!(reply.speed, "");
    }

    #[test]
    fn test_control_request_body() {
        let body = serde_json::to_string(&ControlRequest {
            device_id: "EF-007".to_string(),
        })
        .unwrap();
        assert_eq!(body, r#"{"device_id":"EF-007"}"#);
    }
}
