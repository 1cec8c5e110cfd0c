//! OneBot v11 HTTP API client.
//!
//! Every action is `POST {base}/{action}` with the params as the JSON body
//! and the same response envelope as the WebSocket link. Besides the
//! generic `call`, the client exposes one typed method per action the bot
//! uses, so the resolver can treat them as dedicated entry points.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use super::{ApiResponse, OneBotError};

#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
    access_token: Option<String>,
}

impl HttpApi {
    /// `timeout` bounds each request, connect included.
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, OneBotError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| OneBotError::Config(format!("invalid http_url {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| OneBotError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            access_token: access_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// URL an action is posted to
    pub fn endpoint(&self, action: &str) -> Result<Url, OneBotError> {
        self.base
            .join(action)
            .map_err(|e| OneBotError::Config(format!("invalid action path {action}: {e}")))
    }

    /// Generic dispatch: any action name, any params.
    pub async fn call(&self, action: &str, params: Value) -> Result<ApiResponse, OneBotError> {
        let mut request = self.client.post(self.endpoint(action)?).json(&params);
        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| OneBotError::Transient(format!("POST {action}: {e}")))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(OneBotError::Auth(format!("POST {action} returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OneBotError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ApiResponse>()
            .await
            .map_err(|e| OneBotError::Malformed(format!("{action}: {e}")))
    }

    pub async fn send_like(&self, user_id: i64, times: u32) -> Result<ApiResponse, OneBotError> {
        self.call("send_like", json!({ "user_id": user_id, "times": times }))
            .await
    }

    pub async fn get_stranger_info(&self, user_id: i64) -> Result<ApiResponse, OneBotError> {
        self.call("get_stranger_info", json!({ "user_id": user_id }))
            .await
    }

    pub async fn get_profile_like(&self) -> Result<ApiResponse, OneBotError> {
        self.call("get_profile_like", json!({})).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn ok_body(data: Value) -> String {
        json!({ "status": "ok", "retcode": 0, "data": data }).to_string()
    }

    #[test]
    fn test_endpoint_joins_action() {
        let api = HttpApi::new("http://127.0.0.1:3000", None, TIMEOUT).unwrap();
        assert_eq!(
            api.endpoint("send_like").unwrap().as_str(),
            "http://127.0.0.1:3000/send_like"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = HttpApi::new("http://host:3000/onebot", None, TIMEOUT).unwrap();
        assert_eq!(
            api.endpoint("get_profile_like").unwrap().as_str(),
            "http://host:3000/onebot/get_profile_like"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpApi::new("not a url", None, TIMEOUT).err().unwrap();
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_empty_token_ignored() {
        let api = HttpApi::new("http://h", Some(String::new()), TIMEOUT).unwrap();
        assert!(api.access_token.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments
        let api = HttpApi::new("http://127.0.0.1:9", None, TIMEOUT).unwrap();
        let err = api.send_like(1, 10).await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_send_like_posts_params_with_token() {
        let (base, mut seen) = stub::serve(vec![(200, ok_body(Value::Null))]).await;
        let api = HttpApi::new(&base, Some("tok".to_string()), TIMEOUT).unwrap();

        let response = api.send_like(7, 10).await.unwrap();
        assert!(response.is_ok());

        let request = seen.recv().await.unwrap();
        assert!(request.starts_with("POST /send_like "), "{request}");
        assert!(request.to_lowercase().contains("authorization: bearer tok"));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let params: Value = serde_json::from_str(body).unwrap();
        assert_eq!(params, json!({ "user_id": 7, "times": 10 }));
    }

    #[tokio::test]
    async fn test_failed_envelope_passes_through() {
        let body = json!({ "status": "failed", "retcode": 1200, "message": "今日已达上限" });
        let (base, _seen) = stub::serve(vec![(200, body.to_string())]).await;
        let api = HttpApi::new(&base, None, TIMEOUT).unwrap();

        let response = api.get_profile_like().await.unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.retcode, 1200);
    }

    #[tokio::test]
    async fn test_status_codes_mapped() {
        let (base, _seen) = stub::serve(vec![
            (401, "{}".to_string()),
            (502, "bad gateway".to_string()),
        ])
        .await;
        let api = HttpApi::new(&base, None, TIMEOUT).unwrap();

        let err = api.get_stranger_info(1).await.unwrap_err();
        assert!(matches!(err, OneBotError::Auth(_)));
        let err = api.get_stranger_info(1).await.unwrap_err();
        assert!(matches!(err, OneBotError::Http { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_hung_host_times_out() {
        let base = stub::silent().await;
        let api = HttpApi::new(&base, None, Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let err = api.send_like(1, 10).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
