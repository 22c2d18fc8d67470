//! Origin API client
//!
//! The origin API answers every call with a JSON body whose `status` field
//! is the success/failure discriminator. Transport and decode problems are
//! errors; a well-formed non-success answer is an [`ApiStatus::Failure`].

use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome reported by the origin API
#[derive(Debug, Clone, PartialEq)]
pub enum ApiStatus {
    Success,
    /// Any other answer, with the body kept for logging
    Failure(Value),
}

impl ApiStatus {
    pub fn from_body(body: Value) -> Self {
        if body.get("status").and_then(Value::as_str) == Some("success") {
            Self::Success
        } else {
            Self::Failure(body)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Calls the handlers make against the origin API
#[async_trait]
pub trait OriginApi: Send + Sync {
    /// Drop every cached entry for the linked account `user_id`
    async fn expire_user(&self, user_id: u64) -> Result<ApiStatus, DispatchError>;
}

#[derive(Serialize)]
struct ExpireUser {
    user_id: String,
}

/// `reqwest` client bound to the origin API base URL
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<ApiStatus, DispatchError> {
        let url = self.url(path);
        let api_error = |e: reqwest::Error| DispatchError::Api {
            endpoint: path.to_string(),
            source: Box::new(e),
        };

        let response = self.http.post(&url).json(body).send().await.map_err(api_error)?;
        let http_status = response.status();
        let body: Value = response.json().await.map_err(api_error)?;

        debug!(%url, %http_status, "Origin API answered");
        Ok(ApiStatus::from_body(body))
    }
}

#[async_trait]
impl OriginApi for ApiClient {
    async fn expire_user(&self, user_id: u64) -> Result<ApiStatus, DispatchError> {
        self.post(
            "/expire-user",
            &ExpireUser {
                user_id: user_id.to_string(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[test]
    fn status_field_is_the_discriminator() {
        assert_eq!(ApiStatus::from_body(json!({"status": "success"})), ApiStatus::Success);
        assert!(!ApiStatus::from_body(json!({"status": "error", "message": "x"})).is_success());
        assert!(!ApiStatus::from_body(json!({"ok": true})).is_success());
        assert!(!ApiStatus::from_body(Value::Null).is_success());
    }

    #[test]
    fn base_url_and_path_are_joined_with_one_slash() {
        let client = ApiClient::new("http://api.local/").unwrap();
        assert_eq!(client.url("/expire-user"), "http://api.local/expire-user");
    }

    #[tokio::test]
    async fn expire_user_posts_the_user_id_as_a_string() {
        let app = Router::new().route(
            "/expire-user",
            post(|Json(body): Json<Value>| async move {
                let status = if body == json!({"user_id": "42"}) {
                    "success"
                } else {
                    "error"
                };
                Json(json!({ "status": status }))
            }),
        );
        let client = ApiClient::new(serve(app).await).unwrap();

        assert_eq!(client.expire_user(42).await.unwrap(), ApiStatus::Success);
        assert!(!client.expire_user(7).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn undecodable_answers_are_errors() {
        let app = Router::new().route("/expire-user", post(|| async { "not json" }));
        let client = ApiClient::new(serve(app).await).unwrap();

        let err = client.expire_user(42).await.unwrap_err();
        assert_eq!(err.error_type_label(), "origin_api");
    }
}
