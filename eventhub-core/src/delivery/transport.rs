//! Webhook 传输层
//!
//! 投递通道只通过 `WebhookTransport` 发出请求；超时、重试与熔断由上层负责，
//! 传输实现只需如实返回状态码或传输错误。
//!
use super::DeliveryError;
use async_trait::async_trait;
use std::sync::Arc;

/// 一次 POST 请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, DeliveryError>;
}

#[async_trait]
impl<T> WebhookTransport for Arc<T>
where
    T: WebhookTransport + ?Sized,
{
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, DeliveryError> {
        (**self).send(request).await
    }
}

#[cfg(feature = "http")]
pub use http::HttpWebhookTransport;

#[cfg(feature = "http")]
mod http {
    use super::{WebhookRequest, WebhookResponse, WebhookTransport};
    use crate::delivery::DeliveryError;
    use async_trait::async_trait;

    /// 响应体最多保留的字节数，仅用于日志
    const MAX_RESPONSE_BODY: usize = 512;

    /// 基于 reqwest 的 HTTP 传输
    #[derive(Debug, Clone, Default)]
    pub struct HttpWebhookTransport {
        client: reqwest::Client,
    }

    impl HttpWebhookTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl WebhookTransport for HttpWebhookTransport {
        async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, DeliveryError> {
            let mut builder = self
                .client
                .post(&request.url)
                .body(request.body.clone());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder.send().await.map_err(|e| DeliveryError::Transport {
                reason: e.to_string(),
            })?;
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_RESPONSE_BODY {
                let cut = (0..=MAX_RESPONSE_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }

            Ok(WebhookResponse { status, body })
        }
    }
}
