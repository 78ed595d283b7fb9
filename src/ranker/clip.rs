use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{ServiceError, check_response};
use crate::utils::data_uri;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:51000";

/// 通过 HTTP 访问 CLIP 模型的客户端（clip-as-service 的 `/post` 协议）
#[derive(Debug, Clone)]
pub struct ClipClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    data: [EmbedInput<'a>; 1],
    #[serde(rename = "execEndpoint")]
    exec_endpoint: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum EmbedInput<'a> {
    Text(&'a str),
    Uri(String),
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbedDoc>,
}

#[derive(Deserialize)]
struct EmbedDoc {
    embedding: Option<Vec<f32>>,
}

impl ClipClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_owned() })
    }

    async fn embed(&self, input: EmbedInput<'_>) -> Result<Vec<f32>, ServiceError> {
        let request = EmbedRequest { data: [input], exec_endpoint: "/" };
        let response =
            self.http.post(format!("{}/post", self.base_url)).json(&request).send().await?;
        let response: EmbedResponse = check_response(response).await?.json().await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .and_then(|doc| doc.embedding)
            .ok_or(ServiceError::EmptyResponse)?;
        if embedding.is_empty() {
            return Err(ServiceError::EmptyResponse);
        }
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for ClipClient {
    fn name(&self) -> &str {
        "clip"
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed(EmbedInput::Text(text)).await
    }

    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>, ServiceError> {
        let bytes = tokio::fs::read(path).await?;
        self.embed(EmbedInput::Uri(data_uri(path, &bytes))).await
    }
}
