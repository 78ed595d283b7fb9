//! 通过 Replicate prediction 生成图片描述

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::{Annotation, AnnotationContext, Annotator, CAPTION_ERROR};
use crate::error::{ServiceError, check_response};
use crate::manifest::ImageRecord;
use crate::utils::data_uri;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

/// 发送给 LLaVA 的默认风格指令
pub const LLAVA_PROMPT: &str = "Describe this image like an art critic. \
    Focus on color, composition, emotion, and materiality. Be poetic.";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionModel {
    /// `salesforce/blip`，只发送图片
    Blip,
    /// `haotian-liu/llava-13b`，发送图片和风格指令
    Llava,
}

impl CaptionModel {
    pub fn slug(&self) -> &'static str {
        match self {
            CaptionModel::Blip => "salesforce/blip",
            CaptionModel::Llava => "haotian-liu/llava-13b",
        }
    }

    pub fn default_prompt(&self) -> Option<&'static str> {
        match self {
            CaptionModel::Blip => None,
            CaptionModel::Llava => Some(LLAVA_PROMPT),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CaptionModel::Blip => "blip",
            CaptionModel::Llava => "llava",
        }
    }
}

/// 将图片发送给 Replicate 上的描述模型，原样保留返回的描述
#[derive(Clone)]
pub struct Captioner {
    http: Client,
    base_url: String,
    api_token: String,
    model: CaptionModel,
    prompt: Option<String>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl Captioner {
    /// `timeout` 同时限制单次 HTTP 请求和等待一个 prediction 的总时长
    pub fn new(
        model: CaptionModel,
        api_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_token: api_token.into(),
            model,
            prompt: model.default_prompt().map(str::to_owned),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: timeout,
        })
    }

    /// 覆盖风格指令
    pub fn prompt(mut self, prompt: Option<String>) -> Self {
        if prompt.is_some() {
            self.prompt = prompt;
        }
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn fetch(&self, url: &str) -> Result<Prediction, ServiceError> {
        let response = self.http.get(url).bearer_auth(&self.api_token).send().await?;
        Ok(check_response(response).await?.json().await?)
    }
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

/// 描述可能是单个字符串，也可能是流式输出的 token 列表
fn caption_from_output(output: Value) -> Result<String, ServiceError> {
    let caption = match output {
        Value::String(s) => s,
        Value::Array(parts) => parts.iter().filter_map(Value::as_str).collect(),
        _ => return Err(ServiceError::EmptyResponse),
    };
    let caption = caption.trim();
    if caption.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }
    Ok(caption.to_owned())
}

#[async_trait]
impl Annotator for Captioner {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn annotate(
        &self,
        image: &ImageRecord,
        _context: AnnotationContext<'_>,
    ) -> Result<Annotation, ServiceError> {
        let bytes = tokio::fs::read(&image.path).await?;
        let request = PredictionRequest {
            input: PredictionInput {
                image: data_uri(&image.path, &bytes),
                prompt: self.prompt.as_deref(),
            },
        };

        let deadline = Instant::now() + self.max_wait;
        let response = self
            .http
            .post(format!("{}/models/{}/predictions", self.base_url, self.model.slug()))
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&request)
            .send()
            .await?;
        let mut prediction: Prediction = check_response(response).await?.json().await?;

        loop {
            match prediction.status.as_str() {
                "succeeded" => {
                    return caption_from_output(prediction.output).map(Annotation::Caption);
                }
                "failed" | "canceled" => {
                    let message = match prediction.error {
                        Value::String(s) => s,
                        Value::Null => "no error message".to_owned(),
                        other => other.to_string(),
                    };
                    return Err(ServiceError::Prediction { status: prediction.status, message });
                }
                _ => {}
            }

            let Some(url) = prediction.urls.and_then(|u| u.get) else {
                return Err(ServiceError::EmptyResponse);
            };
            if Instant::now() + self.poll_interval > deadline {
                return Err(ServiceError::Timeout(self.max_wait));
            }
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.fetch(&url).await?;
        }
    }

    fn fallback(&self) -> Annotation {
        Annotation::Caption(CAPTION_ERROR.to_owned())
    }
}
