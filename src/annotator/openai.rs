//! 通过兼容 OpenAI 的 chat completion 接口提取结构化标签

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Annotation, AnnotationContext, Annotator, DEFAULT_LABELS, parse_labelled_lines};
use crate::color::ColorSignature;
use crate::error::{ServiceError, check_response};
use crate::manifest::ImageRecord;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// 请求聊天模型为图片填写一组固定标签
///
/// 只发送文件名和颜色特征，不发送图片像素
#[derive(Clone)]
pub struct TagExtractor {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    labels: Vec<String>,
}

impl TagExtractor {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_owned(),
            temperature: DEFAULT_TEMPERATURE,
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
        })
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn prompt(&self, image: &ImageRecord, color: Option<&ColorSignature>) -> String {
        let (mean, palette) = match color {
            Some(sig) => (
                sig.dominant.to_string(),
                sig.palette.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", "),
            ),
            None => ("N/A".to_owned(), "N/A".to_owned()),
        };
        let mut prompt = format!(
            "You are an art critic AI. Given an image with the following visual details:\n\n\
             - File name: {}\n- Mean color: {}\n- Color palette: {}\n\n\
             Generate the following information, one label per line:\n",
            image.file_name, mean, palette
        );
        for label in &self.labels {
            prompt.push_str(label);
            prompt.push_str(":\n");
        }
        prompt
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl Annotator for TagExtractor {
    fn name(&self) -> &str {
        "tags"
    }

    async fn annotate(
        &self,
        image: &ImageRecord,
        context: AnnotationContext<'_>,
    ) -> Result<Annotation, ServiceError> {
        let prompt = self.prompt(image, context.color);
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: &prompt }],
            temperature: self.temperature,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response: ChatResponse = check_response(response).await?.json().await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ServiceError::EmptyResponse)?;

        Ok(Annotation::Fields(parse_labelled_lines(&content, &self.labels)))
    }

    fn fallback(&self) -> Annotation {
        Annotation::Fields(vec![])
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::color::ColorHex;

    fn image() -> ImageRecord {
        ImageRecord::new("sunset.jpg", PathBuf::from("images/sunset.jpg"))
    }

    fn extractor(server: &MockServer) -> TagExtractor {
        TagExtractor::new("test-key", server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_prompt_contains_colors_and_labels() {
        let extractor =
            TagExtractor::new("k", DEFAULT_BASE_URL, Duration::from_secs(1)).unwrap();
        let sig = ColorSignature {
            dominant: ColorHex::new(0x11, 0x22, 0x33),
            palette: vec![ColorHex::new(0x11, 0x22, 0x33), ColorHex::new(0x44, 0x55, 0x66)],
        };
        let prompt = extractor.prompt(&image(), Some(&sig));
        assert!(prompt.contains("File name: sunset.jpg"));
        assert!(prompt.contains("Mean color: #112233"));
        assert!(prompt.contains("Color palette: #112233, #445566"));
        assert!(prompt.contains("\n6_key_words:\n"));

        let prompt = extractor.prompt(&image(), None);
        assert!(prompt.contains("Mean color: N/A"));
    }

    #[tokio::test]
    async fn test_annotate_parses_labels() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_string_contains("gpt-3.5-turbo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "theme: dusk\nvibe: warm\nthis line is dropped\nAtmosphere: hazy"
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = extractor(&server).annotate(&image(), AnnotationContext::default()).await;
        let Annotation::Fields(fields) = result.unwrap() else {
            panic!("expected fields");
        };
        assert_eq!(
            fields,
            vec![
                ("theme".to_owned(), "dusk".to_owned()),
                ("vibe".to_owned(), "warm".to_owned()),
                ("Atmosphere".to_owned(), "hazy".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_annotate_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .expect(1)
            .mount(&server)
            .await;

        let err = extractor(&server).annotate(&image(), AnnotationContext::default()).await;
        match err.unwrap_err() {
            ServiceError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_annotate_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = extractor(&server).annotate(&image(), AnnotationContext::default()).await;
        assert!(matches!(err, Err(ServiceError::EmptyResponse)));
    }

    #[test]
    fn test_fallback_is_empty() {
        let extractor =
            TagExtractor::new("k", DEFAULT_BASE_URL, Duration::from_secs(1)).unwrap();
        assert_eq!(extractor.fallback(), Annotation::Fields(vec![]));
    }
}
