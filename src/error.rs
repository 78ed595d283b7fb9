//! 分析和排名流程中单张图片的错误类型

use std::fmt;
use std::io;
use std::time::Duration;

/// 计算单张图片颜色特征时的错误
#[derive(Debug, thiserror::Error)]
pub enum ColorError {
    #[error("failed to read image: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image has no opaque pixels")]
    NoPixels,
}

/// 调用外部服务（标注器或嵌入模型）时的错误
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("empty response from service")]
    EmptyResponse,

    #[error("prediction {status}: {message}")]
    Prediction { status: String, message: String },

    #[error("no result after {0:?}")]
    Timeout(Duration),

    #[error("embedding dimension mismatch: expected {expected}, got {found}")]
    Dimension { expected: usize, found: usize },

    #[error("embedding has zero length")]
    ZeroVector,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ServiceError::Api { status: status.as_u16(), message: err.to_string() },
            None => ServiceError::Http(err.to_string()),
        }
    }
}

/// 将非 2xx 响应转换为 [`ServiceError::Api`]，响应体作为错误信息
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ServiceError::Api { status: status.as_u16(), message })
}

/// 图片出错时所处的流程阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Color,
    Annotate,
    Embed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Color => "color",
            Stage::Annotate => "annotate",
            Stage::Embed => "embed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单张图片在某个阶段出错的诊断信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub file_name: String,
    pub stage: Stage,
    pub cause: String,
}

impl ItemFailure {
    pub fn new(file_name: impl Into<String>, stage: Stage, cause: impl fmt::Display) -> Self {
        Self { file_name: file_name.into(), stage, cause: cause.to_string() }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} failed: {}", self.file_name, self.stage, self.cause)
    }
}
