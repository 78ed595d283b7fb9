//! 标注器：将图片转换为文本的外部服务
//!
//! 两种策略共用 [`Annotator`] trait：
//! - [`TagExtractor`] 请求聊天模型输出一组固定的 `label: value` 行
//! - [`Captioner`] 将图片发送给描述模型，保留原始描述
//!
//! 每次调用只尝试一次。失败时批处理改为记录
//! [`Annotator::fallback`]，服务出错不会中断
//! 整个任务

use async_trait::async_trait;

use crate::color::ColorSignature;
use crate::error::ServiceError;
use crate::manifest::ImageRecord;

pub mod openai;
pub mod replicate;

pub use openai::TagExtractor;
pub use replicate::{CaptionModel, Captioner};

/// 保存图片描述的列名
pub const DESCRIPTION: &str = "Description";

/// 生成描述失败时记录的占位描述
pub const CAPTION_ERROR: &str = "Error generating caption";

/// 标签提取器请求的标签，按列顺序排列
pub const DEFAULT_LABELS: &[&str] =
    &["theme", "Art_medium", "vibe", "Description", "6_key_words", "Composition", "Atmosphere"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// 标签 → 文本，按标签首次出现的顺序排列
    Fields(Vec<(String, String)>),
    Caption(String),
}

impl Annotation {
    /// 写入输出表格的列名和值
    pub fn columns(&self) -> Vec<(&str, &str)> {
        match self {
            Annotation::Fields(fields) => {
                fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
            }
            Annotation::Caption(caption) => vec![(DESCRIPTION, caption.as_str())],
        }
    }
}

/// 标注时已知的图片其他信息
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationContext<'a> {
    pub color: Option<&'a ColorSignature>,
}

#[async_trait]
pub trait Annotator: Send + Sync {
    /// 日志和监控指标中使用的名称
    fn name(&self) -> &str;

    /// 标注一张图片。每次运行对每张图片只调用一次，不会重试
    async fn annotate(
        &self,
        image: &ImageRecord,
        context: AnnotationContext<'_>,
    ) -> Result<Annotation, ServiceError>;

    /// 标注失败时记录的替代结果
    fn fallback(&self) -> Annotation;
}

/// 解析 `label: value` 行，只保留请求的标签
///
/// 标签匹配不区分大小写，保存时使用 `labels` 中的拼写。
/// 没有 `:`、标签未知或值为空的行会被丢弃，
/// 重复的标签会覆盖之前的值
pub fn parse_labelled_lines<S: AsRef<str>>(text: &str, labels: &[S]) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = vec![];
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // 去掉标签两侧的 markdown 列表符号和加粗标记
        let key = key.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '*' | '#'));
        let value = value.trim_matches(|c: char| c.is_whitespace() || c == '*');
        if value.is_empty() {
            continue;
        }
        let Some(label) = labels.iter().map(AsRef::as_ref).find(|l| l.eq_ignore_ascii_case(key))
        else {
            continue;
        };
        match fields.iter_mut().find(|(k, _)| k == label) {
            Some(field) => field.1 = value.to_owned(),
            None => fields.push((label.to_owned(), value.to_owned())),
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(fields: &[(String, String)]) -> Vec<(&str, &str)> {
        fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn test_parse_all_labels() {
        let text = "theme: solitude\nArt_medium: oil on canvas\nvibe: quiet\n\
                    Description: A lone figure.\n6_key_words: lone, figure, dusk, blue, calm, sea\n\
                    Composition: rule of thirds\nAtmosphere: melancholic";
        let fields = parse_labelled_lines(text, DEFAULT_LABELS);
        assert_eq!(fields.len(), 7);
        assert_eq!(fields[0], ("theme".to_owned(), "solitude".to_owned()));
        assert_eq!(fields[4].1, "lone, figure, dusk, blue, calm, sea");
    }

    #[test]
    fn test_parse_drops_noise() {
        let text = "Sure! Here is the analysis\n\n- **Theme**: harbor at night\n\
                    Unknown: value\nvibe:\nDescription: Boats: many of them\n";
        let fields = parse_labelled_lines(text, DEFAULT_LABELS);
        assert_eq!(
            pairs(&fields),
            vec![("theme", "harbor at night"), ("Description", "Boats: many of them")]
        );
    }

    #[test]
    fn test_parse_repeated_label_overwrites() {
        let fields = parse_labelled_lines("vibe: warm\ntheme: x\nVIBE: cold", DEFAULT_LABELS);
        assert_eq!(pairs(&fields), vec![("vibe", "cold"), ("theme", "x")]);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_labelled_lines("no labels at all", DEFAULT_LABELS).is_empty());
        assert!(parse_labelled_lines("", DEFAULT_LABELS).is_empty());
    }

    #[test]
    fn test_columns() {
        let caption = Annotation::Caption("a cat".to_owned());
        assert_eq!(caption.columns(), vec![(DESCRIPTION, "a cat")]);
        assert!(Annotation::Fields(vec![]).columns().is_empty());
    }
}
