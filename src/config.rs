use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::annotator::{self, Annotator, CaptionModel, Captioner, TagExtractor};
use crate::cli::*;
use crate::color::ColorOptions;

#[derive(Parser, Debug, Clone)]
pub struct ColorArgs {
    /// 每张图片的调色板颜色数量
    #[arg(long, value_name = "N", default_value_t = 5)]
    #[arg(value_parser = clap::value_parser!(u16).range(1..=256))]
    pub palette_size: u16,
    /// 量化时每隔 N 个像素采样一次，为 1 时读取全部像素
    #[arg(long, value_name = "N", default_value_t = 10)]
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    pub quality: u16,
}

impl From<&ColorArgs> for ColorOptions {
    fn from(args: &ColorArgs) -> Self {
        Self { palette_size: args.palette_size as usize, quality: args.quality as usize }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotatorKind {
    /// 使用兼容 OpenAI 的聊天模型提取结构化标签
    Tags,
    /// 使用 salesforce/blip 生成图片描述
    Blip,
    /// 使用 haotian-liu/llava-13b 生成艺术评论风格的描述
    Llava,
}

#[derive(Parser, Debug, Clone)]
pub struct AnnotatorOptions {
    /// 标注方式
    #[arg(short, long, value_enum, default_value_t = AnnotatorKind::Tags)]
    pub annotator: AnnotatorKind,
    /// 标签提取器的 API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    #[arg(long, value_name = "URL", default_value = annotator::openai::DEFAULT_BASE_URL)]
    pub openai_base_url: String,
    /// 标签提取器使用的聊天模型
    #[arg(long, default_value = annotator::openai::DEFAULT_MODEL)]
    pub openai_model: String,
    #[arg(long, default_value_t = annotator::openai::DEFAULT_TEMPERATURE)]
    pub temperature: f32,
    /// 图片描述模型的 API token
    #[arg(long, env = "REPLICATE_API_TOKEN", hide_env_values = true)]
    pub replicate_api_token: Option<String>,
    #[arg(long, value_name = "URL", default_value = annotator::replicate::DEFAULT_BASE_URL)]
    pub replicate_base_url: String,
    /// 随图片发送的风格指令，替换模型默认值
    #[arg(long, value_name = "TEXT")]
    pub caption_prompt: Option<String>,
    /// 单次标注请求的超时时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub timeout: u64,
}

impl AnnotatorOptions {
    /// 构造选定的标注器，缺少凭据时返回错误
    pub fn build(&self) -> Result<Box<dyn Annotator>> {
        let timeout = Duration::from_secs(self.timeout);
        let annotator: Box<dyn Annotator> = match self.annotator {
            AnnotatorKind::Tags => {
                let key = self
                    .openai_api_key
                    .clone()
                    .context("the tags annotator needs --openai-api-key or OPENAI_API_KEY")?;
                Box::new(
                    TagExtractor::new(key, &self.openai_base_url, timeout)?
                        .model(&self.openai_model)
                        .temperature(self.temperature),
                )
            }
            AnnotatorKind::Blip | AnnotatorKind::Llava => {
                let token = self.replicate_api_token.clone().context(
                    "captioning needs --replicate-api-token or REPLICATE_API_TOKEN",
                )?;
                let model = match self.annotator {
                    AnnotatorKind::Blip => CaptionModel::Blip,
                    _ => CaptionModel::Llava,
                };
                Box::new(
                    Captioner::new(model, token, &self.replicate_base_url, timeout)?
                        .prompt(self.caption_prompt.clone()),
                )
            }
        };
        Ok(annotator)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imcurate", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 命令结束时将 prometheus 指标写入该文件
    #[arg(long, global = true, value_name = "FILE")]
    pub metrics: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取每张图片的颜色和标注，保存为 CSV 表格
    Analyze(AnalyzeCommand),
    /// 使用 CLIP 嵌入按气质为图片排名
    Rank(RankCommand),
    /// 将图片文件名列表保存为 JSON
    Manifest(ManifestCommand),
    /// 将图片轮流分配到占位聚类
    Clusters(ClustersCommand),
}
