use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::manifest::Manifest;
use crate::ranker::{CALM_PROMPT, CHAOTIC_PROMPT, ClipClient, EmbeddingRanker, clip};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct RankCommand {
    /// 图片所在目录
    pub path: PathBuf,
    /// 输出的 JSON 文件
    #[arg(short, long, default_value = "temperament_scores.json")]
    pub output: PathBuf,
    /// 扫描的文件后缀，以逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
    /// 同时扫描子目录
    #[arg(short, long)]
    pub recursive: bool,
    /// CLIP 嵌入服务地址
    #[arg(long, value_name = "URL", env = "CLIP_SERVER_URL")]
    #[arg(default_value = clip::DEFAULT_BASE_URL)]
    pub clip_url: String,
    /// 用于打分的参考提示词，越接近的图片排名越靠后
    #[arg(long, value_name = "TEXT", default_value = CHAOTIC_PROMPT)]
    pub chaotic_prompt: String,
    /// 相反一端的参考提示词
    #[arg(long, value_name = "TEXT", default_value = CALM_PROMPT)]
    pub calm_prompt: String,
    /// intimacy_score 的随机种子，不指定则随机
    #[arg(long)]
    pub seed: Option<u64>,
    /// 同时进行的嵌入请求数量
    #[arg(short = 'j', long, value_name = "N", default_value_t = 1)]
    pub concurrency: usize,
    /// 单次嵌入请求的超时时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub timeout: u64,
}

impl SubCommandExtend for RankCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let manifest = Manifest::scan(&self.path, &self.suffix, self.recursive)?;
        let clip = ClipClient::new(&self.clip_url, Duration::from_secs(self.timeout))?;

        let pb = ProgressBar::new(manifest.len() as u64).with_style(pb_style());
        let ranking = EmbeddingRanker::new(Arc::new(clip))
            .prompts(&self.chaotic_prompt, &self.calm_prompt)
            .concurrency(self.concurrency)
            .seed(self.seed)
            .progress(pb.clone())
            .rank(&manifest)
            .await?;
        pb.finish_with_message("ranking finished");

        info!("{} images ranked, {} failed to embed", ranking.len(), ranking.failures().len());
        ranking.save(&self.output)?;
        Ok(())
    }
}
