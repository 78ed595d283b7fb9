use std::path::PathBuf;

use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::batch::{BatchRunner, FailurePolicy};
use crate::cli::SubCommandExtend;
use crate::config::{AnnotatorOptions, ColorArgs, Opts};
use crate::manifest::Manifest;
use crate::sink::{SinkOutcome, TableSink};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct AnalyzeCommand {
    #[command(flatten)]
    pub color: ColorArgs,
    #[command(flatten)]
    pub annotator: AnnotatorOptions,
    /// 图片所在目录
    pub path: PathBuf,
    /// 输出的 CSV 表格
    #[arg(short, long, default_value = "image_analysis.csv")]
    pub output: PathBuf,
    /// 扫描的文件后缀，以逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,bmp")]
    pub suffix: String,
    /// 同时扫描子目录
    #[arg(short, long)]
    pub recursive: bool,
    /// 颜色提取失败的图片如何处理
    #[arg(long, value_enum, default_value_t = FailurePolicy::Sentinel)]
    pub on_failure: FailurePolicy,
    /// 同时进行的标注请求数量
    #[arg(short = 'j', long, value_name = "N", default_value_t = 1)]
    pub concurrency: usize,
}

impl SubCommandExtend for AnalyzeCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let manifest = Manifest::scan(&self.path, &self.suffix, self.recursive)?;
        let annotator = self.annotator.build()?;
        info!("annotating {} images with {}", manifest.len(), annotator.name());

        let pb = ProgressBar::new(manifest.len() as u64).with_style(pb_style());
        let output = BatchRunner::new((&self.color).into())
            .policy(self.on_failure)
            .concurrency(self.concurrency)
            .progress(pb.clone())
            .run(&manifest, annotator.as_ref())
            .await?;
        pb.finish_with_message("analysis finished");

        info!(
            "{} images, {} records, {} failures",
            manifest.len(),
            output.records.len(),
            output.failures.len()
        );
        match TableSink::new(&self.output).write(&output.records)? {
            SinkOutcome::Written { rows, columns } => {
                info!("saved {rows} rows x {columns} columns to {}", self.output.display())
            }
            SinkOutcome::Skipped => {
                warn!("no valid results, {} not written", self.output.display())
            }
        }
        Ok(())
    }
}
