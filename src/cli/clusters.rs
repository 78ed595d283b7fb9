use std::path::PathBuf;

use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::clusters::ClusterLayout;
use crate::config::Opts;
use crate::manifest::Manifest;

#[derive(Parser, Debug, Clone)]
pub struct ClustersCommand {
    /// 图片所在目录
    pub path: PathBuf,
    /// 聚类数量
    #[arg(short = 'n', long, default_value_t = 10)]
    pub clusters: usize,
    /// 输出的 JSON 文件
    #[arg(short, long, default_value = "semantic_clusters.json")]
    pub output: PathBuf,
    /// 扫描的文件后缀，以逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,gif")]
    pub suffix: String,
}

impl SubCommandExtend for ClustersCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let manifest = Manifest::scan(&self.path, &self.suffix, false)?;
        let layout = ClusterLayout::round_robin(&manifest, self.clusters)?;
        layout.save(&self.output)?;
        Ok(())
    }
}
