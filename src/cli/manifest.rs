use std::path::PathBuf;

use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::manifest::Manifest;

#[derive(Parser, Debug, Clone)]
pub struct ManifestCommand {
    /// 图片所在目录
    pub path: PathBuf,
    /// 输出的 JSON 文件，默认为图片目录下的 images.json
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// 扫描的文件后缀，以逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
}

impl SubCommandExtend for ManifestCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let manifest = Manifest::scan(&self.path, &self.suffix, false)?;
        let output = self.output.clone().unwrap_or_else(|| self.path.join("images.json"));
        manifest.save_json(&output)?;
        println!("{}", output.display());
        Ok(())
    }
}
