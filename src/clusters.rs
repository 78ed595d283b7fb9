use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use log::info;
use serde::Serialize;

use crate::manifest::Manifest;
use crate::utils::write_atomic;

/// 将图片轮流分配到 `k` 个占位聚类中
///
/// 不使用任何图片内容，只是给前端提供一个稳定的分组，
/// 用来排列缩略图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterLayout {
    /// 文件名 → 图片序号
    images: BTreeMap<String, usize>,
    /// 图片序号 → 聚类名称
    clusters: BTreeMap<usize, String>,
}

impl ClusterLayout {
    pub fn round_robin(manifest: &Manifest, k: usize) -> Result<Self> {
        ensure!(k > 0, "number of clusters must be at least 1");
        let mut images = BTreeMap::new();
        let mut clusters = BTreeMap::new();
        for (i, name) in manifest.file_names().enumerate() {
            images.insert(name.to_owned(), i);
            clusters.insert(i, format!("Cluster_{}", i % k));
        }
        Ok(Self { images, clusters })
    }

    pub fn cluster_of(&self, file_name: &str) -> Option<&str> {
        let index = self.images.get(file_name)?;
        self.clusters.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, |tmp| {
            fs::write(tmp, json).with_context(|| format!("failed to write {}", tmp.display()))
        })?;
        info!("wrote {} cluster assignments to {}", self.len(), path.display());
        Ok(())
    }
}
