//! 图片集内部的气质排名
//!
//! 每张图片与两条参考提示词（“混乱”一端和“平静”一端）嵌入到同一向量空间，
//! 与“混乱”一端的余弦相似度作为原始分数，
//! 再按升序转换为连续的排名 `1..=N`，
//! 最平静的图片排第一。嵌入失败的图片得分为
//! [`SENTINEL_SCORE`]，排在最后
//!
//! `intimacy_score` 对每张图片从 `1..=10` 中均匀随机抽取，与图片内容无关。
//! 指定随机种子即可复现

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{ItemFailure, ServiceError, Stage};
use crate::manifest::Manifest;
use crate::metrics;
use crate::utils::write_atomic;

pub mod clip;

pub use clip::ClipClient;

pub const CHAOTIC_PROMPT: &str = "chaotic energetic sharp angles straight warm hot";
pub const CALM_PROMPT: &str = "calm quiet chill relaxed soft cool curved gentle";

/// 嵌入失败的图片所得的分数
pub const SENTINEL_SCORE: f32 = f32::NEG_INFINITY;

/// 将文本和图片嵌入到同一向量空间的模型
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    async fn embed_image(&self, path: &Path) -> Result<Vec<f32>, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemperamentEntry {
    pub temperament_score: usize,
    pub intimacy_score: u8,
}

/// 文件名 → 排名项，按排名顺序保存
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    entries: Vec<(String, TemperamentEntry)>,
    failures: Vec<ItemFailure>,
}

impl Ranking {
    pub fn entries(&self) -> &[(String, TemperamentEntry)] {
        &self.entries
    }

    pub fn get(&self, file_name: &str) -> Option<&TemperamentEntry> {
        self.entries.iter().find(|(name, _)| name == file_name).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 嵌入失败的图片，它们仍会参与排名，排在末尾
    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    /// 以格式化的 JSON 对象保存排名
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, |tmp| {
            fs::write(tmp, json).with_context(|| format!("failed to write {}", tmp.display()))
        })?;
        info!("wrote {} entries to {}", self.entries.len(), path.display());
        Ok(())
    }
}

impl Serialize for Ranking {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

pub struct EmbeddingRanker {
    embedder: Arc<dyn Embedder>,
    chaotic: String,
    calm: String,
    concurrency: usize,
    seed: Option<u64>,
    pb: ProgressBar,
}

impl EmbeddingRanker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            chaotic: CHAOTIC_PROMPT.to_owned(),
            calm: CALM_PROMPT.to_owned(),
            concurrency: 1,
            seed: None,
            pb: ProgressBar::hidden(),
        }
    }

    pub fn prompts(mut self, chaotic: impl Into<String>, calm: impl Into<String>) -> Self {
        self.chaotic = chaotic.into();
        self.calm = calm.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 按清单顺序计算每张图片与“混乱”一端的原始相似度
    ///
    /// 只有参考提示词无法嵌入时才会失败
    pub async fn score(
        &self,
        manifest: &Manifest,
    ) -> Result<(Vec<(String, f32)>, Vec<ItemFailure>)> {
        let chaotic = self.reference(&self.chaotic).await?;
        let calm = self.reference(&self.calm).await?;
        if calm.len() != chaotic.len() {
            let e = ServiceError::Dimension { expected: chaotic.len(), found: calm.len() };
            return Err(e).context("reference prompts disagree on embedding size");
        }
        debug!("similarity between reference poles: {:.4}", chaotic.dot(&calm));

        self.pb.set_length(manifest.len() as u64);
        let chaotic = &chaotic;
        let results = stream::iter(manifest.iter().cloned())
            .map(|image| async move {
                let start = Instant::now();
                let result = self.embedder.embed_image(&image.path).await;
                metrics::observe_call(self.embedder.name(), start.elapsed());
                let score = result.and_then(|v| {
                    let v = normalize(v)?;
                    if v.len() != chaotic.len() {
                        return Err(ServiceError::Dimension {
                            expected: chaotic.len(),
                            found: v.len(),
                        });
                    }
                    Ok(v.dot(chaotic))
                });
                metrics::inc_item(Stage::Embed, score.is_ok());
                self.pb.inc(1);
                (image, score)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut scores = Vec::with_capacity(results.len());
        let mut failures = vec![];
        for (image, score) in results {
            let score = match score {
                Ok(score) => score,
                Err(e) => {
                    let failure = ItemFailure::new(&image.file_name, Stage::Embed, e);
                    warn!("{failure}");
                    failures.push(failure);
                    SENTINEL_SCORE
                }
            };
            debug!("{}: {score:.4}", image.file_name);
            scores.push((image.file_name, score));
        }
        Ok((scores, failures))
    }

    /// 为清单中的每张图片打分并排名
    pub async fn rank(&self, manifest: &Manifest) -> Result<Ranking> {
        let (scores, failures) = self.score(manifest).await?;
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut ranking = assign_ranks(scores, &mut rng);
        ranking.failures = failures;
        Ok(ranking)
    }

    async fn reference(&self, prompt: &str) -> Result<Array1<f32>> {
        let embedding = self
            .embedder
            .embed_text(prompt)
            .await
            .and_then(normalize)
            .with_context(|| format!("failed to embed reference prompt {prompt:?}"))?;
        Ok(embedding)
    }
}

fn normalize(v: Vec<f32>) -> Result<Array1<f32>, ServiceError> {
    let v = Array1::from_vec(v);
    let norm = v.dot(&v).sqrt();
    if !norm.is_normal() {
        return Err(ServiceError::ZeroVector);
    }
    Ok(v / norm)
}

/// 将原始分数转换为连续的升序排名
///
/// 排序是稳定的：分数相同的图片保持输入顺序，获得相邻的排名。
/// 哨兵分数和 NaN 排在最后
pub fn assign_ranks<R: Rng>(mut scores: Vec<(String, f32)>, rng: &mut R) -> Ranking {
    let key = |s: f32| if s.is_nan() { SENTINEL_SCORE } else { s };
    scores.sort_by(|a, b| {
        let (a, b) = (key(a.1), key(b.1));
        // 哨兵排最后，其余升序
        (a == SENTINEL_SCORE).cmp(&(b == SENTINEL_SCORE)).then(a.total_cmp(&b))
    });

    let entries = scores
        .into_iter()
        .enumerate()
        .map(|(i, (name, _))| {
            let entry = TemperamentEntry {
                temperament_score: i + 1,
                intimacy_score: rng.random_range(1..=10),
            };
            (name, entry)
        })
        .collect();
    Ranking { entries, failures: vec![] }
}
