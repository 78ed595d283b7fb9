//! 逐张图片分析：先提取颜色特征，再调用标注器，结果按清单顺序收集

use std::time::Instant;

use anyhow::{Context, Result};
use clap::ValueEnum;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use log::{debug, warn};
use rayon::prelude::*;
use tokio::task::spawn_blocking;

use crate::annotator::{AnnotationContext, Annotator};
use crate::color::{ColorOptions, ColorSignature};
use crate::error::{ColorError, ItemFailure, Stage};
use crate::manifest::{ImageRecord, Manifest};
use crate::metrics;
use crate::record::AnalysisRecord;

/// 颜色特征提取失败的图片如何处理
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// 保留该行，颜色列填写 `N/A`
    #[default]
    Sentinel,
    /// 从表格中剔除该图片
    Drop,
}

#[derive(Debug, Default)]
pub struct BatchOutput {
    /// 每张保留下来的图片一条，按清单顺序排列
    pub records: Vec<AnalysisRecord>,
    pub failures: Vec<ItemFailure>,
}

pub struct BatchRunner {
    color: ColorOptions,
    policy: FailurePolicy,
    concurrency: usize,
    pb: ProgressBar,
}

impl BatchRunner {
    pub fn new(color: ColorOptions) -> Self {
        Self {
            color,
            policy: FailurePolicy::default(),
            concurrency: 1,
            pb: ProgressBar::hidden(),
        }
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 同时进行的标注请求上限
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    /// 分析清单中的每张图片。单张图片的失败只记录日志并收集起来，
    /// 不会中断整批任务；只有颜色提取线程 panic 时才返回错误
    pub async fn run(
        &self,
        manifest: &Manifest,
        annotator: &dyn Annotator,
    ) -> Result<BatchOutput> {
        self.pb.set_length(manifest.len() as u64);
        let mut failures = vec![];

        // 解码是 CPU 密集型任务，放到阻塞线程池中执行
        let paths = manifest.iter().map(|image| image.path.clone()).collect::<Vec<_>>();
        let opts = self.color;
        let colors: Vec<Result<ColorSignature, ColorError>> = spawn_blocking(move || {
            paths
                .par_iter()
                .map(|path| {
                    let result = ColorSignature::compute(path, &opts);
                    metrics::inc_item(Stage::Color, result.is_ok());
                    result
                })
                .collect::<Vec<_>>()
        })
        .await
        .context("color extraction task failed")?;

        let mut pending: Vec<(ImageRecord, Option<ColorSignature>)> = vec![];
        for (image, color) in manifest.iter().zip(colors) {
            match color {
                Ok(sig) => pending.push((image.clone(), Some(sig))),
                Err(e) => {
                    let failure = ItemFailure::new(&image.file_name, Stage::Color, e);
                    warn!("{failure}");
                    failures.push(failure);
                    match self.policy {
                        FailurePolicy::Sentinel => pending.push((image.clone(), None)),
                        FailurePolicy::Drop => self.pb.inc(1),
                    }
                }
            }
        }

        let results = stream::iter(pending)
            .map(|(image, color)| async move {
                let context = AnnotationContext { color: color.as_ref() };
                let start = Instant::now();
                let result = annotator.annotate(&image, context).await;
                metrics::observe_call(annotator.name(), start.elapsed());
                metrics::inc_item(Stage::Annotate, result.is_ok());
                self.pb.inc(1);
                (image, color, result)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut records = Vec::with_capacity(results.len());
        for (image, color, result) in results {
            let annotation = match result {
                Ok(annotation) => annotation,
                Err(e) => {
                    let failure = ItemFailure::new(&image.file_name, Stage::Annotate, e);
                    warn!("{failure}");
                    failures.push(failure);
                    annotator.fallback()
                }
            };
            debug!("analyzed {}", image.file_name);
            records.push(AnalysisRecord::new(image.file_name, color, annotation));
        }

        Ok(BatchOutput { records, failures })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    use super::*;
    use crate::annotator::Annotation;
    use crate::error::ServiceError;

    /// 用文件名和主色作为每张图片的描述
    struct Echo;

    #[async_trait]
    impl Annotator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn annotate(
            &self,
            image: &ImageRecord,
            context: AnnotationContext<'_>,
        ) -> Result<Annotation, ServiceError> {
            let color = context.color.map(|c| c.dominant.to_string()).unwrap_or_default();
            Ok(Annotation::Caption(format!("{} {}", image.file_name, color)))
        }

        fn fallback(&self) -> Annotation {
            Annotation::Caption("fallback".to_owned())
        }
    }

    struct Broken;

    #[async_trait]
    impl Annotator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn annotate(
            &self,
            _image: &ImageRecord,
            _context: AnnotationContext<'_>,
        ) -> Result<Annotation, ServiceError> {
            Err(ServiceError::Api { status: 500, message: "down".to_owned() })
        }

        fn fallback(&self) -> Annotation {
            Annotation::Caption("fallback".to_owned())
        }
    }

    /// 每次调用都会休眠，并记录最大并发数
    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Annotator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn annotate(
            &self,
            image: &ImageRecord,
            _context: AnnotationContext<'_>,
        ) -> Result<Annotation, ServiceError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // 越靠后的图片越早完成
            let delay = 40 - image.file_name.as_bytes()[0].saturating_sub(b'a') as u64 * 10;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Annotation::Caption(image.file_name.clone()))
        }

        fn fallback(&self) -> Annotation {
            Annotation::Caption(String::new())
        }
    }

    /// a.png 红色，b.png 蓝色，c.png 已损坏，d.png 绿色
    fn corpus() -> (TempDir, Manifest) {
        let dir = TempDir::new().unwrap();
        RgbImage::from_pixel(8, 8, Rgb([255, 0, 0])).save(dir.path().join("a.png")).unwrap();
        RgbImage::from_pixel(8, 8, Rgb([0, 0, 255])).save(dir.path().join("b.png")).unwrap();
        fs::write(dir.path().join("c.png"), b"not an image").unwrap();
        RgbImage::from_pixel(8, 8, Rgb([0, 255, 0])).save(dir.path().join("d.png")).unwrap();
        let manifest = Manifest::scan(dir.path(), "png", false).unwrap();
        (dir, manifest)
    }

    fn names(output: &BatchOutput) -> Vec<&str> {
        output.records.iter().map(|r| r.file_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_sentinel_keeps_failed_color() {
        let (_dir, manifest) = corpus();
        let output =
            BatchRunner::new(ColorOptions::default()).run(&manifest, &Echo).await.unwrap();

        assert_eq!(names(&output), vec!["a.png", "b.png", "c.png", "d.png"]);
        assert!(output.records[2].color.is_none());
        assert_eq!(output.records[2].annotation, Annotation::Caption("c.png ".to_owned()));
        assert_eq!(
            output.records[1].annotation,
            Annotation::Caption("b.png #0000ff".to_owned())
        );
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].file_name, "c.png");
        assert_eq!(output.failures[0].stage, Stage::Color);
    }

    #[tokio::test]
    async fn test_drop_policy() {
        let (_dir, manifest) = corpus();
        let output = BatchRunner::new(ColorOptions::default())
            .policy(FailurePolicy::Drop)
            .run(&manifest, &Echo)
            .await
            .unwrap();

        assert_eq!(names(&output), vec!["a.png", "b.png", "d.png"]);
        assert!(output.records.iter().all(|r| r.color.is_some()));
        assert_eq!(output.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_annotator_failure_uses_fallback() {
        let (_dir, manifest) = corpus();
        let output = BatchRunner::new(ColorOptions::default())
            .policy(FailurePolicy::Drop)
            .run(&manifest, &Broken)
            .await
            .unwrap();

        assert_eq!(output.records.len(), 3);
        assert!(
            output
                .records
                .iter()
                .all(|r| r.annotation == Annotation::Caption("fallback".to_owned()))
        );
        let stages = output.failures.iter().map(|f| f.stage).collect::<Vec<_>>();
        assert_eq!(stages, vec![Stage::Color, Stage::Annotate, Stage::Annotate, Stage::Annotate]);
    }

    #[tokio::test]
    async fn test_failing_annotator_keeps_every_image() {
        let (_dir, manifest) = corpus();
        let output = BatchRunner::new(ColorOptions::default())
            .run(&manifest, &Broken)
            .await
            .unwrap();

        assert_eq!(output.records.len(), manifest.len());
        assert_eq!(names(&output), vec!["a.png", "b.png", "c.png", "d.png"]);
        assert!(output.records[2].color.is_none());
        assert_eq!(output.failures.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_thread_runtime() {
        let (_dir, manifest) = corpus();
        let output = BatchRunner::new(ColorOptions::default())
            .concurrency(4)
            .run(&manifest, &Echo)
            .await
            .unwrap();
        assert_eq!(names(&output), vec!["a.png", "b.png", "c.png", "d.png"]);
    }

    #[tokio::test]
    async fn test_concurrency_keeps_order() {
        let (_dir, manifest) = corpus();
        let slow = Slow { active: AtomicUsize::new(0), peak: AtomicUsize::new(0) };
        let output = BatchRunner::new(ColorOptions::default())
            .concurrency(2)
            .run(&manifest, &slow)
            .await
            .unwrap();

        assert_eq!(names(&output), vec!["a.png", "b.png", "c.png", "d.png"]);
        assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_manifest() {
        let output = BatchRunner::new(ColorOptions::default())
            .run(&Manifest::default(), &Echo)
            .await
            .unwrap();
        assert!(output.records.is_empty());
        assert!(output.failures.is_empty());
    }
}
