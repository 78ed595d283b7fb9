use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context;
use prometheus::*;

use crate::error::Stage;

static METRIC_ITEMS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imcurate_items_total",
        "images processed per stage and outcome",
        &["stage", "outcome"]
    )
    .unwrap()
});

static METRIC_CALL_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imcurate_call_duration_seconds",
        "duration of one external service call in seconds",
        &["boundary"]
    )
    .unwrap()
});

/// 记录一张图片通过 `stage` 阶段
pub fn inc_item(stage: Stage, ok: bool) {
    let outcome = if ok { "ok" } else { "failed" };
    METRIC_ITEMS.with_label_values(&[stage.as_str(), outcome]).inc();
}

pub fn observe_call(boundary: &str, duration: Duration) {
    METRIC_CALL_DURATION.with_label_values(&[boundary]).observe(duration.as_secs_f64());
}

/// 以文本格式导出所有已注册的指标
pub fn write_to(path: &Path) -> anyhow::Result<()> {
    let text = TextEncoder::new().encode_to_string(&gather())?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_write_metrics() {
        inc_item(Stage::Color, true);
        inc_item(Stage::Annotate, false);
        observe_call("tags", Duration::from_millis(30));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.prom");
        write_to(&path).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("imcurate_items_total{outcome=\"ok\",stage=\"color\"}"));
        assert!(text.contains("imcurate_call_duration_seconds_count{boundary=\"tags\"}"));
    }
}
