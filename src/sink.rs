use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::record::AnalysisRecord;
use crate::utils::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Written { rows: usize, columns: usize },
    /// 没有可写入的内容，目标文件保持不变
    Skipped,
}

/// 将分析结果写为带表头的 CSV 表格
pub struct TableSink {
    dest: PathBuf,
}

impl TableSink {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self { dest: dest.into() }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// 写入 `records`，原子地替换目标文件
    ///
    /// 表头是所有记录列名的并集，按首次出现的顺序排列；
    /// 记录中没有的列留空
    pub fn write(&self, records: &[AnalysisRecord]) -> Result<SinkOutcome> {
        if records.is_empty() {
            info!("no records, {} not written", self.dest.display());
            return Ok(SinkOutcome::Skipped);
        }

        let rows = records.iter().map(|r| r.columns()).collect::<Vec<_>>();
        let mut header: Vec<&str> = vec![];
        for row in &rows {
            for (name, _) in row {
                if !header.contains(name) {
                    header.push(*name);
                }
            }
        }

        write_atomic(&self.dest, |tmp| {
            let mut writer = csv::Writer::from_path(tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            writer.write_record(&header)?;
            for row in &rows {
                writer.write_record(header.iter().map(|name| {
                    row.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str()).unwrap_or("")
                }))?;
            }
            writer.flush()?;
            Ok(())
        })?;

        info!("wrote {} rows to {}", rows.len(), self.dest.display());
        Ok(SinkOutcome::Written { rows: rows.len(), columns: header.len() })
    }

    /// 读回表格，每行为列名和值的列表
    pub fn read(&self) -> Result<Vec<Vec<(String, String)>>> {
        let mut reader = csv::Reader::from_path(&self.dest)
            .with_context(|| format!("failed to open {}", self.dest.display()))?;
        let header = reader.headers()?.clone();
        let mut rows: Vec<Vec<(String, String)>> = vec![];
        for record in reader.records() {
            let record = record?;
            let row = header.iter().zip(record.iter()).map(|(k, v)| (k.into(), v.into()));
            rows.push(row.collect());
        }
        Ok(rows)
    }
}
