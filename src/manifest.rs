use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::utils::write_atomic;

/// 图片集中的一张图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    /// 相对于扫描目录的路径，在清单内唯一
    pub file_name: String,
    pub path: PathBuf,
}

impl ImageRecord {
    pub fn new(file_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { file_name: file_name.into(), path: path.into() }
    }
}

/// 一次运行所处理的有序图片列表
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ImageRecord>,
}

impl Manifest {
    pub fn new(entries: Vec<ImageRecord>) -> Self {
        Self { entries }
    }

    /// 扫描 `root` 下扩展名在 `suffixes`（逗号分隔）中的文件
    ///
    /// 按文件名排序，多次运行得到相同的顺序
    pub fn scan(root: &Path, suffixes: &str, recursive: bool) -> Result<Self> {
        ensure!(root.is_dir(), "{} is not a directory", root.display());
        let re_suf = suffix_regex(suffixes)?;

        info!("scanning directory: {}", root.display());
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut entries = vec![];
        for entry in WalkDir::new(root).min_depth(1).max_depth(max_depth).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(ext) = path.extension() else {
                continue;
            };
            if !re_suf.is_match(&ext.to_string_lossy()) {
                continue;
            }
            let file_name = path.strip_prefix(root).unwrap_or(path).to_string_lossy().to_string();
            entries.push(ImageRecord::new(file_name, path));
        }
        info!("scan finished, {} images", entries.len());

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ImageRecord] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageRecord> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.file_name.as_str())
    }

    /// 将文件名列表保存为 JSON 数组
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let names = self.file_names().collect::<Vec<_>>();
        let json = serde_json::to_string_pretty(&names)?;
        write_atomic(path, |tmp| {
            fs::write(tmp, json).with_context(|| format!("failed to write {}", tmp.display()))
        })
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ImageRecord;
    type IntoIter = std::slice::Iter<'a, ImageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// 构造不区分大小写的正则，匹配逗号分隔的后缀之一
pub fn suffix_regex(suffixes: &str) -> Result<Regex> {
    let alternatives = suffixes
        .split(',')
        .map(|s| regex::escape(s.trim().trim_start_matches('.')))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    ensure!(!alternatives.is_empty(), "no file suffix given");
    Ok(Regex::new(&format!("(?i)^({})$", alternatives.join("|")))?)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn touch(dir: &Path, name: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn corpus() -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in ["b.png", "a.JPG", "c.jpeg", "notes.txt", "d.pngx", "sub/e.png"] {
            touch(dir.path(), name);
        }
        dir
    }

    #[test]
    fn test_suffix_regex() {
        let re = suffix_regex("jpg, .png,bmp").unwrap();
        assert!(re.is_match("JPG"));
        assert!(re.is_match("png"));
        assert!(!re.is_match("pngx"));
        assert!(!re.is_match("jpeg"));
        assert!(suffix_regex(" , ").is_err());
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = corpus();
        let manifest = Manifest::scan(dir.path(), "jpg,jpeg,png", false).unwrap();
        let names = manifest.file_names().collect::<Vec<_>>();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpeg"]);
        assert_eq!(manifest.entries()[1].path, dir.path().join("b.png"));
    }

    #[test]
    fn test_scan_recursive() {
        let dir = corpus();
        let manifest = Manifest::scan(dir.path(), "png", true).unwrap();
        let names = manifest.file_names().collect::<Vec<_>>();
        let nested = Path::new("sub").join("e.png").to_string_lossy().to_string();
        assert_eq!(names, vec!["b.png", nested.as_str()]);
    }

    #[test]
    fn test_scan_missing_directory() {
        assert!(Manifest::scan(Path::new("/nonexistent/images"), "png", false).is_err());
    }

    #[test]
    fn test_save_json() {
        let dir = corpus();
        let manifest = Manifest::scan(dir.path(), "jpg,jpeg,png", false).unwrap();
        let out = dir.path().join("images.json");
        manifest.save_json(&out).unwrap();
        let names: Vec<String> = serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpeg"]);
    }
}
