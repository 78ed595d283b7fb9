use crate::annotator::Annotation;
use crate::color::ColorSignature;

/// 颜色特征提取失败时写入的占位值
pub const NOT_AVAILABLE: &str = "N/A";

/// 分析表格中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub file_name: String,
    /// 颜色提取失败时为 `None`
    pub color: Option<ColorSignature>,
    pub annotation: Annotation,
}

impl AnalysisRecord {
    pub fn new(
        file_name: impl Into<String>,
        color: Option<ColorSignature>,
        annotation: Annotation,
    ) -> Self {
        Self { file_name: file_name.into(), color, annotation }
    }

    /// 按表格顺序排列的列名和值
    ///
    /// `file_name`、`Mean_color` 和 `Color_list` 在前，
    /// 之后是标注结果提供的列
    pub fn columns(&self) -> Vec<(&str, String)> {
        let (mean, list) = match &self.color {
            Some(sig) => (
                sig.dominant.to_string(),
                sig.palette.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", "),
            ),
            None => (NOT_AVAILABLE.to_owned(), String::new()),
        };
        let mut columns =
            vec![("file_name", self.file_name.clone()), ("Mean_color", mean), ("Color_list", list)];
        columns.extend(self.annotation.columns().into_iter().map(|(k, v)| (k, v.to_owned())));
        columns
    }
}
