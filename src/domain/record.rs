// ==========================================
// 商品目录导入引擎 - 源记录与字段值
// ==========================================
// 职责: 解析后的源记录（路径 → 多次出现的值）、解析结果值、单条记录结果
// ==========================================

use crate::domain::types::RecordDisposition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// SourceRecord - 源记录
// ==========================================
// 说明: 重复节点按出现顺序保留全部值,扁平视图取第一次出现
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// 在源文件中的序号（0 起,按读取顺序）
    pub index: usize,
    fields: BTreeMap<String, Vec<String>>,
    /// 读取缺陷（如非 UTF-8 字节）; 有缺陷的记录只计失败,不进入流水线
    #[serde(default, skip_serializing_if = "Option::is_none")]
    defect: Option<String>,
}

impl SourceRecord {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            fields: BTreeMap::new(),
            defect: None,
        }
    }

    /// 由 (路径, 值) 对构造,重复路径追加为多次出现
    pub fn from_pairs<I, K, V>(index: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut record = Self::new(index);
        for (k, v) in pairs {
            record.push(k, v);
        }
        record
    }

    pub fn push(&mut self, path: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(path.into()).or_default().push(value.into());
    }

    /// 路径上的全部出现值（不存在时为空切片）
    pub fn values(&self, path: &str) -> &[String] {
        self.fields.get(path).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// 扁平视图: 第一次出现的值,缺失视为空字符串
    pub fn flat(&self, path: &str) -> &str {
        self.values(path).first().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn contains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// 只保留第一条缺陷描述
    pub fn mark_defect(&mut self, message: impl Into<String>) {
        if self.defect.is_none() {
            self.defect = Some(message.into());
        }
    }

    pub fn defect(&self) -> Option<&str> {
        self.defect.as_deref()
    }

    pub fn is_blank(&self) -> bool {
        self.fields
            .values()
            .all(|vals| vals.iter().all(|v| v.trim().is_empty()))
    }
}

// ==========================================
// FieldValue - 字段值
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// 文本表示（列表以逗号连接）
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items.join(","),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Vec<String> {
        match self {
            FieldValue::Null => Vec::new(),
            FieldValue::List(items) => items.clone(),
            other => vec![other.as_text()],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|s| s.trim().is_empty()),
            _ => false,
        }
    }
}

/// 数值格式化: 整数不带小数点,其余保留最短表示
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ==========================================
// ImportRecordResult - 单条源记录处理结果
// ==========================================
// 用途: 汇总到任务计数器,并写入运行日志（错误/警告）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecordResult {
    pub record_index: usize,
    pub identifier: Option<String>,
    pub disposition: RecordDisposition,
    pub error: Option<String>,
    /// 字段级软警告（公式/AI 回退）
    pub warnings: Vec<String>,
}

impl ImportRecordResult {
    pub fn new(record_index: usize, disposition: RecordDisposition) -> Self {
        Self {
            record_index,
            identifier: None,
            disposition,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(record_index: usize, identifier: Option<String>, error: String) -> Self {
        Self {
            record_index,
            identifier,
            disposition: RecordDisposition::Error,
            error: Some(error),
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_record_repeats() {
        let record = SourceRecord::from_pairs(
            0,
            vec![("image", "a.jpg"), ("image", "b.jpg"), ("title", "Shirt")],
        );

        assert_eq!(record.values("image"), &["a.jpg".to_string(), "b.jpg".to_string()]);
        assert_eq!(record.flat("image"), "a.jpg");
        assert_eq!(record.flat("missing"), "");
    }

    #[test]
    fn test_field_value_text() {
        assert_eq!(FieldValue::Number(12.0).as_text(), "12");
        assert_eq!(FieldValue::Number(12.5).as_text(), "12.5");
        assert_eq!(
            FieldValue::List(vec!["a".into(), "b".into()]).as_text(),
            "a,b"
        );
        assert!(FieldValue::Text("   ".into()).is_empty());
    }
}
