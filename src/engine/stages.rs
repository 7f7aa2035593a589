// ==========================================
// 商品目录导入引擎 - 单条记录的阶段类型
// ==========================================
// 顺序: 过滤 → 映射 → 加工 → 定价 → 变体
//   AdmittedRecord → MappedRecord → ProcessedRecord → PricedRecord → FinishedRecord
// 红线: 每个阶段只接受上一阶段的产物,构造函数不对外公开
//       （价格必须在变体构建之前确定,由类型签名保证）
// ==========================================

use crate::domain::{FieldValue, ProductKind, SourceRecord, VariationRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// 通过过滤的源记录
#[derive(Debug, Clone, Copy)]
pub struct AdmittedRecord<'a> {
    record: &'a SourceRecord,
}

impl<'a> AdmittedRecord<'a> {
    pub(crate) fn new(record: &'a SourceRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &'a SourceRecord {
        self.record
    }
}

/// 表达式解析后的原始值（未加工）
#[derive(Debug, Clone)]
pub struct MappedRecord<'a> {
    pub(crate) record: &'a SourceRecord,
    pub(crate) raw: BTreeMap<String, FieldValue>,
}

impl<'a> MappedRecord<'a> {
    pub fn record(&self) -> &'a SourceRecord {
        self.record
    }

    pub fn raw(&self) -> &BTreeMap<String, FieldValue> {
        &self.raw
    }
}

/// 加工完成（direct / 公式 / AI / 混合）
#[derive(Debug, Clone)]
pub struct ProcessedRecord<'a> {
    pub(crate) record: &'a SourceRecord,
    pub(crate) fields: BTreeMap<String, FieldValue>,
    pub(crate) warnings: Vec<String>,
}

impl<'a> ProcessedRecord<'a> {
    pub fn record(&self) -> &'a SourceRecord {
        self.record
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// 价格字段已按定价规则计算
#[derive(Debug, Clone)]
pub struct PricedRecord<'a> {
    pub(crate) record: &'a SourceRecord,
    pub(crate) fields: BTreeMap<String, FieldValue>,
    /// 价格字段 → 命中规则 id（None 为默认规则）
    pub(crate) applied_rules: BTreeMap<String, Option<String>>,
    pub(crate) warnings: Vec<String>,
}

impl<'a> PricedRecord<'a> {
    pub fn record(&self) -> &'a SourceRecord {
        self.record
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn applied_rules(&self) -> &BTreeMap<String, Option<String>> {
        &self.applied_rules
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// 已解析的商品属性（含非变体属性）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAttribute {
    pub name: String,
    pub values: Vec<String>,
    pub visible: bool,
    pub used_for_variations: bool,
}

// ==========================================
// FinishedRecord - 可写入目录的完整记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedRecord {
    pub(crate) record_index: usize,
    pub(crate) identifier: String,
    pub(crate) kind: ProductKind,
    pub(crate) fields: BTreeMap<String, FieldValue>,
    pub(crate) attributes: Vec<ResolvedAttribute>,
    pub(crate) variations: Vec<VariationRecord>,
    #[serde(skip)]
    pub(crate) warnings: Vec<String>,
}

#[derive(Serialize)]
struct HashView<'a> {
    kind: ProductKind,
    fields: &'a BTreeMap<String, FieldValue>,
    attributes: &'a [ResolvedAttribute],
    variations: &'a [VariationRecord],
}

// 宿主实现 CatalogWriter 时只读访问
impl FinishedRecord {
    pub fn record_index(&self) -> usize {
        self.record_index
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> ProductKind {
        self.kind
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn attributes(&self) -> &[ResolvedAttribute] {
        &self.attributes
    }

    pub fn variations(&self) -> &[VariationRecord] {
        &self.variations
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// 内容哈希（skip_unchanged 判定依据）
    pub fn content_hash(&self) -> String {
        let view = HashView {
            kind: self.kind,
            fields: &self.fields,
            attributes: &self.attributes,
            variations: &self.variations,
        };
        // BTreeMap 键有序,序列化结果稳定
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(title: &str) -> FinishedRecord {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), FieldValue::Text(title.to_string()));
        FinishedRecord {
            record_index: 0,
            identifier: "A1".to_string(),
            kind: ProductKind::Simple,
            fields,
            attributes: Vec::new(),
            variations: Vec::new(),
            warnings: vec!["ignored".to_string()],
        }
    }

    #[test]
    fn test_content_hash_tracks_content_only() {
        let a = finished("Shirt");
        let mut b = finished("Shirt");
        b.record_index = 7;
        b.warnings.clear();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), finished("Shirt v2").content_hash());
    }

    #[test]
    fn test_accessors_expose_finished_content() {
        let record = finished("Shirt");
        assert_eq!(record.identifier(), "A1");
        assert_eq!(record.kind(), ProductKind::Simple);
        assert_eq!(record.fields()["title"], FieldValue::Text("Shirt".to_string()));
        assert!(record.attributes().is_empty());
        assert!(record.variations().is_empty());
        assert_eq!(record.warnings(), ["ignored".to_string()]);
    }
}
