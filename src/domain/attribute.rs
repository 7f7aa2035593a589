// ==========================================
// 商品目录导入引擎 - 属性定义与变体记录
// ==========================================
// 说明: 变体记录只由父记录派生,每次运行全量重算,不单独持久化
// 约束: 变体覆写仅允许出现在 used_for_variations = true 的属性上
// ==========================================

use crate::domain::types::StockStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

// ==========================================
// AttributeDefinition - 属性定义
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// 展示名（如 Size / Color）
    pub name: String,

    pub source: AttributeSource,

    #[serde(default)]
    pub used_for_variations: bool,

    #[serde(default = "default_true")]
    pub visible: bool,

    /// 显式绑定时的取值分隔符; 缺省使用引擎配置
    #[serde(default)]
    pub separator: Option<String>,

    /// 变体覆写
    #[serde(default)]
    pub overrides: Vec<VariationOverride>,
}

// ==========================================
// AttributeSource - 取值来源
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeSource {
    /// 显式模板; 结果为列表时直接使用,为文本时按分隔符切分
    Explicit { expression: String },

    /// 重复容器中按位置配对抽取: name_path[i] == 属性名 时取 value_path[i]
    AutoDetect {
        name_path: String,
        value_path: String,
    },
}

// ==========================================
// VariationOverride - 变体覆写
// ==========================================
// 表达式为模板,可引用源路径 {path} 与变体属性值 {@属性名}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariationOverride {
    /// 按属性值调整价格（相对父价格）
    PriceAdjustment { values: BTreeMap<String, Adjustment> },

    /// 按属性值设置/增减库存
    StockAdjustment { values: BTreeMap<String, StockChange> },

    /// 按属性值追加 SKU 后缀
    SkuSuffix { values: BTreeMap<String, String> },

    /// 显式 SKU 映射
    SkuMapping { expression: String },

    Dimensions {
        #[serde(default)]
        weight: Option<String>,
        #[serde(default)]
        length: Option<String>,
        #[serde(default)]
        width: Option<String>,
        #[serde(default)]
        height: Option<String>,
    },

    Status {
        #[serde(default)]
        enabled: Option<bool>,
        #[serde(default)]
        stock_status: Option<StockStatus>,
        #[serde(default)]
        virtual_product: Option<bool>,
        #[serde(default)]
        downloadable: Option<bool>,
    },

    Description { expression: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Adjustment {
    Percent { value: f64 },
    Fixed { value: f64 },
    Absolute { value: f64 },
}

impl Adjustment {
    pub fn apply(&self, base: f64) -> f64 {
        match self {
            Adjustment::Percent { value } => base * (1.0 + value / 100.0),
            Adjustment::Fixed { value } => base + value,
            Adjustment::Absolute { value } => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockChange {
    Set { quantity: i64 },
    Delta { amount: i64 },
}

// ==========================================
// VariationInheritance - 变体继承父记录的字段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariationInheritance {
    #[serde(default = "default_true")]
    pub regular_price: bool,
    #[serde(default = "default_true")]
    pub sale_price: bool,
    #[serde(default)]
    pub stock_quantity: bool,
    #[serde(default = "default_true")]
    pub weight: bool,
    #[serde(default = "default_true")]
    pub dimensions: bool,
    #[serde(default)]
    pub description: bool,
}

impl Default for VariationInheritance {
    fn default() -> Self {
        Self {
            regular_price: true,
            sale_price: true,
            stock_quantity: false,
            weight: true,
            dimensions: true,
            description: false,
        }
    }
}

// ==========================================
// VariationRecord - 变体记录
// ==========================================
// 键: (父标识, 有序属性值元组)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationRecord {
    pub parent_id: String,
    /// (属性名, 属性值),按属性声明顺序
    pub attributes: Vec<(String, String)>,
    pub sku: String,
    pub regular_price: Option<f64>,
    pub sale_price: Option<f64>,
    pub stock_quantity: Option<i64>,
    pub stock_status: StockStatus,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub description: Option<String>,
    pub enabled: bool,
    pub virtual_product: bool,
    pub downloadable: bool,
}

impl VariationRecord {
    pub fn key(&self) -> (&str, Vec<&str>) {
        (
            self.parent_id.as_str(),
            self.attributes.iter().map(|(_, v)| v.as_str()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjustment_apply() {
        assert!((Adjustment::Percent { value: 10.0 }.apply(100.0) - 110.0).abs() < 1e-9);
        assert_eq!(Adjustment::Fixed { value: -5.0 }.apply(100.0), 95.0);
        assert_eq!(Adjustment::Absolute { value: 42.0 }.apply(100.0), 42.0);
    }

    #[test]
    fn test_attribute_deserialize() {
        let json = r#"{
            "name": "Size",
            "source": {"type": "auto_detect", "name_path": "param/@name", "value_path": "param"},
            "used_for_variations": true,
            "overrides": [
                {"type": "sku_suffix", "values": {"S": "SM"}},
                {"type": "price_adjustment", "values": {"L": {"type": "fixed", "value": 5}}}
            ]
        }"#;
        let attr: AttributeDefinition = serde_json::from_str(json).unwrap();
        assert!(attr.used_for_variations);
        assert!(attr.visible);
        assert_eq!(attr.overrides.len(), 2);
    }
}
