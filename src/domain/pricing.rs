// ==========================================
// 商品目录导入引擎 - 定价规则
// ==========================================
// 规则: 首条命中生效; 隐式默认规则永远最后评估且无条件
// 约束: min_price ≤ max_price（两者均设置时）
// ==========================================

use crate::domain::types::{Connective, FilterOperator};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_step() -> f64 {
    1.0
}

// ==========================================
// PricingRuleSet - 定价规则集
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PricingRuleSet {
    /// 按声明顺序评估的条件规则
    #[serde(default)]
    pub rules: Vec<PricingRule>,

    /// 隐式默认规则（无条件）
    #[serde(default)]
    pub default_rule: PricingOutputs,
}

// ==========================================
// PricingRule - 条件定价规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 条件之间的连接逻辑（AND / OR）
    #[serde(default)]
    pub logic: Connective,

    /// 0..n 条件; 为空时视为命中
    #[serde(default)]
    pub conditions: Vec<PricingCondition>,

    pub outputs: PricingOutputs,
}

// ==========================================
// PricingCondition - 条件类型
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingCondition {
    /// 基础价区间（闭区间,缺省端不限）
    PriceRange {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },

    /// 分类命中任一（不区分大小写）
    Category { values: Vec<String> },

    Brand { values: Vec<String> },

    Supplier { values: Vec<String> },

    /// 任意源字段比较（与过滤运算符一致）
    Field {
        path: String,
        operator: FilterOperator,
        #[serde(default)]
        value: String,
    },

    /// SKU 通配符（* / ?）
    SkuPattern { pattern: String },
}

// ==========================================
// PricingOutputs - 定价输出
// ==========================================
// 计算顺序固定: 加价 → 固定加额 → 取整 → 钳制
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PricingOutputs {
    #[serde(default)]
    pub markup_percent: f64,

    #[serde(default)]
    pub fixed_amount: f64,

    #[serde(default)]
    pub rounding: RoundingMode,

    #[serde(default)]
    pub min_price: Option<f64>,

    #[serde(default)]
    pub max_price: Option<f64>,
}

// ==========================================
// RoundingMode - 取整方式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    None,

    /// 四舍五入到 step 的整数倍（如 0.10）
    Increment { step: f64 },

    /// 尾数定价: 向下取到 step 单位后强制小数尾数（如 .99 / .95）
    Charm {
        ending: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
}
