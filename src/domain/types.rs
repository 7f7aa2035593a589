// ==========================================
// 商品目录导入引擎 - 领域类型定义
// ==========================================
// 职责: 任务状态、过滤运算符、处置动作等枚举
// 红线: 配置中的所有分支均为带标签枚举,解析时穷举匹配
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 导入任务状态 (Job Status)
// ==========================================
// 状态机: pending → running ⇄ paused → completed, running → failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,   // 待执行
    Running,   // 执行中
    Paused,    // 已暂停（批次边界）
    Completed, // 已完成
    Failed,    // 失败（保留最后一个检查点）
}

impl JobStatus {
    /// 判断状态转换是否合法
    ///
    /// # 规则
    /// - pending → running
    /// - running → running / paused / completed / failed
    /// - paused → running / failed
    /// - 任意状态 → failed（源文件不可读、配置非法）
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (_, Failed) => true,
            (Pending, Running) => true,
            (Running, Running) | (Running, Paused) | (Running, Completed) => true,
            (Paused, Running) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "PAUSED" => Some(JobStatus::Paused),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 源文件格式 (Source Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Csv,
    Xml,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Csv => write!(f, "CSV"),
            SourceFormat::Xml => write!(f, "XML"),
        }
    }
}

// ==========================================
// 目标字段族 (Field Family)
// ==========================================
// 决定: 是否走定价规则、混合模式默认执行顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldFamily {
    Price,      // 价格字段（regular_price / sale_price / price）
    Identifier, // 标识字段（sku）
    Stock,      // 库存字段
    Content,    // 文案字段（标题/描述）
    Other,
}

impl FieldFamily {
    /// 由目标字段 key 推导字段族
    pub fn of(target_key: &str) -> Self {
        match target_key {
            "regular_price" | "sale_price" | "price" => FieldFamily::Price,
            "sku" => FieldFamily::Identifier,
            "stock_quantity" | "stock" => FieldFamily::Stock,
            "title" | "name" | "description" | "short_description" | "excerpt" => {
                FieldFamily::Content
            }
            _ => FieldFamily::Other,
        }
    }

    /// 混合模式默认先执行的阶段
    ///
    /// - 文案字段: 先公式清洗,再交给 AI 改写
    /// - 其他字段: 先由 AI 抽取,再用公式规整
    pub fn default_hybrid_first(self) -> HybridStage {
        match self {
            FieldFamily::Content => HybridStage::Formula,
            _ => HybridStage::Ai,
        }
    }
}

// ==========================================
// 混合模式阶段 (Hybrid Stage)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HybridStage {
    Formula,
    Ai,
}

// ==========================================
// 目标值类型 (Target Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetKind {
    #[default]
    Text,
    Number,
    Boolean,
    List,
}

// ==========================================
// 过滤规则连接词 (Connective)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Connective {
    #[default]
    And,
    Or,
}

// ==========================================
// 过滤运算符 (Filter Operator)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    Contains,
    NotContains,
    Empty,
    NotEmpty,
    RegexMatch,
    RegexNotMatch,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOperator::Equals => "=",
            FilterOperator::NotEquals => "!=",
            FilterOperator::Greater => ">",
            FilterOperator::Less => "<",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "not_contains",
            FilterOperator::Empty => "empty",
            FilterOperator::NotEmpty => "not_empty",
            FilterOperator::RegexMatch => "regex_match",
            FilterOperator::RegexNotMatch => "regex_not_match",
        };
        write!(f, "{}", s)
    }
}

// ==========================================
// 单条记录处理结果 (Record Disposition)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordDisposition {
    Created,
    Updated,
    Skipped,
    FilteredOut,
    Error,
}

impl fmt::Display for RecordDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordDisposition::Created => write!(f, "CREATED"),
            RecordDisposition::Updated => write!(f, "UPDATED"),
            RecordDisposition::Skipped => write!(f, "SKIPPED"),
            RecordDisposition::FilteredOut => write!(f, "FILTERED_OUT"),
            RecordDisposition::Error => write!(f, "ERROR"),
        }
    }
}

// ==========================================
// 缺失记录处置动作 (Disposition Action)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispositionAction {
    Draft,           // 转为草稿
    MarkOutOfStock,  // 标记缺货
    AllowBackorder,  // 允许预订
    Trash,           // 软删除（保留期后物理删除）
    PermanentDelete, // 立即物理删除
}

impl fmt::Display for DispositionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispositionAction::Draft => write!(f, "DRAFT"),
            DispositionAction::MarkOutOfStock => write!(f, "MARK_OUT_OF_STOCK"),
            DispositionAction::AllowBackorder => write!(f, "ALLOW_BACKORDER"),
            DispositionAction::Trash => write!(f, "TRASH"),
            DispositionAction::PermanentDelete => write!(f, "PERMANENT_DELETE"),
        }
    }
}

// ==========================================
// 库存状态 (Stock Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    #[default]
    Instock,
    Outofstock,
    Onbackorder,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Instock => "instock",
            StockStatus::Outofstock => "outofstock",
            StockStatus::Onbackorder => "onbackorder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instock" => Some(StockStatus::Instock),
            "outofstock" => Some(StockStatus::Outofstock),
            "onbackorder" => Some(StockStatus::Onbackorder),
            _ => None,
        }
    }
}

// ==========================================
// 目录记录发布状态 (Catalog Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogStatus {
    #[default]
    Published,
    Draft,
    Trash,
}

impl CatalogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogStatus::Published => "PUBLISHED",
            CatalogStatus::Draft => "DRAFT",
            CatalogStatus::Trash => "TRASH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUBLISHED" => Some(CatalogStatus::Published),
            "DRAFT" => Some(CatalogStatus::Draft),
            "TRASH" => Some(CatalogStatus::Trash),
            _ => None,
        }
    }
}

// ==========================================
// 商品类型 (Product Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductKind {
    Simple,
    Variable,
}

// ==========================================
// 写入结果 (Write Outcome)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteOutcome {
    Created,
    Updated,
}
