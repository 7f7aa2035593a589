// ==========================================
// 商品目录导入引擎 - 领域模型层
// ==========================================
// 职责: 定义任务、映射、规则、属性、记录等领域实体与类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod attribute;
pub mod filter;
pub mod job;
pub mod mapping;
pub mod pricing;
pub mod record;
pub mod types;

// 重导出核心类型
pub use attribute::{
    Adjustment, AttributeDefinition, AttributeSource, StockChange, VariationInheritance,
    VariationOverride, VariationRecord,
};
pub use filter::FilterRule;
pub use job::{
    BehaviorFlags, ImportJob, JobConfiguration, JobCounters, LogLevel, ReconciliationPolicy,
    RunLog, RunLogEntry, ScheduleDescriptor, SourceDescriptor, StateTransitionError,
};
pub use mapping::{AiSpec, FieldMapping, ProcessingMode, SourceExpression};
pub use pricing::{PricingCondition, PricingOutputs, PricingRule, PricingRuleSet, RoundingMode};
pub use record::{FieldValue, ImportRecordResult, SourceRecord};
pub use types::{
    CatalogStatus, Connective, DispositionAction, FieldFamily, FilterOperator, HybridStage,
    JobStatus, ProductKind, RecordDisposition, SourceFormat, StockStatus, TargetKind,
    WriteOutcome,
};
