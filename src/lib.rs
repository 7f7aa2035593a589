// ==========================================
// 商品目录导入引擎 - 核心库
// ==========================================
// 职责: 把 XML/CSV 源记录映射为目录记录（加工、定价、变体）,分批断点续跑
// 技术栈: Rust + SQLite（宿主端口参考实现）
// 定位: 执行引擎,调度/传输/界面由宿主负责
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 宿主端口与 SQLite 实现
pub mod repository;

// 引擎层 - 过滤/映射/加工/定价/变体/编排/对账
pub mod engine;

// 导入层 - 源文件解析
pub mod importer;

// 配置层 - 引擎配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 宿主接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    DispositionAction, JobStatus, RecordDisposition, SourceFormat,
};

// 领域实体
pub use domain::{
    FieldMapping, FilterRule, ImportJob, ImportRecordResult, JobConfiguration, PricingRule,
    SourceRecord, VariationRecord,
};

// 引擎
pub use engine::{
    BatchOrchestrator, Budget, FilterEvaluator, MissingRecordReconciler, PricingEngine,
    ProcessingPipeline, VariationBuilder,
};

// API
pub use api::{ImportJobApi, JobStatusView};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "商品目录导入引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
