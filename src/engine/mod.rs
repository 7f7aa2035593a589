// ==========================================
// 商品目录导入引擎 - 引擎层
// ==========================================
// 职责: 过滤、映射、加工、定价、变体、批次编排与对账
// 顺序: 过滤 → 映射 → 加工 → 定价 → 变体 → 写入
// 红线: Engine 不拼 SQL,持久化只经由仓储端口
// ==========================================

pub mod ai;
pub mod error;
pub mod expression;
pub mod filter;
pub mod formula;
pub mod orchestrator;
pub mod pricing;
pub mod processing;
pub mod reconcile;
pub mod stages;
pub mod variation;

// 重导出核心引擎
pub use ai::{AiProcessor, AiProvider, AiProviderRegistry, AiRequest, AiResponseCache};
pub use error::{JobError, JobResult, ProcessingError, ProcessingResult};
pub use expression::MappingResolver;
pub use filter::{FilterEvaluator, FilterWarning};
pub use formula::FormulaEngine;
pub use orchestrator::{BatchOrchestrator, BatchOutcome, Budget, RunOutcome};
pub use pricing::{PricingContext, PricingDecision, PricingEngine};
pub use processing::ProcessingPipeline;
pub use reconcile::{missing_identifiers, MissingRecordReconciler, ReconciliationReport};
pub use stages::{FinishedRecord, ResolvedAttribute};
pub use variation::{MissingIdentifier, VariationBuilder};
