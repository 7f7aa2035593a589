// ==========================================
// 商品目录导入引擎 - API 层
// ==========================================
// 职责: 面向宿主的业务接口,配置保存校验
// ==========================================

pub mod error;
pub mod import_api;
pub mod validator;

// 重导出核心类型
pub use error::{ApiError, ApiResult, ValidationViolation};
pub use import_api::{CreateJobRequest, ImportJobApi, JobStatusView};
pub use validator::ConfigurationValidator;
