// ==========================================
// 商品目录导入引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型,把仓储/引擎/解析错误转换为面向宿主的错误消息
// ==========================================

use crate::engine::error::JobError;
use crate::importer::ImportError;
use crate::repository::error::{CatalogError, RepositoryError};
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 配置错误（保存时校验）
    // ==========================================
    /// 保存被拒绝,未写入任何内容
    #[error("配置校验失败: {reason}")]
    ConfigurationError {
        reason: String,
        violations: Vec<ValidationViolation>,
    },

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 执行错误
    // ==========================================
    #[error("任务正在被其他调用执行: {0}")]
    JobBusy(String),

    #[error("导入任务失败: {0}")]
    JobFailed(String),

    #[error("源文件读取失败: {0}")]
    SourceError(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("持久化状态损坏: {0}")]
    CorruptState(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            RepositoryError::CorruptState { entity, message } => {
                ApiError::CorruptState(format!("{}: {}", entity, message))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::DatabaseError(format!("外键约束违反: {}", msg))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Repository(e) => e.into(),
            CatalogError::NotFound(id) => ApiError::NotFound(format!("目录记录(id={})不存在", id)),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        ApiError::SourceError(err.to_string())
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::LockNotAcquired { job_id } => ApiError::JobBusy(job_id),
            JobError::NotFound(job_id) => {
                ApiError::NotFound(format!("ImportJob(id={})不存在", job_id))
            }
            JobError::InvalidTransition(e) => ApiError::InvalidStateTransition {
                from: e.from.to_string(),
                to: e.to.to_string(),
            },
            JobError::SourceUnreadable(e) => ApiError::SourceError(e.to_string()),
            JobError::StateCorrupt(msg) => ApiError::CorruptState(msg),
            JobError::Repository(e) => e.into(),
            other => ApiError::JobFailed(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

// ==========================================
// 校验违规详情
// ==========================================

/// 校验违规详情
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationViolation {
    /// 违规类型（FORMULA / AI / PRICING / ATTRIBUTE / FILTER / IDENTIFIER）
    pub violation_type: String,
    /// 定位（映射目标字段 / 规则 id / 属性名）
    pub location: String,
    /// 违规原因
    pub reason: String,
}

impl ValidationViolation {
    pub fn new(
        violation_type: &str,
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            violation_type: violation_type.to_string(),
            location: location.into(),
            reason: reason.into(),
        }
    }
}
