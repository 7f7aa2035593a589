// ==========================================
// 商品目录导入引擎 - 引擎层错误类型
// ==========================================
// ProcessingError: 字段级,除 ConfigurationError 外均降级为回退值 + 警告
// JobError: 任务级致命错误,任务转 failed 并停止
// ==========================================

use crate::domain::StateTransitionError;
use crate::importer::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 字段加工错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("公式调用了未授权函数: {function}")]
    FormulaSandboxViolation { function: String },

    #[error("公式语法错误 (位置 {position}): {message}")]
    FormulaSyntaxError { position: usize, message: String },

    #[error("公式执行失败: {0}")]
    FormulaRuntimeError(String),

    #[error("AI 提供方超时: provider={provider}, timeout_ms={timeout_ms}")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("AI 提供方错误: provider={provider}: {message}")]
    ProviderError { provider: String, message: String },

    #[error("配置错误: {0}")]
    ConfigurationError(String),
}

impl ProcessingError {
    /// 是否为字段级可回退错误
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProcessingError::ConfigurationError(_))
    }
}

pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// 任务级致命错误
#[derive(Error, Debug)]
pub enum JobError {
    #[error("源文件不可读: {0}")]
    SourceUnreadable(#[source] ImportError),

    #[error("任务锁获取失败: job_id={job_id}")]
    LockNotAcquired { job_id: String },

    #[error("任务状态损坏: {0}")]
    StateCorrupt(String),

    #[error("任务配置无效: {0}")]
    InvalidConfiguration(String),

    #[error("任务不存在: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<RepositoryError> for JobError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::CorruptState { entity, message } => {
                JobError::StateCorrupt(format!("{}: {}", entity, message))
            }
            other => JobError::Repository(other),
        }
    }
}

impl JobError {
    /// 是否应将任务标记为 failed
    ///
    /// 锁未获取时调用方并不拥有任务状态,不写 failed
    pub fn marks_job_failed(&self) -> bool {
        !matches!(self, JobError::LockNotAcquired { .. } | JobError::NotFound(_))
    }
}

pub type JobResult<T> = Result<T, JobError>;
