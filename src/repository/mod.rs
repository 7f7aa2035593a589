// ==========================================
// 商品目录导入引擎 - 数据仓储层
// ==========================================
// 职责: 宿主端口（任务状态 / 任务锁 / 目录写入）及其 SQLite 参考实现
// 约束: 所有查询使用参数化
// 红线: Repository 不含业务逻辑
// ==========================================

pub mod catalog_repo;
pub mod error;
pub mod job_lock;
pub mod job_repo;

// 重导出核心仓储
pub use catalog_repo::{CatalogEntry, CatalogWriter, SqliteCatalogRepository};
pub use error::{CatalogError, CatalogResult, RepositoryError, RepositoryResult};
pub use job_lock::{JobLock, JobLockGuard, SqliteJobLock};
pub use job_repo::{JobStateRepository, SqliteJobRepository};
