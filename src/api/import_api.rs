// ==========================================
// 商品目录导入引擎 - 导入任务 API
// ==========================================
// 职责: 面向宿主的任务接口（创建/保存配置/执行/暂停/重跑/查询/结构目录/回收站清理）
// 说明: 所有仓储共享同一个 SQLite 连接
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::ConfigurationValidator;
use crate::config::{ConfigManager, EngineConfig};
use crate::db::{configure_sqlite_connection, init_schema, open_sqlite_connection};
use crate::domain::{
    BehaviorFlags, ImportJob, JobConfiguration, JobCounters, JobStatus, RunLogEntry,
    ScheduleDescriptor, SourceDescriptor,
};
use crate::engine::ai::{AiProcessor, AiProviderRegistry, AiResponseCache};
use crate::engine::orchestrator::{BatchOrchestrator, BatchOutcome, Budget, RunOutcome};
use crate::importer::{SourceParser, StructureCatalog, UniversalSourceParser};
use crate::repository::catalog_repo::SqliteCatalogRepository;
use crate::repository::error::RepositoryError;
use crate::repository::job_lock::{JobLockGuard, SqliteJobLock};
use crate::repository::job_repo::{JobStateRepository, SqliteJobRepository};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

/// 创建任务请求（CLI 中的 job.json）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub flags: BehaviorFlags,
    /// 缺省使用引擎配置的默认批大小
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub schedule: ScheduleDescriptor,
    #[serde(default)]
    pub configuration: JobConfiguration,
}

/// 任务状态视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub cursor: usize,
    pub batch_size: usize,
    pub counters: JobCounters,
    pub last_error: Option<String>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub run_log_entries: usize,
}

impl From<&ImportJob> for JobStatusView {
    fn from(job: &ImportJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            name: job.name.clone(),
            status: job.status,
            cursor: job.cursor,
            batch_size: job.batch_size,
            counters: job.counters,
            last_error: job.last_error.clone(),
            run_started_at: job.run_started_at,
            completed_at: job.completed_at,
            run_log_entries: job.run_log.len(),
        }
    }
}

/// 导入任务API
pub struct ImportJobApi {
    config: EngineConfig,
    jobs: Arc<SqliteJobRepository>,
    catalog: Arc<SqliteCatalogRepository>,
    parser: Arc<dyn SourceParser>,
    orchestrator: BatchOrchestrator,
    validator: ConfigurationValidator,
    lock: Arc<SqliteJobLock>,
    /// 配置写入时的锁持有者标识
    holder: String,
}

impl ImportJobApi {
    /// 打开数据库并组装全部组件
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    /// - providers: 宿主注册的 AI 提供方
    pub fn open(db_path: &str, providers: AiProviderRegistry) -> ApiResult<Self> {
        info!("初始化导入 API,数据库路径: {}", db_path);
        let conn = open_sqlite_connection(db_path).map_err(RepositoryError::from)?;
        let conn = Arc::new(Mutex::new(conn));

        let config = ConfigManager::from_connection(conn.clone())?.load_engine_config()?;
        Self::from_connection(conn, config, providers)
    }

    /// 从已有连接组装（测试使用内存库）
    pub fn from_connection(
        conn: Arc<Mutex<Connection>>,
        config: EngineConfig,
        providers: AiProviderRegistry,
    ) -> ApiResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard).map_err(RepositoryError::from)?;
            init_schema(&guard).map_err(RepositoryError::from)?;
        }

        let jobs = Arc::new(SqliteJobRepository::from_connection(conn.clone()));
        let catalog = Arc::new(SqliteCatalogRepository::from_connection(conn.clone()));
        let lock = Arc::new(SqliteJobLock::from_connection(conn));
        let parser: Arc<dyn SourceParser> = Arc::new(UniversalSourceParser);

        let ai = AiProcessor::new(
            providers,
            AiResponseCache::from_settings(&config.ai),
            config.ai.clone(),
        );
        let orchestrator = BatchOrchestrator::new(
            config.clone(),
            parser.clone(),
            jobs.clone(),
            catalog.clone(),
            lock.clone(),
            ai,
        );

        Ok(Self {
            validator: ConfigurationValidator::new(&config),
            config,
            jobs,
            catalog,
            parser,
            orchestrator,
            lock,
            holder: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SqliteCatalogRepository {
        &self.catalog
    }

    /// 创建任务（配置校验不通过时不落库）
    pub fn create_job(&self, request: CreateJobRequest) -> ApiResult<ImportJob> {
        if request.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("任务名称为空".to_string()));
        }
        if request.source.file_path.trim().is_empty() {
            return Err(ApiError::InvalidInput("源文件路径为空".to_string()));
        }
        if request.batch_size == Some(0) {
            return Err(ApiError::InvalidInput("批大小必须大于 0".to_string()));
        }
        self.validator.check(&request.configuration)?;

        let batch_size = request.batch_size.unwrap_or(self.config.default_batch_size);
        let mut job = ImportJob::new(
            request.name,
            request.source,
            request.configuration,
            batch_size,
        );
        job.flags = request.flags;
        job.schedule = request.schedule;
        job.run_log.set_capacity(self.config.run_log_capacity);

        self.jobs.insert(&job)?;
        info!(job_id = %job.job_id, name = %job.name, "导入任务已创建");
        Ok(job)
    }

    /// 保存映射/规则配置
    ///
    /// # 返回
    /// - Err(ApiError::ConfigurationError): 校验失败,不写入
    /// - Err(ApiError::InvalidInput): 任务执行中,配置不可修改
    /// - Err(ApiError::JobBusy): 任务锁被其他执行者持有
    ///
    /// 规则: 状态检查与写入都在任务锁内完成,与批次执行互斥
    pub fn save_configuration(
        &self,
        job_id: &str,
        configuration: &JobConfiguration,
    ) -> ApiResult<()> {
        self.validator.check(configuration)?;

        let _guard = JobLockGuard::try_acquire(
            self.lock.clone(),
            job_id,
            &self.holder,
            self.config.lock_ttl(),
        )?
        .ok_or_else(|| ApiError::JobBusy(job_id.to_string()))?;

        let job = self.jobs.load(job_id)?;
        if job.status == JobStatus::Running {
            return Err(ApiError::InvalidInput(format!(
                "任务 {} 执行中,配置在本轮结束前不可修改",
                job_id
            )));
        }
        self.jobs.save_configuration(job_id, configuration)?;
        info!(job_id = %job_id, mappings = configuration.field_mappings.len(), "任务配置已保存");
        Ok(())
    }

    /// 在预算内执行任务
    pub async fn run_job(&self, job_id: &str, budget: Budget) -> ApiResult<RunOutcome> {
        Ok(self.orchestrator.run_until_budget(job_id, budget).await?)
    }

    /// 只执行一个批次
    pub async fn run_batch(&self, job_id: &str) -> ApiResult<BatchOutcome> {
        Ok(self.orchestrator.run_batch(job_id).await?)
    }

    pub fn pause_job(&self, job_id: &str) -> ApiResult<JobStatusView> {
        let job = self.orchestrator.pause(job_id)?;
        Ok(JobStatusView::from(&job))
    }

    pub fn restart_job(&self, job_id: &str) -> ApiResult<JobStatusView> {
        let job = self.orchestrator.restart(job_id)?;
        Ok(JobStatusView::from(&job))
    }

    pub fn job(&self, job_id: &str) -> ApiResult<ImportJob> {
        Ok(self.jobs.load(job_id)?)
    }

    pub fn job_status(&self, job_id: &str) -> ApiResult<JobStatusView> {
        let job = self.jobs.load(job_id)?;
        Ok(JobStatusView::from(&job))
    }

    pub fn list_jobs(&self) -> ApiResult<Vec<JobStatusView>> {
        Ok(self.jobs.list()?.iter().map(JobStatusView::from).collect())
    }

    /// 运行日志（旧 → 新）
    pub fn run_log(&self, job_id: &str) -> ApiResult<Vec<RunLogEntry>> {
        let job = self.jobs.load(job_id)?;
        Ok(job.run_log.entries().cloned().collect())
    }

    /// 扫描源文件结构（映射配置界面使用）
    pub fn structure_catalog(
        &self,
        source: &SourceDescriptor,
        sample_limit: usize,
    ) -> ApiResult<StructureCatalog> {
        Ok(self.parser.structure_catalog(source, sample_limit)?)
    }

    /// 物理删除超过保留期的回收站记录
    pub fn purge_trash(&self) -> ApiResult<usize> {
        let purged = self
            .catalog
            .purge_trashed(Utc::now(), self.config.trash_retention_days)?;
        if purged > 0 {
            info!(purged, "回收站记录已清理");
        }
        Ok(purged)
    }
}
