// ==========================================
// 商品目录导入引擎 - 批次编排器
// ==========================================
// 用途: 驱动导入任务状态机,逐批推进游标,完成时触发缺失记录对账
// 状态机: pending → running ⇄ paused → completed, 任意 → failed
// 红线: 游标 + 计数器 + 本批可见标识在同一事务提交（检查点）
// 红线: 同一任务同一时刻只允许一个调用（任务锁）
// ==========================================

use crate::config::EngineConfig;
use crate::domain::{
    CatalogStatus, ImportJob, ImportRecordResult, JobConfiguration, JobCounters, JobStatus,
    RecordDisposition, SourceRecord, StateTransitionError, WriteOutcome,
};
use crate::engine::ai::AiProcessor;
use crate::engine::error::{JobError, JobResult};
use crate::engine::filter::FilterEvaluator;
use crate::engine::pricing::PricingEngine;
use crate::engine::processing::ProcessingPipeline;
use crate::engine::reconcile::{MissingRecordReconciler, ReconciliationReport};
use crate::engine::stages::FinishedRecord;
use crate::engine::variation::VariationBuilder;
use crate::importer::SourceParser;
use crate::repository::catalog_repo::CatalogWriter;
use crate::repository::error::RepositoryError;
use crate::repository::job_lock::{JobLock, JobLockGuard};
use crate::repository::job_repo::JobStateRepository;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

// ==========================================
// Budget - 单次调用的执行预算
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Budget {
    pub max_batches: Option<usize>,
    pub max_duration: Option<Duration>,
}

impl Budget {
    /// 不限,直到源结束
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn batches(max_batches: usize) -> Self {
        Self {
            max_batches: Some(max_batches.max(1)),
            max_duration: None,
        }
    }

    pub fn duration(max_duration: Duration) -> Self {
        Self {
            max_batches: None,
            max_duration: Some(max_duration),
        }
    }

    fn exhausted(&self, batches: usize, started: Instant) -> bool {
        self.max_batches.map_or(false, |max| batches >= max)
            || self.max_duration.map_or(false, |max| started.elapsed() >= max)
    }
}

// ==========================================
// BatchOutcome - 单批结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub job_id: String,
    pub status: JobStatus,
    /// 本批之后的游标
    pub cursor: usize,
    /// 本批读取的记录数
    pub read: usize,
    /// 本批增量计数
    pub counters: JobCounters,
    pub results: Vec<ImportRecordResult>,
    pub reconciliation: Option<ReconciliationReport>,
}

impl BatchOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

// ==========================================
// RunOutcome - 一次预算调用的结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub batches: usize,
    pub cursor: usize,
    /// 任务累计计数
    pub counters: JobCounters,
    pub reconciliation: Option<ReconciliationReport>,
}

// ==========================================
// JobPipeline - 按任务配置构建的阶段集合
// ==========================================
struct JobPipeline {
    filter: FilterEvaluator,
    processing: ProcessingPipeline,
    pricing: PricingEngine,
    variations: VariationBuilder,
    identifier_field: String,
    /// update_on_sync = false 的字段
    protected_fields: BTreeSet<String>,
}

impl JobPipeline {
    fn build(config: &EngineConfig, job: &JobConfiguration, ai: AiProcessor) -> JobResult<Self> {
        let identifier_field = job.identifier_field.trim();
        if identifier_field.is_empty() {
            return Err(JobError::InvalidConfiguration("标识字段为空".to_string()));
        }
        if job.mapping(identifier_field).is_none() {
            return Err(JobError::InvalidConfiguration(format!(
                "标识字段 {} 没有映射",
                identifier_field
            )));
        }

        Ok(Self {
            filter: FilterEvaluator::new(&job.filters),
            processing: ProcessingPipeline::new(config, &job.field_mappings, ai),
            pricing: PricingEngine::new(&job.pricing),
            variations: VariationBuilder::new(
                &job.attributes,
                job.variation_inheritance,
                config.attribute_separator.clone(),
            ),
            identifier_field: identifier_field.to_string(),
            protected_fields: job
                .field_mappings
                .iter()
                .filter(|m| !m.update_on_sync)
                .map(|m| m.target.clone())
                .collect(),
        })
    }
}

// ==========================================
// BatchOrchestrator - 批次编排器
// ==========================================
pub struct BatchOrchestrator {
    config: EngineConfig,
    parser: Arc<dyn SourceParser>,
    jobs: Arc<dyn JobStateRepository>,
    catalog: Arc<dyn CatalogWriter>,
    lock: Arc<dyn JobLock>,
    ai: AiProcessor,
    /// 本实例的锁持有者标识
    holder: String,
}

impl BatchOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - config: 引擎配置（显式传入,运行中不再查找全局配置）
    /// - parser: 源解析端口
    /// - jobs / catalog / lock: 宿主持久化端口
    /// - ai: AI 加工器（响应缓存在多个任务间共享）
    pub fn new(
        config: EngineConfig,
        parser: Arc<dyn SourceParser>,
        jobs: Arc<dyn JobStateRepository>,
        catalog: Arc<dyn CatalogWriter>,
        lock: Arc<dyn JobLock>,
        ai: AiProcessor,
    ) -> Self {
        Self {
            config,
            parser,
            jobs,
            catalog,
            lock,
            ai,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn acquire(&self, job_id: &str) -> JobResult<JobLockGuard> {
        JobLockGuard::try_acquire(
            self.lock.clone(),
            job_id,
            &self.holder,
            self.config.lock_ttl(),
        )?
        .ok_or_else(|| JobError::LockNotAcquired {
            job_id: job_id.to_string(),
        })
    }

    fn load(&self, job_id: &str) -> JobResult<ImportJob> {
        self.jobs.load(job_id).map_err(|e| match e {
            RepositoryError::NotFound { .. } => JobError::NotFound(job_id.to_string()),
            other => other.into(),
        })
    }

    /// 致命错误: 写入 failed + last_error,保留最后一个检查点
    fn fail(&self, job_id: &str, err: &JobError) {
        if !err.marks_job_failed() {
            return;
        }
        error!(job_id = %job_id, error = %err, "导入任务失败");
        if let Err(e) = self.jobs.mark_failed(job_id, &err.to_string()) {
            error!(job_id = %job_id, error = %e, "任务失败状态写入失败");
        }
    }

    fn ensure_runnable(job: &ImportJob) -> JobResult<()> {
        if job.is_terminal() {
            return Err(StateTransitionError {
                from: job.status,
                to: JobStatus::Running,
            }
            .into());
        }
        Ok(())
    }

    /// 执行一个批次
    ///
    /// # 返回
    /// - Ok(BatchOutcome): 本批结果; 读到源末尾时 status = Completed
    /// - Err(JobError): 致命错误（锁未获取时不改写任务状态）
    #[instrument(skip(self), fields(holder = %self.holder))]
    pub async fn run_batch(&self, job_id: &str) -> JobResult<BatchOutcome> {
        let _guard = self.acquire(job_id)?;
        let mut job = self.load(job_id)?;
        Self::ensure_runnable(&job)?;

        match self.execute_batch(&mut job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(job_id, &e);
                Err(e)
            }
        }
    }

    /// 在预算内连续执行批次
    ///
    /// 预算用尽且未完成时任务转 paused,下次调用从检查点继续
    #[instrument(skip(self), fields(holder = %self.holder))]
    pub async fn run_until_budget(&self, job_id: &str, budget: Budget) -> JobResult<RunOutcome> {
        let _guard = self.acquire(job_id)?;
        let mut job = self.load(job_id)?;
        Self::ensure_runnable(&job)?;

        let started = Instant::now();
        let mut batches = 0;
        let mut reconciliation = None;

        loop {
            let outcome = match self.execute_batch(&mut job).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.fail(job_id, &e);
                    return Err(e);
                }
            };
            batches += 1;

            if outcome.is_completed() {
                reconciliation = outcome.reconciliation;
                break;
            }
            if budget.exhausted(batches, started) {
                job.transition(JobStatus::Paused)?;
                self.jobs.save(&job)?;
                info!(
                    job_id = %job_id,
                    batches,
                    cursor = job.cursor,
                    "执行预算用尽,任务暂停"
                );
                break;
            }
        }

        Ok(RunOutcome {
            job_id: job.job_id.clone(),
            status: job.status,
            batches,
            cursor: job.cursor,
            counters: job.counters,
            reconciliation,
        })
    }

    /// 宿主发起的暂停（批次边界）
    #[instrument(skip(self))]
    pub fn pause(&self, job_id: &str) -> JobResult<ImportJob> {
        let _guard = self.acquire(job_id)?;
        let mut job = self.load(job_id)?;
        if job.status == JobStatus::Paused {
            return Ok(job);
        }
        job.transition(JobStatus::Paused)?;
        self.jobs.save(&job)?;
        info!(job_id = %job_id, cursor = job.cursor, "任务已暂停");
        Ok(job)
    }

    /// 从头重跑: 游标与计数清零,本轮可见集合清空,上次产出集合保留
    #[instrument(skip(self))]
    pub fn restart(&self, job_id: &str) -> JobResult<ImportJob> {
        let _guard = self.acquire(job_id)?;
        let mut job = self.load(job_id)?;
        job.restart();
        self.jobs.reset_run(&job)?;
        info!(job_id = %job_id, "任务已重置为待执行");
        Ok(job)
    }

    // ==========================================
    // 批次内部流程
    // ==========================================

    /// 进入 running
    fn begin(&self, job: &mut ImportJob) -> JobResult<()> {
        match job.status {
            JobStatus::Pending => {
                job.transition(JobStatus::Running)?;
                job.run_started_at = Some(Utc::now());
                job.last_error = None;
                job.run_log.set_capacity(self.config.run_log_capacity);
                job.run_log.reset_warnings();
                // 清空上一轮残留的可见集合
                self.jobs.reset_run(job)?;
                info!(job_id = %job.job_id, "导入任务开始");
            }
            JobStatus::Paused => {
                job.transition(JobStatus::Running)?;
                info!(job_id = %job.job_id, cursor = job.cursor, "导入任务从检查点继续");
            }
            // 上次调用在批次中途中断,从检查点继续
            JobStatus::Running => {}
            JobStatus::Completed | JobStatus::Failed => {
                return Err(StateTransitionError {
                    from: job.status,
                    to: JobStatus::Running,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn execute_batch(&self, job: &mut ImportJob) -> JobResult<BatchOutcome> {
        let pipeline = JobPipeline::build(&self.config, &job.configuration, self.ai.clone())?;
        self.begin(job)?;

        // 非法正则每轮执行只报告一次
        for warning in pipeline.filter.warnings() {
            if job.run_log.warn_once(&warning.key, warning.message.clone()) {
                warn!(job_id = %job.job_id, "{}", warning.message);
            }
        }
        for message in pipeline.pricing.warnings() {
            if job
                .run_log
                .warn_once(&format!("pricing:{}", message), message.clone())
            {
                warn!(job_id = %job.job_id, "{}", message);
            }
        }

        let batch = self
            .parser
            .read_batch(&job.source, job.cursor, job.batch_size)
            .map_err(JobError::SourceUnreadable)?;
        debug!(
            job_id = %job.job_id,
            offset = job.cursor,
            read = batch.read_count(),
            exhausted = batch.exhausted,
            "读取批次"
        );

        let mut counters = JobCounters::default();
        let mut seen = Vec::new();
        let mut results = Vec::with_capacity(batch.records.len());

        // 批内按源顺序逐条处理
        for record in &batch.records {
            let result = self.process_record(job, &pipeline, record, &mut seen).await;
            counters.record(result.disposition);
            job.run_log.record_result(&result);
            results.push(result);
        }
        counters.seen = batch.read_count() as u64;

        job.counters.merge(&counters);
        job.cursor += batch.read_count();
        job.updated_at = Utc::now();
        self.jobs.checkpoint(job, &seen)?;

        info!(
            job_id = %job.job_id,
            cursor = job.cursor,
            created = counters.created,
            updated = counters.updated,
            skipped = counters.skipped,
            filtered_out = counters.filtered_out,
            failed = counters.failed,
            "批次检查点已提交"
        );

        let reconciliation = if batch.exhausted {
            Some(self.complete(job)?)
        } else {
            None
        };

        Ok(BatchOutcome {
            job_id: job.job_id.clone(),
            status: job.status,
            cursor: job.cursor,
            read: batch.read_count(),
            counters,
            results,
            reconciliation,
        })
    }

    /// 源读完: 对账后标记完成,产出集合在同一事务内刷新
    ///
    /// 对账与完成之间中断时,任务仍为 running,重试会再次对账（处置可重复执行）
    fn complete(&self, job: &mut ImportJob) -> JobResult<ReconciliationReport> {
        let produced = self.jobs.produced_identifiers(&job.job_id)?;
        let seen = self.jobs.seen_identifiers(&job.job_id)?;

        let report = MissingRecordReconciler::new(self.catalog.as_ref()).reconcile(
            &job.job_id,
            &produced,
            &seen,
            &job.configuration.reconciliation,
        );
        for (identifier, err) in &report.failed {
            job.run_log
                .warn(format!("缺失记录 {} 处置失败: {}", identifier, err));
        }

        job.transition(JobStatus::Completed)?;
        job.completed_at = Some(Utc::now());
        self.jobs.complete(job)?;

        info!(
            job_id = %job.job_id,
            seen = job.counters.seen,
            created = job.counters.created,
            updated = job.counters.updated,
            failed = job.counters.failed,
            "导入任务完成"
        );
        Ok(report)
    }

    /// 单条记录: 过滤 → 映射 → 加工 → 定价 → 变体 → 写入
    async fn process_record(
        &self,
        job: &ImportJob,
        pipeline: &JobPipeline,
        record: &SourceRecord,
        seen: &mut Vec<String>,
    ) -> ImportRecordResult {
        if let Some(defect) = record.defect() {
            warn!(job_id = %job.job_id, record_index = record.index, "源记录不可读: {}", defect);
            return ImportRecordResult::failed(record.index, None, defect.to_string());
        }

        let Some(admitted) = pipeline.filter.admit(record) else {
            return self.handle_filtered(job, pipeline, record, seen).await;
        };

        let mapped = pipeline.processing.map(admitted);
        let processed = pipeline.processing.process(mapped).await;
        let priced = pipeline.pricing.apply(
            processed,
            &pipeline.identifier_field,
            pipeline.processing.coercer(),
        );
        let finished = match pipeline.variations.finish(
            priced,
            &pipeline.identifier_field,
            pipeline.processing.coercer(),
        ) {
            Ok(finished) => finished,
            Err(e) => {
                warn!(job_id = %job.job_id, record_index = record.index, error = %e, "记录缺少标识");
                return ImportRecordResult::failed(record.index, None, e.to_string());
            }
        };

        seen.push(finished.identifier.clone());
        self.write(job, pipeline, finished)
    }

    fn write(
        &self,
        job: &ImportJob,
        pipeline: &JobPipeline,
        finished: FinishedRecord,
    ) -> ImportRecordResult {
        let mut result = ImportRecordResult::new(finished.record_index, RecordDisposition::Created);
        result.identifier = Some(finished.identifier.clone());
        result.warnings = finished.warnings.clone();

        let existing = match self.catalog.find(&finished.identifier) {
            Ok(existing) => existing,
            Err(e) => return self.write_failed(job, result, e.to_string()),
        };

        if let Some(existing) = &existing {
            if !job.flags.update_existing {
                result.disposition = RecordDisposition::Skipped;
                return result;
            }
            // 草稿/回收站中的记录即使内容未变也要重新发布
            if job.flags.skip_unchanged
                && existing.status == CatalogStatus::Published
                && existing.content_hash == finished.content_hash()
            {
                result.disposition = RecordDisposition::Skipped;
                return result;
            }
        }

        match self
            .catalog
            .write_record(&job.job_id, &finished, &pipeline.protected_fields)
        {
            Ok(WriteOutcome::Created) => result.disposition = RecordDisposition::Created,
            Ok(WriteOutcome::Updated) => result.disposition = RecordDisposition::Updated,
            Err(e) => return self.write_failed(job, result, e.to_string()),
        }
        result
    }

    fn write_failed(
        &self,
        job: &ImportJob,
        mut result: ImportRecordResult,
        message: String,
    ) -> ImportRecordResult {
        warn!(
            job_id = %job.job_id,
            identifier = result.identifier.as_deref().unwrap_or(""),
            error = %message,
            "目录写入失败"
        );
        result.disposition = RecordDisposition::Error;
        result.error = Some(message);
        result
    }

    /// 未通过过滤的记录
    ///
    /// draft_non_matching 开启时,本任务产出的已有记录转草稿,并计入本轮可见集合
    /// （已转草稿的记录不再参与缺失处置）
    async fn handle_filtered(
        &self,
        job: &ImportJob,
        pipeline: &JobPipeline,
        record: &SourceRecord,
        seen: &mut Vec<String>,
    ) -> ImportRecordResult {
        let mut result = ImportRecordResult::new(record.index, RecordDisposition::FilteredOut);
        if !job.flags.draft_non_matching {
            return result;
        }

        let identifier = pipeline
            .processing
            .process_single(&pipeline.identifier_field, record)
            .await
            .map(|v| v.as_text().trim().to_string())
            .filter(|s| !s.is_empty());
        let Some(identifier) = identifier else {
            return result;
        };
        result.identifier = Some(identifier.clone());

        match MissingRecordReconciler::new(self.catalog.as_ref())
            .draft_non_matching(&job.job_id, &identifier)
        {
            Ok(true) => {
                debug!(job_id = %job.job_id, identifier = %identifier, "不满足过滤条件,已转草稿");
                seen.push(identifier);
            }
            Ok(false) => {}
            Err(e) => result
                .warnings
                .push(format!("记录 {} 转草稿失败: {}", identifier, e)),
        }
        result
    }
}
