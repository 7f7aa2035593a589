// ==========================================
// 商品目录导入引擎 - 导入任务
// ==========================================
// 职责: 任务身份、源描述、行为开关、状态、游标、计数器、运行日志
// 约束: 游标与计数器必须在同一次持久化更新中提交
// ==========================================

use crate::domain::attribute::{AttributeDefinition, VariationInheritance};
use crate::domain::filter::FilterRule;
use crate::domain::mapping::FieldMapping;
use crate::domain::pricing::PricingRuleSet;
use crate::domain::record::ImportRecordResult;
use crate::domain::types::{DispositionAction, JobStatus, RecordDisposition, SourceFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;

fn default_true() -> bool {
    true
}

fn default_identifier_field() -> String {
    "sku".to_string()
}

fn default_run_log_capacity() -> usize {
    200
}

// ==========================================
// SourceDescriptor - 源描述
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub file_path: String,
    pub format: SourceFormat,
    /// XML 记录容器元素名（如 product / offer）
    #[serde(default)]
    pub container: Option<String>,
    /// CSV 分隔符,缺省为逗号
    #[serde(default)]
    pub delimiter: Option<char>,
}

// ==========================================
// BehaviorFlags - 行为开关
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorFlags {
    /// 已存在记录是否更新
    #[serde(default = "default_true")]
    pub update_existing: bool,
    /// 内容未变化时跳过写入
    #[serde(default)]
    pub skip_unchanged: bool,
    /// 不再满足过滤条件的已有记录转草稿
    #[serde(default)]
    pub draft_non_matching: bool,
}

impl Default for BehaviorFlags {
    fn default() -> Self {
        Self {
            update_existing: true,
            skip_unchanged: false,
            draft_non_matching: false,
        }
    }
}

// ==========================================
// ScheduleDescriptor - 调度描述（由宿主解释）
// ==========================================
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleDescriptor {
    #[default]
    Manual,
    Interval { minutes: u32 },
    Cron { expression: String },
}

// ==========================================
// JobCounters - 聚合计数器
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobCounters {
    /// 已读取的源记录数（含被过滤的）
    pub seen: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub filtered_out: u64,
    pub failed: u64,
}

impl JobCounters {
    pub fn record(&mut self, disposition: RecordDisposition) {
        match disposition {
            RecordDisposition::Created => self.created += 1,
            RecordDisposition::Updated => self.updated += 1,
            RecordDisposition::Skipped => self.skipped += 1,
            RecordDisposition::FilteredOut => self.filtered_out += 1,
            RecordDisposition::Error => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &JobCounters) {
        self.seen += other.seen;
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.filtered_out += other.filtered_out;
        self.failed += other.failed;
    }
}

// ==========================================
// ReconciliationPolicy - 缺失记录处置策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    /// None 表示不处理缺失记录
    #[serde(default)]
    pub missing: Option<DispositionAction>,
}

// ==========================================
// JobConfiguration - 任务配置（JSON 持久化）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfiguration {
    /// 作为 upsert 键的目标字段
    #[serde(default = "default_identifier_field")]
    pub identifier_field: String,

    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,

    #[serde(default)]
    pub filters: Vec<FilterRule>,

    #[serde(default)]
    pub pricing: PricingRuleSet,

    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,

    #[serde(default)]
    pub variation_inheritance: VariationInheritance,

    #[serde(default)]
    pub reconciliation: ReconciliationPolicy,
}

impl Default for JobConfiguration {
    fn default() -> Self {
        Self {
            identifier_field: default_identifier_field(),
            field_mappings: Vec::new(),
            filters: Vec::new(),
            pricing: PricingRuleSet::default(),
            attributes: Vec::new(),
            variation_inheritance: VariationInheritance::default(),
            reconciliation: ReconciliationPolicy::default(),
        }
    }
}

impl JobConfiguration {
    pub fn mapping(&self, target: &str) -> Option<&FieldMapping> {
        self.field_mappings.iter().find(|m| m.target == target)
    }
}

// ==========================================
// RunLog - 运行日志（有界,淘汰最旧）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub record_index: Option<usize>,
    pub identifier: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    #[serde(default = "default_run_log_capacity")]
    capacity: usize,
    #[serde(default)]
    entries: VecDeque<RunLogEntry>,
    /// warn_once 去重键（每轮执行内只报告一次）
    #[serde(default)]
    warned_keys: BTreeSet<String>,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::with_capacity(default_run_log_capacity())
    }
}

impl RunLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            warned_keys: BTreeSet::new(),
        }
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }

    pub fn push(&mut self, entry: RunLogEntry) {
        self.entries.push_back(entry);
        self.evict();
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(RunLogEntry {
            at: Utc::now(),
            level: LogLevel::Warning,
            record_index: None,
            identifier: None,
            message: message.into(),
        });
    }

    /// 按 key 去重的警告; 首次写入返回 true
    pub fn warn_once(&mut self, key: &str, message: impl Into<String>) -> bool {
        if !self.warned_keys.insert(key.to_string()) {
            return false;
        }
        self.warn(message);
        true
    }

    /// 新一轮开始时调用: 去重只在一轮内生效,日志条目保留
    pub fn reset_warnings(&mut self) {
        self.warned_keys.clear();
    }

    /// 将单条记录结果中的错误与警告写入日志
    pub fn record_result(&mut self, result: &ImportRecordResult) {
        let now = Utc::now();
        for warning in &result.warnings {
            self.push(RunLogEntry {
                at: now,
                level: LogLevel::Warning,
                record_index: Some(result.record_index),
                identifier: result.identifier.clone(),
                message: warning.clone(),
            });
        }
        if let Some(error) = &result.error {
            self.push(RunLogEntry {
                at: now,
                level: LogLevel::Error,
                record_index: Some(result.record_index),
                identifier: result.identifier.clone(),
                message: error.clone(),
            });
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &RunLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

// ==========================================
// ImportJob - 导入任务
// ==========================================
#[derive(Debug, Error, PartialEq, Eq)]
#[error("无效的状态转换: from={from} to={to}")]
pub struct StateTransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub job_id: String,
    pub name: String,
    pub source: SourceDescriptor,
    pub flags: BehaviorFlags,
    pub batch_size: usize,
    pub schedule: ScheduleDescriptor,
    pub status: JobStatus,
    /// 已读取的源记录数（下一批从此处开始）
    pub cursor: usize,
    pub counters: JobCounters,
    pub configuration: JobConfiguration,
    pub run_log: RunLog,
    pub last_error: Option<String>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(
        name: impl Into<String>,
        source: SourceDescriptor,
        configuration: JobConfiguration,
        batch_size: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            source,
            flags: BehaviorFlags::default(),
            batch_size: batch_size.max(1),
            schedule: ScheduleDescriptor::Manual,
            status: JobStatus::Pending,
            cursor: 0,
            counters: JobCounters::default(),
            configuration,
            run_log: RunLog::default(),
            last_error: None,
            run_started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 执行状态转换
    pub fn transition(&mut self, to: JobStatus) -> Result<(), StateTransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(StateTransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 重置为待执行（从头重跑）
    ///
    /// 说明: 上次完成时的产出集合由仓储保留,用于本轮对账
    pub fn restart(&mut self) {
        self.status = JobStatus::Pending;
        self.cursor = 0;
        self.counters = JobCounters::default();
        self.last_error = None;
        self.run_started_at = None;
        self.completed_at = None;
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}
