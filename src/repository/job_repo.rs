// ==========================================
// 商品目录导入引擎 - 导入任务状态仓储
// ==========================================
// 职责: 任务行（状态/游标/计数器/配置/运行日志）、本轮已见标识、上次产出集合
// 红线: 游标与计数器在同一事务中提交（批次检查点）
//       产出集合在任务完成时与状态一起原子刷新
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::{
    BehaviorFlags, ImportJob, JobConfiguration, JobCounters, JobStatus, RunLog,
    ScheduleDescriptor, SourceDescriptor,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

// ==========================================
// JobStateRepository Trait - 任务状态持久化端口
// ==========================================
pub trait JobStateRepository: Send + Sync {
    fn insert(&self, job: &ImportJob) -> RepositoryResult<()>;

    fn load(&self, job_id: &str) -> RepositoryResult<ImportJob>;

    fn list(&self) -> RepositoryResult<Vec<ImportJob>>;

    /// 更新任务行（不涉及标识集合）
    fn save(&self, job: &ImportJob) -> RepositoryResult<()>;

    fn save_configuration(
        &self,
        job_id: &str,
        configuration: &JobConfiguration,
    ) -> RepositoryResult<()>;

    /// 批次检查点: 任务行 + 本批已见标识,单事务
    fn checkpoint(&self, job: &ImportJob, seen: &[String]) -> RepositoryResult<()>;

    /// 完成: 任务行 + 产出集合 := 本轮已见集合,单事务
    fn complete(&self, job: &ImportJob) -> RepositoryResult<()>;

    /// 重置本轮: 任务行 + 清空已见集合（产出集合保留）
    fn reset_run(&self, job: &ImportJob) -> RepositoryResult<()>;

    /// 仅更新状态为 failed 与错误信息,保留最后一个检查点
    fn mark_failed(&self, job_id: &str, message: &str) -> RepositoryResult<()>;

    fn seen_identifiers(&self, job_id: &str) -> RepositoryResult<BTreeSet<String>>;

    fn produced_identifiers(&self, job_id: &str) -> RepositoryResult<BTreeSet<String>>;
}

const JOB_COLUMNS: &str = "job_id, name, source_json, flags_json, batch_size, schedule_json, status, \
     cursor, seen_count, created_count, updated_count, skipped_count, filtered_count, failed_count, \
     configuration_json, run_log_json, last_error, run_started_at, completed_at, created_at, updated_at";

/// 原始行（JSON 列尚未解析）
struct JobRow {
    job_id: String,
    name: String,
    source_json: String,
    flags_json: String,
    batch_size: i64,
    schedule_json: String,
    status: String,
    cursor: i64,
    counters: [i64; 6],
    configuration_json: String,
    run_log_json: String,
    last_error: Option<String>,
    run_started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            name: row.get(1)?,
            source_json: row.get(2)?,
            flags_json: row.get(3)?,
            batch_size: row.get(4)?,
            schedule_json: row.get(5)?,
            status: row.get(6)?,
            cursor: row.get(7)?,
            counters: [
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
                row.get(11)?,
                row.get(12)?,
                row.get(13)?,
            ],
            configuration_json: row.get(14)?,
            run_log_json: row.get(15)?,
            last_error: row.get(16)?,
            run_started_at: row.get(17)?,
            completed_at: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }

    fn into_job(self) -> RepositoryResult<ImportJob> {
        let corrupt = |message: String| RepositoryError::CorruptState {
            entity: format!("import_job:{}", self.job_id),
            message,
        };
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("未知状态 {}", self.status)))?;
        let cursor = usize::try_from(self.cursor)
            .map_err(|_| corrupt(format!("游标为负: {}", self.cursor)))?;
        let [seen, created, updated, skipped, filtered_out, failed] = self.counters;
        let to_u64 = |v: i64| u64::try_from(v).map_err(|_| corrupt(format!("计数器为负: {}", v)));

        Ok(ImportJob {
            source: serde_json::from_str::<SourceDescriptor>(&self.source_json)?,
            flags: serde_json::from_str::<BehaviorFlags>(&self.flags_json)?,
            batch_size: usize::try_from(self.batch_size.max(1)).unwrap_or(1),
            schedule: serde_json::from_str::<ScheduleDescriptor>(&self.schedule_json)?,
            status,
            cursor,
            counters: JobCounters {
                seen: to_u64(seen)?,
                created: to_u64(created)?,
                updated: to_u64(updated)?,
                skipped: to_u64(skipped)?,
                filtered_out: to_u64(filtered_out)?,
                failed: to_u64(failed)?,
            },
            configuration: serde_json::from_str::<JobConfiguration>(&self.configuration_json)?,
            run_log: serde_json::from_str::<RunLog>(&self.run_log_json)?,
            last_error: self.last_error.clone(),
            run_started_at: parse_optional_ts(self.run_started_at.as_deref())?,
            completed_at: parse_optional_ts(self.completed_at.as_deref())?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            job_id: self.job_id.clone(),
            name: self.name.clone(),
        })
    }
}

fn parse_ts(value: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::CorruptState {
            entity: "timestamp".to_string(),
            message: format!("{}: {}", value, e),
        })
}

fn parse_optional_ts(value: Option<&str>) -> RepositoryResult<Option<DateTime<Utc>>> {
    value.map(parse_ts).transpose()
}

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

/// 更新任务行（可在事务内调用）
///
/// 红线: 不写 configuration_json; 配置只经 insert / save_configuration 落库,
/// 运行中的检查点不得覆盖并发保存的配置
fn update_job_row(conn: &Connection, job: &ImportJob) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"
        UPDATE import_job SET
            name = ?2, source_json = ?3, flags_json = ?4, batch_size = ?5, schedule_json = ?6,
            status = ?7, cursor = ?8,
            seen_count = ?9, created_count = ?10, updated_count = ?11,
            skipped_count = ?12, filtered_count = ?13, failed_count = ?14,
            run_log_json = ?15, last_error = ?16,
            run_started_at = ?17, completed_at = ?18, updated_at = ?19
        WHERE job_id = ?1
        "#,
        params![
            job.job_id,
            job.name,
            serde_json::to_string(&job.source)?,
            serde_json::to_string(&job.flags)?,
            job.batch_size as i64,
            serde_json::to_string(&job.schedule)?,
            job.status.as_str(),
            job.cursor as i64,
            job.counters.seen as i64,
            job.counters.created as i64,
            job.counters.updated as i64,
            job.counters.skipped as i64,
            job.counters.filtered_out as i64,
            job.counters.failed as i64,
            serde_json::to_string(&job.run_log)?,
            job.last_error,
            job.run_started_at.as_ref().map(ts),
            job.completed_at.as_ref().map(ts),
            ts(&job.updated_at),
        ],
    )?;

    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "ImportJob".to_string(),
            id: job.job_id.clone(),
        });
    }
    Ok(())
}

fn identifier_set(conn: &Connection, sql: &str, job_id: &str) -> RepositoryResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([job_id], |row| row.get::<_, String>(0))?;
    let mut set = BTreeSet::new();
    for row in rows {
        set.insert(row?);
    }
    Ok(set)
}

// ==========================================
// SqliteJobRepository - SQLite 实现
// ==========================================
pub struct SqliteJobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl JobStateRepository for SqliteJobRepository {
    fn insert(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO import_job (
                job_id, name, source_json, flags_json, batch_size, schedule_json, status,
                configuration_json, run_log_json, created_at, updated_at
            ) VALUES (?1, ?2, '{}', '{}', 1, '{}', ?3, ?4, '{}', ?5, ?5)
            "#,
            params![
                job.job_id,
                job.name,
                job.status.as_str(),
                serde_json::to_string(&job.configuration)?,
                ts(&job.created_at)
            ],
        )?;
        update_job_row(&tx, job)?;
        tx.commit()?;
        Ok(())
    }

    fn load(&self, job_id: &str) -> RepositoryResult<ImportJob> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM import_job WHERE job_id = ?1", JOB_COLUMNS),
                [job_id],
                JobRow::from_row,
            )
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "ImportJob".to_string(),
                id: job_id.to_string(),
            })?;
        row.into_job()
    }

    fn list(&self) -> RepositoryResult<Vec<ImportJob>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_job ORDER BY created_at, job_id",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map([], JobRow::from_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }

    fn save(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        update_job_row(&conn, job)
    }

    fn save_configuration(
        &self,
        job_id: &str,
        configuration: &JobConfiguration,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE import_job SET configuration_json = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job_id, serde_json::to_string(configuration)?, ts(&Utc::now())],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ImportJob".to_string(),
                id: job_id.to_string(),
            });
        }
        Ok(())
    }

    fn checkpoint(&self, job: &ImportJob, seen: &[String]) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        update_job_row(&tx, job)?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO import_run_seen (job_id, identifier) VALUES (?1, ?2)",
            )?;
            for identifier in seen {
                stmt.execute(params![job.job_id, identifier])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn complete(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        update_job_row(&tx, job)?;
        tx.execute(
            "DELETE FROM import_job_produced WHERE job_id = ?1",
            [&job.job_id],
        )?;
        tx.execute(
            r#"
            INSERT INTO import_job_produced (job_id, identifier)
            SELECT job_id, identifier FROM import_run_seen WHERE job_id = ?1
            "#,
            [&job.job_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn reset_run(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        update_job_row(&tx, job)?;
        tx.execute("DELETE FROM import_run_seen WHERE job_id = ?1", [&job.job_id])?;
        tx.commit()?;
        Ok(())
    }

    fn mark_failed(&self, job_id: &str, message: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE import_job SET status = ?2, last_error = ?3, updated_at = ?4 WHERE job_id = ?1",
            params![job_id, JobStatus::Failed.as_str(), message, ts(&Utc::now())],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ImportJob".to_string(),
                id: job_id.to_string(),
            });
        }
        Ok(())
    }

    fn seen_identifiers(&self, job_id: &str) -> RepositoryResult<BTreeSet<String>> {
        let conn = self.get_conn()?;
        identifier_set(
            &conn,
            "SELECT identifier FROM import_run_seen WHERE job_id = ?1",
            job_id,
        )
    }

    fn produced_identifiers(&self, job_id: &str) -> RepositoryResult<BTreeSet<String>> {
        let conn = self.get_conn()?;
        identifier_set(
            &conn,
            "SELECT identifier FROM import_job_produced WHERE job_id = ?1",
            job_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::configure_sqlite_connection;
    use crate::domain::SourceFormat;

    fn repo() -> SqliteJobRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        SqliteJobRepository::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn job() -> ImportJob {
        ImportJob::new(
            "feed",
            SourceDescriptor {
                file_path: "feed.csv".to_string(),
                format: SourceFormat::Csv,
                container: None,
                delimiter: None,
            },
            JobConfiguration::default(),
            25,
        )
    }

    #[test]
    fn test_insert_and_load_round_trip() {
        let repo = repo();
        let mut job = job();
        job.run_log.warn("hello");
        repo.insert(&job).unwrap();

        let loaded = repo.load(&job.job_id).unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.batch_size, 25);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.run_log.len(), 1);
        assert_eq!(loaded.configuration.identifier_field, "sku");
    }

    #[test]
    fn test_load_missing_job() {
        let repo = repo();
        assert!(matches!(
            repo.load("nope"),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_checkpoint_then_complete_refreshes_produced_set() {
        let repo = repo();
        let mut job = job();
        repo.insert(&job).unwrap();

        job.transition(JobStatus::Running).unwrap();
        job.cursor = 2;
        job.counters.seen = 2;
        repo.checkpoint(&job, &["A".to_string(), "B".to_string()])
            .unwrap();

        let loaded = repo.load(&job.job_id).unwrap();
        assert_eq!(loaded.cursor, 2);
        assert_eq!(loaded.counters.seen, 2);
        assert!(repo.produced_identifiers(&job.job_id).unwrap().is_empty());

        job.transition(JobStatus::Completed).unwrap();
        repo.complete(&job).unwrap();
        let produced = repo.produced_identifiers(&job.job_id).unwrap();
        assert_eq!(produced.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);

        // 重置本轮: 已见集合清空,产出集合保留
        job.restart();
        repo.reset_run(&job).unwrap();
        assert!(repo.seen_identifiers(&job.job_id).unwrap().is_empty());
        assert_eq!(repo.produced_identifiers(&job.job_id).unwrap().len(), 2);
    }

    #[test]
    fn test_mark_failed_keeps_checkpoint() {
        let repo = repo();
        let mut job = job();
        repo.insert(&job).unwrap();
        job.transition(JobStatus::Running).unwrap();
        job.cursor = 10;
        repo.checkpoint(&job, &[]).unwrap();

        repo.mark_failed(&job.job_id, "source unreadable").unwrap();
        let loaded = repo.load(&job.job_id).unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.cursor, 10);
        assert_eq!(loaded.last_error.as_deref(), Some("source unreadable"));
    }

    #[test]
    fn test_checkpoint_keeps_saved_configuration() {
        let repo = repo();
        let mut job = job();
        repo.insert(&job).unwrap();

        let mut updated = job.configuration.clone();
        updated.identifier_field = "code".to_string();
        repo.save_configuration(&job.job_id, &updated).unwrap();

        // 运行中的任务仍持有旧配置快照
        job.transition(JobStatus::Running).unwrap();
        job.cursor = 3;
        repo.checkpoint(&job, &[]).unwrap();
        repo.save(&job).unwrap();

        let loaded = repo.load(&job.job_id).unwrap();
        assert_eq!(loaded.cursor, 3);
        assert_eq!(loaded.configuration.identifier_field, "code");
    }

    #[test]
    fn test_corrupt_configuration_is_reported() {
        let repo = repo();
        let job = job();
        repo.insert(&job).unwrap();
        {
            let conn = repo.get_conn().unwrap();
            conn.execute(
                "UPDATE import_job SET configuration_json = 'not json' WHERE job_id = ?1",
                [&job.job_id],
            )
            .unwrap();
        }
        assert!(matches!(
            repo.load(&job.job_id),
            Err(RepositoryError::CorruptState { .. })
        ));
    }
}
