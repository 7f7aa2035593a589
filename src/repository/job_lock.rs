// ==========================================
// 商品目录导入引擎 - 任务级互斥锁（租约）
// ==========================================
// 职责: 同一任务同一时刻只允许一个调用推进批次
// 实现: import_job_lock 表 + 过期时间; 过期租约可被抢占
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

// ==========================================
// JobLock Trait - 任务锁端口
// ==========================================
pub trait JobLock: Send + Sync {
    /// 尝试获取租约; 同一 holder 重复获取视为续约
    fn acquire(&self, job_id: &str, holder: &str, ttl: Duration) -> RepositoryResult<bool>;

    fn release(&self, job_id: &str, holder: &str) -> RepositoryResult<()>;
}

// ==========================================
// JobLockGuard - 作用域结束时释放
// ==========================================
pub struct JobLockGuard {
    lock: Arc<dyn JobLock>,
    job_id: String,
    holder: String,
}

impl JobLockGuard {
    /// 获取失败返回 Ok(None)
    pub fn try_acquire(
        lock: Arc<dyn JobLock>,
        job_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> RepositoryResult<Option<Self>> {
        if !lock.acquire(job_id, holder, ttl)? {
            return Ok(None);
        }
        Ok(Some(Self {
            lock,
            job_id: job_id.to_string(),
            holder: holder.to_string(),
        }))
    }
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.job_id, &self.holder) {
            warn!(job_id = %self.job_id, error = %e, "任务锁释放失败,等待租约过期");
        }
    }
}

// ==========================================
// SqliteJobLock - SQLite 租约实现
// ==========================================
pub struct SqliteJobLock {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobLock {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl JobLock for SqliteJobLock {
    fn acquire(&self, job_id: &str, holder: &str, ttl: Duration) -> RepositoryResult<bool> {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| RepositoryError::InternalError(format!("租约时长无效: {}", e)))?;
        let expires_at = (now + ttl).to_rfc3339();

        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT holder, expires_at FROM import_job_lock WHERE job_id = ?1",
                [job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let acquirable = match &current {
            None => true,
            Some((current_holder, _)) if current_holder == holder => true,
            Some((_, expires)) => DateTime::parse_from_rfc3339(expires)
                .map(|dt| dt.with_timezone(&Utc) <= now)
                // 无法解析的租约视为已过期
                .unwrap_or(true),
        };

        if acquirable {
            tx.execute(
                r#"
                INSERT INTO import_job_lock (job_id, holder, expires_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(job_id) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
                "#,
                params![job_id, holder, expires_at],
            )?;
        }
        tx.commit()?;
        Ok(acquirable)
    }

    fn release(&self, job_id: &str, holder: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM import_job_lock WHERE job_id = ?1 AND holder = ?2",
            params![job_id, holder],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn lock() -> Arc<SqliteJobLock> {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        Arc::new(SqliteJobLock::from_connection(Arc::new(Mutex::new(conn))))
    }

    #[test]
    fn test_lock_is_exclusive_until_released() {
        let lock = lock();
        let ttl = Duration::from_secs(60);

        assert!(lock.acquire("job-1", "a", ttl).unwrap());
        assert!(!lock.acquire("job-1", "b", ttl).unwrap());
        // 不同任务互不影响
        assert!(lock.acquire("job-2", "b", ttl).unwrap());
        // 续约
        assert!(lock.acquire("job-1", "a", ttl).unwrap());

        lock.release("job-1", "a").unwrap();
        assert!(lock.acquire("job-1", "b", ttl).unwrap());
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let lock = lock();
        assert!(lock.acquire("job-1", "a", Duration::from_secs(0)).unwrap());
        assert!(lock.acquire("job-1", "b", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = lock();
        let ttl = Duration::from_secs(60);
        {
            let guard = JobLockGuard::try_acquire(lock.clone(), "job-1", "a", ttl).unwrap();
            assert!(guard.is_some());
            assert!(JobLockGuard::try_acquire(lock.clone(), "job-1", "b", ttl)
                .unwrap()
                .is_none());
        }
        assert!(lock.acquire("job-1", "b", ttl).unwrap());
    }
}
