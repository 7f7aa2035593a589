// ==========================================
// 商品目录导入引擎 - 配置管理器
// ==========================================
// 职责: 从 config_kv 表加载 EngineConfig,支持写回
// 存储: config_kv 表 (scope_id + key → value)
// ==========================================

use crate::config::engine_config::{AiSettings, EngineConfig};
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
            crate::db::init_schema(&guard)?;
        }

        Ok(Self { conn })
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有 global 配置的快照
    pub fn get_config_snapshot(&self) -> RepositoryResult<BTreeMap<String, String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    /// 读取并解析配置值; 缺失或格式错误时回退到默认值
    fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> RepositoryResult<T> {
        match self.get_global_config_value(key)? {
            None => Ok(default),
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(config_key = key, raw_value = %raw, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
        }
    }

    /// 加载引擎配置
    ///
    /// # 返回
    /// - EngineConfig: 缺失的键取默认值
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        let defaults = EngineConfig::default();
        let ai_defaults = AiSettings::default();

        let default_provider = self
            .get_global_config_value(config_keys::AI_DEFAULT_PROVIDER)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(EngineConfig {
            default_batch_size: self
                .get_parsed(config_keys::DEFAULT_BATCH_SIZE, defaults.default_batch_size)?
                .max(1),
            formula_max_length: self
                .get_parsed(config_keys::FORMULA_MAX_LENGTH, defaults.formula_max_length)?,
            run_log_capacity: self
                .get_parsed(config_keys::RUN_LOG_CAPACITY, defaults.run_log_capacity)?
                .max(1),
            lock_ttl_secs: self.get_parsed(config_keys::LOCK_TTL_SECS, defaults.lock_ttl_secs)?,
            attribute_separator: self
                .get_global_config_value(config_keys::ATTRIBUTE_SEPARATOR)?
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.attribute_separator),
            trash_retention_days: self
                .get_parsed(config_keys::TRASH_RETENTION_DAYS, defaults.trash_retention_days)?,
            ai: AiSettings {
                default_provider,
                timeout_ms: self.get_parsed(config_keys::AI_TIMEOUT_MS, ai_defaults.timeout_ms)?,
                max_retries: self.get_parsed(config_keys::AI_MAX_RETRIES, ai_defaults.max_retries)?,
                backoff_base_ms: self
                    .get_parsed(config_keys::AI_BACKOFF_BASE_MS, ai_defaults.backoff_base_ms)?,
                backoff_max_ms: self
                    .get_parsed(config_keys::AI_BACKOFF_MAX_MS, ai_defaults.backoff_max_ms)?,
                cache_ttl_secs: self
                    .get_parsed(config_keys::AI_CACHE_TTL_SECS, ai_defaults.cache_ttl_secs)?,
                cache_capacity: self
                    .get_parsed(config_keys::AI_CACHE_CAPACITY, ai_defaults.cache_capacity)?,
            },
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 批处理
    pub const DEFAULT_BATCH_SIZE: &str = "default_batch_size";
    pub const RUN_LOG_CAPACITY: &str = "run_log_capacity";
    pub const LOCK_TTL_SECS: &str = "lock_ttl_secs";

    // 映射与加工
    pub const FORMULA_MAX_LENGTH: &str = "formula_max_length";
    pub const ATTRIBUTE_SEPARATOR: &str = "attribute_separator";

    // AI 加工
    pub const AI_DEFAULT_PROVIDER: &str = "ai_default_provider";
    pub const AI_TIMEOUT_MS: &str = "ai_timeout_ms";
    pub const AI_MAX_RETRIES: &str = "ai_max_retries";
    pub const AI_BACKOFF_BASE_MS: &str = "ai_backoff_base_ms";
    pub const AI_BACKOFF_MAX_MS: &str = "ai_backoff_max_ms";
    pub const AI_CACHE_TTL_SECS: &str = "ai_cache_ttl_secs";
    pub const AI_CACHE_CAPACITY: &str = "ai_cache_capacity";

    // 对账
    pub const TRASH_RETENTION_DAYS: &str = "trash_retention_days";
}
