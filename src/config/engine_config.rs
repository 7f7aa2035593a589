// ==========================================
// 商品目录导入引擎 - 引擎配置对象
// ==========================================
// 说明: 构造引擎组件时显式传入,流水线中不做全局配置查找
// ==========================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ==========================================
// AiSettings - AI 调用与缓存配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSettings {
    /// 默认提供方（映射未指定时使用）
    pub default_provider: Option<String>,
    /// 单次调用超时（毫秒）
    pub timeout_ms: u64,
    /// 首次调用失败后的最大重试次数
    pub max_retries: u32,
    /// 退避基数（毫秒）,按 2^attempt 增长
    pub backoff_base_ms: u64,
    /// 退避上限（毫秒）
    pub backoff_max_ms: u64,
    /// 响应缓存 TTL（秒）
    pub cache_ttl_secs: u64,
    /// 响应缓存容量（条）
    pub cache_capacity: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            default_provider: None,
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            cache_ttl_secs: 86_400,
            cache_capacity: 10_000,
        }
    }
}

impl AiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// 第 attempt 次失败后的退避时长（attempt 从 0 起）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(16));
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

// ==========================================
// EngineConfig - 引擎配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 新建任务的默认批大小
    pub default_batch_size: usize,
    /// 公式文本长度上限（保存时校验）
    pub formula_max_length: usize,
    /// 运行日志容量
    pub run_log_capacity: usize,
    /// 任务锁租约时长（秒）
    pub lock_ttl_secs: u64,
    /// 属性显式绑定的默认取值分隔符
    pub attribute_separator: String,
    /// 回收站保留天数（之后物理删除）
    pub trash_retention_days: i64,
    pub ai: AiSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 50,
            formula_max_length: 4_096,
            run_log_capacity: 200,
            lock_ttl_secs: 600,
            attribute_separator: "|".to_string(),
            trash_retention_days: 30,
            ai: AiSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let ai = AiSettings {
            backoff_base_ms: 500,
            backoff_max_ms: 3_000,
            ..AiSettings::default()
        };

        assert_eq!(ai.backoff(0), Duration::from_millis(500));
        assert_eq!(ai.backoff(1), Duration::from_millis(1_000));
        assert_eq!(ai.backoff(2), Duration::from_millis(2_000));
        assert_eq!(ai.backoff(3), Duration::from_millis(3_000));
        assert_eq!(ai.backoff(30), Duration::from_millis(3_000));
    }
}
