// ==========================================
// 堆场客户池分配引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::allocation_config::{AllocationConfig, OccupiedReleasePolicy};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    pub const RECOMMEND_MIN_RATIO: &str = "allocation/recommend_min_ratio";
    pub const RECOMMEND_MAX_RATIO: &str = "allocation/recommend_max_ratio";
    pub const FORTY_FT_RECOMMEND_CAPACITY: &str = "allocation/forty_ft_recommend_capacity";
    pub const RETRY_MAX_ATTEMPTS: &str = "store/retry_max_attempts";
    pub const RETRY_BASE_DELAY_MS: &str = "store/retry_base_delay_ms";
    pub const RETRY_MAX_DELAY_MS: &str = "store/retry_max_delay_ms";
    pub const OCCUPIED_RELEASE_POLICY: &str = "pool/occupied_release_policy";
}

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
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
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
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置，缺失或格式错误时回退默认值
    fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>> {
        match self.get_global_config_value(key)? {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "配置值格式错误，使用默认值");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// 加载分配引擎参数
    pub fn load_allocation_config(&self) -> Result<AllocationConfig, Box<dyn Error>> {
        let defaults = AllocationConfig::default();

        let release_policy = match self.get_global_config_value(config_keys::OCCUPIED_RELEASE_POLICY)? {
            Some(raw) => OccupiedReleasePolicy::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "未知的占用释放策略，使用默认值");
                defaults.occupied_release_policy
            }),
            None => defaults.occupied_release_policy,
        };

        let config = AllocationConfig {
            recommend_min_ratio: self
                .get_parsed_or(config_keys::RECOMMEND_MIN_RATIO, defaults.recommend_min_ratio)?,
            recommend_max_ratio: self
                .get_parsed_or(config_keys::RECOMMEND_MAX_RATIO, defaults.recommend_max_ratio)?,
            forty_ft_recommend_capacity: self.get_parsed_or(
                config_keys::FORTY_FT_RECOMMEND_CAPACITY,
                defaults.forty_ft_recommend_capacity,
            )?,
            retry: crate::repository::retry::RetryPolicy {
                max_attempts: self
                    .get_parsed_or(config_keys::RETRY_MAX_ATTEMPTS, defaults.retry.max_attempts)?,
                base_delay_ms: self
                    .get_parsed_or(config_keys::RETRY_BASE_DELAY_MS, defaults.retry.base_delay_ms)?,
                max_delay_ms: self
                    .get_parsed_or(config_keys::RETRY_MAX_DELAY_MS, defaults.retry.max_delay_ms)?,
            },
            occupied_release_policy: release_policy,
        };

        if config.recommend_min_ratio > config.recommend_max_ratio {
            return Err(format!(
                "推荐占用率区间非法: [{}, {}]",
                config.recommend_min_ratio, config.recommend_max_ratio
            )
            .into());
        }

        tracing::debug!(?config, "分配引擎参数已加载");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_defaults_when_empty() {
        let manager = setup();
        let config = manager.load_allocation_config().unwrap();
        assert_eq!(config, AllocationConfig::default());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let manager = setup();
        manager
            .set_global_config_value(config_keys::FORTY_FT_RECOMMEND_CAPACITY, "30")
            .unwrap();
        manager
            .set_global_config_value(config_keys::RETRY_MAX_ATTEMPTS, "not-a-number")
            .unwrap();
        manager
            .set_global_config_value(config_keys::OCCUPIED_RELEASE_POLICY, "release")
            .unwrap();

        let config = manager.load_allocation_config().unwrap();
        assert_eq!(config.forty_ft_recommend_capacity, 30);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.occupied_release_policy, OccupiedReleasePolicy::Release);
    }

    #[test]
    fn test_inverted_band_rejected() {
        let manager = setup();
        manager
            .set_global_config_value(config_keys::RECOMMEND_MIN_RATIO, "0.9")
            .unwrap();
        assert!(manager.load_allocation_config().is_err());
    }
}
