// ==========================================
// 堆场客户池分配引擎 - 应用状态
// ==========================================
// 职责: 从数据库路径装配存储适配器、配置与 API 实例
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{PlacementApi, PoolApi};
use crate::config::{AllocationConfig, ConfigManager};
use crate::db::{init_schema, open_sqlite_connection};
use crate::importer::OccupancyBackfill;
use crate::repository::{
    AllocationStore, SqliteAllocationStore, SqliteStackTopology, StackTopology,
};

/// 应用状态
///
/// 所有适配器共享同一个连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 生效的分配参数
    pub config: AllocationConfig,

    /// 客户池API
    pub pool_api: Arc<PoolApi>,

    /// 落箱API
    pub placement_api: Arc<PlacementApi>,

    /// 占用回填（一次性迁移）
    pub occupancy_backfill: Arc<OccupancyBackfill>,

    pub config_manager: Arc<ConfigManager>,
    pub stack_topology: Arc<SqliteStackTopology>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        init_schema(&conn).map_err(|e| format!("建表失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // 配置
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let config = config_manager
            .load_allocation_config()
            .map_err(|e| format!("分配参数加载失败: {}", e))?;
        tracing::info!(?config, "分配参数已加载");

        // 存储适配器
        let stack_topology = Arc::new(SqliteStackTopology::from_connection(conn.clone()));
        let store: Arc<dyn AllocationStore> =
            Arc::new(SqliteAllocationStore::from_connection(conn.clone()));
        let topology: Arc<dyn StackTopology> = stack_topology.clone();

        // API
        let pool_api = Arc::new(PoolApi::new(store.clone(), topology.clone(), config.clone()));
        let placement_api = Arc::new(PlacementApi::new(
            store.clone(),
            topology.clone(),
            config.clone(),
        ));
        let occupancy_backfill = Arc::new(OccupancyBackfill::new(topology, store));

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path,
            config,
            pool_api,
            placement_api,
            occupancy_backfill,
            config_manager,
            stack_topology,
        })
    }
}

/// 默认数据库路径
///
/// 优先使用环境变量 YARD_POOL_DB_PATH，否则放在用户数据目录下
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("YARD_POOL_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./yard_pool.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("yard-pool-allocation");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("yard_pool.db");
        }
    }

    path.to_string_lossy().to_string()
}
