// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库初始化、箱位拓扑种子数据、API 装配
// ==========================================

#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::NamedTempFile;
use yard_pool::api::{PlacementApi, PoolApi};
use yard_pool::config::AllocationConfig;
use yard_pool::db::{init_schema, open_sqlite_connection};
use yard_pool::domain::{
    ContainerSize, ContractWindow, CreatePoolRequest, PoolPriority, Stack, YardPosition,
};
use yard_pool::repository::{SqliteAllocationStore, SqliteStackTopology};

pub const YARD: &str = "Y1";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 构造箱位
pub fn make_stack(number: i32, size: ContainerSize, rows: i32, tiers: i32) -> Stack {
    Stack {
        id: format!("s{}", number),
        yard_id: YARD.to_string(),
        stack_number: number,
        section_id: if number < 30 { "A" } else { "B" }.to_string(),
        rows,
        max_tiers: tiers,
        position: Some(YardPosition { x: number, y: 2 }),
        container_size_capability: size,
        is_special_stack: false,
        is_virtual: false,
        current_occupancy: 0,
    }
}

/// 标准测试堆场
///
/// - 1: 特殊箱位（20ft）
/// - 3/5: 40ft 配对（容量 30 / 25）
/// - 7/9: 40ft 配对（容量 16 / 16）
/// - 11, 13: 20ft
pub fn standard_yard() -> Vec<Stack> {
    let mut s1 = make_stack(1, ContainerSize::Feet20, 4, 4);
    s1.is_special_stack = true;
    vec![
        s1,
        make_stack(3, ContainerSize::Feet40, 6, 5),
        make_stack(5, ContainerSize::Feet40, 5, 5),
        make_stack(7, ContainerSize::Feet40, 4, 4),
        make_stack(9, ContainerSize::Feet40, 4, 4),
        make_stack(11, ContainerSize::Feet20, 4, 4),
        make_stack(13, ContainerSize::Feet20, 4, 4),
    ]
}

/// 写入箱位拓扑
pub fn seed_stacks(db_path: &str, stacks: &[Stack]) -> Result<(), Box<dyn Error>> {
    let topology = SqliteStackTopology::new(db_path)?;
    for stack in stacks {
        topology.upsert_stack(stack)?;
    }
    Ok(())
}

/// 基于 SQLite 的 API 装配（每次调用使用独立连接）
pub struct SqliteFixture {
    pub store: Arc<SqliteAllocationStore>,
    pub topology: Arc<SqliteStackTopology>,
    pub pool_api: PoolApi,
    pub placement_api: PlacementApi,
}

pub fn sqlite_fixture(db_path: &str) -> SqliteFixture {
    sqlite_fixture_with_config(db_path, AllocationConfig::default())
}

pub fn sqlite_fixture_with_config(db_path: &str, config: AllocationConfig) -> SqliteFixture {
    let store = Arc::new(SqliteAllocationStore::new(db_path).unwrap());
    let topology = Arc::new(SqliteStackTopology::new(db_path).unwrap());
    SqliteFixture {
        pool_api: PoolApi::new(store.clone(), topology.clone(), config.clone()),
        placement_api: PlacementApi::new(store.clone(), topology.clone(), config),
        store,
        topology,
    }
}

/// 创建客户池请求
pub fn pool_request(client_code: &str, stacks: &[&str]) -> CreatePoolRequest {
    CreatePoolRequest {
        client_id: format!("CID-{}", client_code),
        client_code: client_code.to_string(),
        client_name: format!("{} Logistics", client_code),
        yard_id: YARD.to_string(),
        initial_stacks: stacks.iter().map(|s| s.to_string()).collect(),
        max_capacity: None,
        priority: PoolPriority::High,
        contract: ContractWindow {
            start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end: Some(NaiveDate::from_ymd_opt(2027, 12, 31).unwrap()),
        },
        notes: None,
        operator: "test_user".to_string(),
    }
}
