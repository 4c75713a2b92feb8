// ==========================================
// 堆场客户池分配引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 统一建表，保证独占归属的部分唯一索引存在
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS yard_stack (
            stack_id TEXT PRIMARY KEY,
            yard_id TEXT NOT NULL,
            stack_number INTEGER NOT NULL,
            section_id TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            max_tiers INTEGER NOT NULL,
            container_size TEXT NOT NULL,
            is_special INTEGER NOT NULL DEFAULT 0,
            is_virtual INTEGER NOT NULL DEFAULT 0,
            position_x INTEGER,
            position_y INTEGER,
            current_occupancy INTEGER NOT NULL DEFAULT 0 CHECK (current_occupancy >= 0),
            UNIQUE (yard_id, stack_number)
        );

        CREATE TABLE IF NOT EXISTS client_pool (
            pool_id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            client_code TEXT NOT NULL,
            client_name TEXT NOT NULL,
            yard_id TEXT NOT NULL,
            assigned_stacks_json TEXT NOT NULL DEFAULT '[]',
            max_capacity INTEGER NOT NULL DEFAULT 0,
            current_occupancy INTEGER NOT NULL DEFAULT 0 CHECK (current_occupancy >= 0),
            priority TEXT NOT NULL,
            contract_start TEXT NOT NULL,
            contract_end TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            created_by TEXT NOT NULL,
            updated_by TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS ux_client_pool_active_code
            ON client_pool (client_code) WHERE is_active = 1;

        CREATE TABLE IF NOT EXISTS stack_assignment (
            assignment_id TEXT PRIMARY KEY,
            stack_id TEXT NOT NULL,
            stack_number INTEGER NOT NULL,
            pool_id TEXT NOT NULL,
            client_code TEXT NOT NULL,
            is_exclusive INTEGER NOT NULL DEFAULT 1,
            priority TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            assigned_at TEXT NOT NULL,
            assigned_by TEXT NOT NULL,
            revoked_at TEXT
        );

        -- 每个箱位最多一条有效独占分配
        CREATE UNIQUE INDEX IF NOT EXISTS ux_stack_assignment_exclusive
            ON stack_assignment (stack_id) WHERE is_exclusive = 1 AND is_active = 1;

        CREATE INDEX IF NOT EXISTS ix_stack_assignment_pool
            ON stack_assignment (pool_id, is_active);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
