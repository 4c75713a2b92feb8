// ==========================================
// 堆场客户池分配引擎 - SQLite 箱位拓扑
// ==========================================
// 表: yard_stack
// 红线: 占用只允许原子增量（回填迁移除外），不做读后覆写
// ==========================================

use crate::domain::stack::{Stack, YardPosition};
use crate::domain::types::ContainerSize;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stack_topology::StackTopology;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};

const STACK_COLUMNS: &str = r#"
    stack_id, yard_id, stack_number, section_id, row_count, max_tiers,
    container_size, is_special, is_virtual, position_x, position_y, current_occupancy
"#;

pub struct SqliteStackTopology {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStackTopology {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 占用原子增量（下限 0）
    fn add_occupancy(conn: &Connection, stack_id: &str, delta: i32) -> RepositoryResult<i32> {
        let occupancy: Option<i32> = conn
            .query_row(
                r#"
                UPDATE yard_stack
                SET current_occupancy = MAX(0, current_occupancy + ?1)
                WHERE stack_id = ?2
                RETURNING current_occupancy
                "#,
                params![delta, stack_id],
                |row| row.get(0),
            )
            .optional()?;
        occupancy.ok_or_else(|| RepositoryError::not_found("Stack", stack_id))
    }

    /// 写入/覆盖箱位定义（拓扑同步与测试夹具使用）
    pub fn upsert_stack(&self, stack: &Stack) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO yard_stack (
                stack_id, yard_id, stack_number, section_id, row_count, max_tiers,
                container_size, is_special, is_virtual, position_x, position_y, current_occupancy
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(stack_id) DO UPDATE SET
                yard_id = excluded.yard_id,
                stack_number = excluded.stack_number,
                section_id = excluded.section_id,
                row_count = excluded.row_count,
                max_tiers = excluded.max_tiers,
                container_size = excluded.container_size,
                is_special = excluded.is_special,
                is_virtual = excluded.is_virtual,
                position_x = excluded.position_x,
                position_y = excluded.position_y
            "#,
            params![
                stack.id,
                stack.yard_id,
                stack.stack_number,
                stack.section_id,
                stack.rows,
                stack.max_tiers,
                stack.container_size_capability.as_str(),
                stack.is_special_stack,
                stack.is_virtual,
                stack.position.map(|p| p.x),
                stack.position.map(|p| p.y),
                stack.current_occupancy.max(0),
            ],
        )?;
        Ok(())
    }

    fn map_stack(row: &Row) -> rusqlite::Result<Stack> {
        let size_raw: String = row.get(6)?;
        let container_size_capability = ContainerSize::parse(&size_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                Type::Text,
                format!("未知箱型: {}", size_raw).into(),
            )
        })?;
        let x: Option<i32> = row.get(9)?;
        let y: Option<i32> = row.get(10)?;

        Ok(Stack {
            id: row.get(0)?,
            yard_id: row.get(1)?,
            stack_number: row.get(2)?,
            section_id: row.get(3)?,
            rows: row.get(4)?,
            max_tiers: row.get(5)?,
            position: x.zip(y).map(|(x, y)| YardPosition { x, y }),
            container_size_capability,
            is_special_stack: row.get(7)?,
            is_virtual: row.get(8)?,
            current_occupancy: row.get(11)?,
        })
    }
}

impl StackTopology for SqliteStackTopology {
    fn list_stacks(&self, yard_id: Option<&str>) -> RepositoryResult<Vec<Stack>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM yard_stack WHERE (?1 IS NULL OR yard_id = ?1) ORDER BY yard_id, stack_number",
            STACK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let stacks = stmt
            .query_map(params![yard_id], Self::map_stack)?
            .collect::<rusqlite::Result<Vec<Stack>>>()?;
        Ok(stacks)
    }

    fn find_stack(&self, stack_id: &str) -> RepositoryResult<Option<Stack>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM yard_stack WHERE stack_id = ?1", STACK_COLUMNS);
        Ok(conn
            .query_row(&sql, params![stack_id], Self::map_stack)
            .optional()?)
    }

    fn find_by_number(&self, yard_id: &str, stack_number: i32) -> RepositoryResult<Option<Stack>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM yard_stack WHERE yard_id = ?1 AND stack_number = ?2",
            STACK_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![yard_id, stack_number], Self::map_stack)
            .optional()?)
    }

    fn apply_occupancy_delta(&self, stack_id: &str, delta: i32) -> RepositoryResult<i32> {
        let conn = self.get_conn()?;
        Self::add_occupancy(&conn, stack_id, delta)
    }

    fn apply_occupancy_deltas(
        &self,
        stack_ids: &[String],
        delta: i32,
    ) -> RepositoryResult<Vec<(String, i32)>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut updated = Vec::with_capacity(stack_ids.len());
        for stack_id in stack_ids {
            // 任一失败时 tx 被丢弃，已写入的成员一并回滚
            let occupancy = Self::add_occupancy(&tx, stack_id, delta)?;
            updated.push((stack_id.clone(), occupancy));
        }
        tx.commit()?;
        Ok(updated)
    }

    fn backfill_occupancy(&self, stack_id: &str, occupancy: i32) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE yard_stack SET current_occupancy = ?1 WHERE stack_id = ?2",
            params![occupancy.max(0), stack_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Stack", stack_id));
        }
        Ok(())
    }
}
