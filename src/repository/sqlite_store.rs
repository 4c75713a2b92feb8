// ==========================================
// 堆场客户池分配引擎 - SQLite 客户池/分配台账存储
// ==========================================
// 表: client_pool / stack_assignment（见 db::init_schema）
// 约束: client_pool(client_code) WHERE is_active=1 唯一
//       stack_assignment(stack_id) WHERE is_exclusive=1 AND is_active=1 唯一
// 并发: 写操作使用 BEGIN IMMEDIATE，独占归属通过条件插入 + 部分唯一索引双重保证
// ==========================================

use crate::domain::assignment::StackAssignment;
use crate::domain::pool::{ClientPool, ContractWindow};
use crate::domain::types::PoolPriority;
use crate::repository::allocation_store::AllocationStore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Local;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const POOL_COLUMNS: &str = r#"
    pool_id, client_id, client_code, client_name, yard_id, assigned_stacks_json,
    max_capacity, current_occupancy, priority, contract_start, contract_end,
    is_active, notes, created_at, updated_at, created_by, updated_by
"#;

const ASSIGNMENT_COLUMNS: &str = r#"
    assignment_id, stack_id, stack_number, pool_id, client_code,
    is_exclusive, priority, assigned_at, assigned_by
"#;

// ==========================================
// SqliteAllocationStore
// ==========================================
pub struct SqliteAllocationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAllocationStore {
    /// 创建新的存储实例（打开独立连接）
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建存储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 行映射 =====

    fn map_pool(row: &Row) -> rusqlite::Result<ClientPool> {
        let stacks_json: String = row.get(5)?;
        let assigned_stacks: BTreeSet<String> = serde_json::from_str(&stacks_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        let priority_raw: String = row.get(8)?;

        Ok(ClientPool {
            id: row.get(0)?,
            client_id: row.get(1)?,
            client_code: row.get(2)?,
            client_name: row.get(3)?,
            yard_id: row.get(4)?,
            assigned_stacks,
            max_capacity: row.get(6)?,
            current_occupancy: row.get(7)?,
            priority: parse_priority(8, &priority_raw)?,
            contract: ContractWindow {
                start: row.get(9)?,
                end: row.get(10)?,
            },
            is_active: row.get(11)?,
            notes: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
            created_by: row.get(15)?,
            updated_by: row.get(16)?,
        })
    }

    fn map_assignment(row: &Row) -> rusqlite::Result<StackAssignment> {
        let priority_raw: String = row.get(6)?;
        Ok(StackAssignment {
            id: row.get(0)?,
            stack_id: row.get(1)?,
            stack_number: row.get(2)?,
            pool_id: row.get(3)?,
            client_code: row.get(4)?,
            is_exclusive: row.get(5)?,
            priority: parse_priority(6, &priority_raw)?,
            assigned_at: row.get(7)?,
            assigned_by: row.get(8)?,
        })
    }

    // ===== 事务内操作（接收 &Connection，Transaction 可解引用） =====

    fn load_pool(conn: &Connection, pool_id: &str) -> RepositoryResult<Option<ClientPool>> {
        let sql = format!("SELECT {} FROM client_pool WHERE pool_id = ?1", POOL_COLUMNS);
        Ok(conn
            .query_row(&sql, params![pool_id], Self::map_pool)
            .optional()?)
    }

    fn write_assigned_stacks(
        conn: &Connection,
        pool_id: &str,
        stacks: &BTreeSet<String>,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE client_pool SET assigned_stacks_json = ?1, updated_at = ?2 WHERE pool_id = ?3",
            params![
                serde_json::to_string(stacks)?,
                Local::now().naive_local(),
                pool_id
            ],
        )?;
        Ok(())
    }

    /// 条件插入分配记录
    ///
    /// # 返回
    /// - Ok(true): 已插入
    /// - Ok(false): 同池已有有效分配（幂等）
    /// - Err(ExclusiveAssignmentConflict): 他池持有冲突分配
    fn insert_assignment_if_free(
        conn: &Connection,
        assignment: &StackAssignment,
    ) -> RepositoryResult<bool> {
        let inserted = conn
            .execute(
                r#"
                INSERT INTO stack_assignment (
                    assignment_id, stack_id, stack_number, pool_id, client_code,
                    is_exclusive, priority, is_active, assigned_at, assigned_by
                )
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9
                WHERE NOT EXISTS (
                    SELECT 1 FROM stack_assignment
                    WHERE stack_id = ?2
                      AND is_active = 1
                      AND (pool_id = ?4 OR is_exclusive = 1 OR ?6 = 1)
                )
                "#,
                params![
                    assignment.id,
                    assignment.stack_id,
                    assignment.stack_number,
                    assignment.pool_id,
                    assignment.client_code,
                    assignment.is_exclusive,
                    assignment.priority.as_str(),
                    assignment.assigned_at,
                    assignment.assigned_by,
                ],
            )
            .map_err(|e| match RepositoryError::from(e) {
                // 部分唯一索引兜底: 与其他写入方竞争失败
                RepositoryError::UniqueConstraintViolation(_) => {
                    RepositoryError::ExclusiveAssignmentConflict {
                        stack_id: assignment.stack_id.clone(),
                        owner_pool_id: "unknown".to_string(),
                    }
                }
                other => other,
            })?;

        if inserted == 1 {
            return Ok(true);
        }

        // 未插入: 区分幂等与冲突
        let owners: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT pool_id FROM stack_assignment WHERE stack_id = ?1 AND is_active = 1",
            )?;
            let rows = stmt.query_map(params![assignment.stack_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()?
        };

        match owners.iter().find(|p| **p != assignment.pool_id) {
            Some(owner) => Err(RepositoryError::ExclusiveAssignmentConflict {
                stack_id: assignment.stack_id.clone(),
                owner_pool_id: owner.clone(),
            }),
            None => Ok(false),
        }
    }

    /// # 返回
    /// 是否实际插入了新分配（同池幂等时为 false）
    fn attach_in_tx(conn: &Connection, assignment: &StackAssignment) -> RepositoryResult<bool> {
        let mut pool = Self::load_pool(conn, &assignment.pool_id)?
            .ok_or_else(|| RepositoryError::not_found("ClientPool", &assignment.pool_id))?;
        let inserted = Self::insert_assignment_if_free(conn, assignment)?;
        if pool.assigned_stacks.insert(assignment.stack_id.clone()) {
            Self::write_assigned_stacks(conn, &pool.id, &pool.assigned_stacks)?;
        }
        Ok(inserted)
    }

    fn detach_in_tx(conn: &Connection, pool_id: &str, stack_id: &str) -> RepositoryResult<bool> {
        let revoked = conn.execute(
            r#"
            UPDATE stack_assignment
            SET is_active = 0, revoked_at = ?1
            WHERE pool_id = ?2 AND stack_id = ?3 AND is_active = 1
            "#,
            params![Local::now().naive_local(), pool_id, stack_id],
        )?;

        if let Some(mut pool) = Self::load_pool(conn, pool_id)? {
            if pool.assigned_stacks.remove(stack_id) {
                Self::write_assigned_stacks(conn, pool_id, &pool.assigned_stacks)?;
            }
        }
        Ok(revoked > 0)
    }

    /// 撤销池的全部有效分配并清空 assigned_stacks
    ///
    /// # 返回
    /// 被释放的箱位（含池记录中残留但台账缺失的箱位）
    fn release_all_in_tx(conn: &Connection, pool_id: &str) -> RepositoryResult<Vec<String>> {
        let pool = Self::load_pool(conn, pool_id)?
            .ok_or_else(|| RepositoryError::not_found("ClientPool", pool_id))?;

        let mut released: BTreeSet<String> = {
            let mut stmt = conn.prepare(
                "SELECT stack_id FROM stack_assignment WHERE pool_id = ?1 AND is_active = 1",
            )?;
            let rows = stmt.query_map(params![pool_id], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<BTreeSet<String>>>()?
        };
        released.extend(pool.assigned_stacks.iter().cloned());

        conn.execute(
            "UPDATE stack_assignment SET is_active = 0, revoked_at = ?1 WHERE pool_id = ?2 AND is_active = 1",
            params![Local::now().naive_local(), pool_id],
        )?;
        Self::write_assigned_stacks(conn, pool_id, &BTreeSet::new())?;
        Ok(released.into_iter().collect())
    }

    /// 写入客户池标量字段（不修改 assigned_stacks / current_occupancy）
    fn write_pool_fields(conn: &Connection, pool: &ClientPool) -> RepositoryResult<()> {
        let affected = conn
            .execute(
                r#"
                UPDATE client_pool SET
                    client_id = ?2, client_code = ?3, client_name = ?4, yard_id = ?5,
                    max_capacity = ?6, priority = ?7, contract_start = ?8, contract_end = ?9,
                    is_active = ?10, notes = ?11, updated_at = ?12, updated_by = ?13
                WHERE pool_id = ?1
                "#,
                params![
                    pool.id,
                    pool.client_id,
                    pool.client_code,
                    pool.client_name,
                    pool.yard_id,
                    pool.max_capacity,
                    pool.priority.as_str(),
                    pool.contract.start,
                    pool.contract.end,
                    pool.is_active,
                    pool.notes,
                    pool.updated_at,
                    pool.updated_by,
                ],
            )
            .map_err(|e| match RepositoryError::from(e) {
                RepositoryError::UniqueConstraintViolation(_) => RepositoryError::ActivePoolExists {
                    client_code: pool.client_code.clone(),
                },
                other => other,
            })?;

        if affected == 0 {
            return Err(RepositoryError::not_found("ClientPool", &pool.id));
        }
        Ok(())
    }

    /// 客户池占用增量（下限 0）
    fn add_pool_occupancy_in_tx(
        conn: &Connection,
        pool_id: &str,
        delta: i32,
    ) -> RepositoryResult<i32> {
        let occupancy: Option<i32> = conn
            .query_row(
                r#"
                UPDATE client_pool
                SET current_occupancy = MAX(0, current_occupancy + ?1)
                WHERE pool_id = ?2
                RETURNING current_occupancy
                "#,
                params![delta, pool_id],
                |row| row.get(0),
            )
            .optional()?;
        occupancy.ok_or_else(|| RepositoryError::not_found("ClientPool", pool_id))
    }
}

fn parse_priority(idx: usize, raw: &str) -> rusqlite::Result<PoolPriority> {
    PoolPriority::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("未知优先级: {}", raw).into(),
        )
    })
}

impl AllocationStore for SqliteAllocationStore {
    fn create_pool(
        &self,
        pool: &ClientPool,
        assignments: &[StackAssignment],
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let insert = tx.execute(
            r#"
            INSERT INTO client_pool (
                pool_id, client_id, client_code, client_name, yard_id, assigned_stacks_json,
                max_capacity, current_occupancy, priority, contract_start, contract_end,
                is_active, notes, created_at, updated_at, created_by, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, '[]', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                pool.id,
                pool.client_id,
                pool.client_code,
                pool.client_name,
                pool.yard_id,
                pool.max_capacity,
                pool.current_occupancy,
                pool.priority.as_str(),
                pool.contract.start,
                pool.contract.end,
                pool.is_active,
                pool.notes,
                pool.created_at,
                pool.updated_at,
                pool.created_by,
                pool.updated_by,
            ],
        );
        match insert.map_err(RepositoryError::from) {
            Ok(_) => {}
            Err(RepositoryError::UniqueConstraintViolation(msg)) if msg.contains("client_code") => {
                return Err(RepositoryError::ActivePoolExists {
                    client_code: pool.client_code.clone(),
                });
            }
            Err(e) => return Err(e),
        }

        for assignment in assignments {
            Self::attach_in_tx(&tx, assignment)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn save_pool(&self, pool: &ClientPool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::write_pool_fields(&conn, pool)
    }

    fn delete_pool(&self, pool_id: &str) -> RepositoryResult<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let released = Self::release_all_in_tx(&tx, pool_id)?;
        tx.execute("DELETE FROM client_pool WHERE pool_id = ?1", params![pool_id])?;
        tx.commit()?;
        Ok(released)
    }

    fn deactivate_pool(&self, pool: &ClientPool) -> RepositoryResult<Vec<String>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let released = Self::release_all_in_tx(&tx, &pool.id)?;

        let mut inactive = pool.clone();
        inactive.is_active = false;
        Self::write_pool_fields(&tx, &inactive)?;
        tx.execute(
            "UPDATE client_pool SET current_occupancy = 0 WHERE pool_id = ?1",
            params![pool.id],
        )?;
        tx.commit()?;
        Ok(released)
    }

    fn find_pool(&self, pool_id: &str) -> RepositoryResult<Option<ClientPool>> {
        let conn = self.get_conn()?;
        Self::load_pool(&conn, pool_id)
    }

    fn find_active_pool_by_code(&self, client_code: &str) -> RepositoryResult<Option<ClientPool>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM client_pool WHERE client_code = ?1 AND is_active = 1",
            POOL_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![client_code], Self::map_pool)
            .optional()?)
    }

    fn list_pools(&self, yard_id: Option<&str>) -> RepositoryResult<Vec<ClientPool>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM client_pool WHERE (?1 IS NULL OR yard_id = ?1) ORDER BY client_code",
            POOL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let pools = stmt
            .query_map(params![yard_id], Self::map_pool)?
            .collect::<rusqlite::Result<Vec<ClientPool>>>()?;
        Ok(pools)
    }

    fn attach_stack(
        &self,
        assignment: &StackAssignment,
        occupancy_delta: i32,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::attach_in_tx(&tx, assignment)? {
            Self::add_pool_occupancy_in_tx(&tx, &assignment.pool_id, occupancy_delta)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn detach_stack(
        &self,
        pool_id: &str,
        stack_id: &str,
        occupancy_delta: i32,
    ) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let revoked = Self::detach_in_tx(&tx, pool_id, stack_id)?;
        if revoked {
            Self::add_pool_occupancy_in_tx(&tx, pool_id, occupancy_delta)?;
        }
        tx.commit()?;
        Ok(revoked)
    }

    fn reconcile_stacks(
        &self,
        pool_id: &str,
        removed: &[String],
        added: &[StackAssignment],
        occupancy_delta: i32,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if Self::load_pool(&tx, pool_id)?.is_none() {
            return Err(RepositoryError::not_found("ClientPool", pool_id));
        }
        for stack_id in removed {
            Self::detach_in_tx(&tx, pool_id, stack_id)?;
        }
        for assignment in added {
            // 冲突时 tx 被丢弃，自动回滚
            Self::attach_in_tx(&tx, assignment)?;
        }
        Self::add_pool_occupancy_in_tx(&tx, pool_id, occupancy_delta)?;

        tx.commit()?;
        Ok(())
    }

    fn find_assignments_by_stack(&self, stack_id: &str) -> RepositoryResult<Vec<StackAssignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stack_assignment WHERE stack_id = ?1 AND is_active = 1 ORDER BY assigned_at",
            ASSIGNMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![stack_id], Self::map_assignment)?
            .collect::<rusqlite::Result<Vec<StackAssignment>>>()?;
        Ok(rows)
    }

    fn find_assignments_by_pool(&self, pool_id: &str) -> RepositoryResult<Vec<StackAssignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stack_assignment WHERE pool_id = ?1 AND is_active = 1 ORDER BY stack_number",
            ASSIGNMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![pool_id], Self::map_assignment)?
            .collect::<rusqlite::Result<Vec<StackAssignment>>>()?;
        Ok(rows)
    }

    fn assigned_stack_ids(&self) -> RepositoryResult<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT stack_id FROM stack_assignment WHERE is_active = 1")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    fn apply_pool_occupancy_delta(&self, pool_id: &str, delta: i32) -> RepositoryResult<i32> {
        let conn = self.get_conn()?;
        Self::add_pool_occupancy_in_tx(&conn, pool_id, delta)
    }

    fn set_pool_occupancy(&self, pool_id: &str, occupancy: i32) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE client_pool SET current_occupancy = MAX(0, ?1) WHERE pool_id = ?2",
            params![occupancy, pool_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("ClientPool", pool_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup() -> SqliteAllocationStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        SqliteAllocationStore::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn pool(id: &str, code: &str) -> ClientPool {
        let now = Local::now().naive_local();
        ClientPool {
            id: id.to_string(),
            client_id: format!("C-{}", code),
            client_code: code.to_string(),
            client_name: format!("Client {}", code),
            yard_id: "Y1".to_string(),
            assigned_stacks: BTreeSet::new(),
            max_capacity: 100,
            current_occupancy: 0,
            priority: PoolPriority::High,
            contract: ContractWindow::open_ended(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
            is_active: true,
            notes: None,
            created_at: now,
            updated_at: now,
            created_by: "tester".to_string(),
            updated_by: "tester".to_string(),
        }
    }

    fn assignment(stack_id: &str, pool_id: &str, code: &str) -> StackAssignment {
        StackAssignment {
            id: uuid::Uuid::new_v4().to_string(),
            stack_id: stack_id.to_string(),
            stack_number: 3,
            pool_id: pool_id.to_string(),
            client_code: code.to_string(),
            is_exclusive: true,
            priority: PoolPriority::High,
            assigned_at: Local::now().naive_local(),
            assigned_by: "tester".to_string(),
        }
    }

    #[test]
    fn test_create_pool_with_assignments_round_trip() {
        let store = setup();
        store
            .create_pool(&pool("P1", "ACME"), &[assignment("s3", "P1", "ACME")])
            .unwrap();

        let loaded = store.find_active_pool_by_code("ACME").unwrap().unwrap();
        assert!(loaded.assigned_stacks.contains("s3"));
        assert_eq!(store.find_assignments_by_stack("s3").unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_active_pool_rejected() {
        let store = setup();
        store.create_pool(&pool("P1", "ACME"), &[]).unwrap();
        let err = store.create_pool(&pool("P2", "ACME"), &[]).unwrap_err();
        assert!(matches!(err, RepositoryError::ActivePoolExists { .. }));
    }

    #[test]
    fn test_exclusive_conflict_and_idempotent_reattach() {
        let store = setup();
        store.create_pool(&pool("P1", "ACME"), &[]).unwrap();
        store.create_pool(&pool("P2", "GLOBEX"), &[]).unwrap();

        store.attach_stack(&assignment("s3", "P1", "ACME"), 0).unwrap();
        store.attach_stack(&assignment("s3", "P1", "ACME"), 0).unwrap();
        assert_eq!(store.find_assignments_by_stack("s3").unwrap().len(), 1);

        let err = store
            .attach_stack(&assignment("s3", "P2", "GLOBEX"), 0)
            .unwrap_err();
        match err {
            RepositoryError::ExclusiveAssignmentConflict { owner_pool_id, .. } => {
                assert_eq!(owner_pool_id, "P1")
            }
            other => panic!("Expected ExclusiveAssignmentConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_reconcile_rolls_back_on_conflict() {
        let store = setup();
        store
            .create_pool(&pool("P1", "ACME"), &[assignment("s3", "P1", "ACME")])
            .unwrap();
        store
            .create_pool(&pool("P2", "GLOBEX"), &[assignment("s9", "P2", "GLOBEX")])
            .unwrap();

        let err = store
            .reconcile_stacks(
                "P1",
                &["s3".to_string()],
                &[assignment("s9", "P1", "ACME")],
                4,
            )
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ExclusiveAssignmentConflict { .. }));

        // s3 未被撤销
        let p1 = store.find_pool("P1").unwrap().unwrap();
        assert!(p1.assigned_stacks.contains("s3"));
        assert_eq!(p1.current_occupancy, 0);
        assert_eq!(store.find_assignments_by_stack("s3").unwrap().len(), 1);
    }

    #[test]
    fn test_pool_occupancy_delta_floor() {
        let store = setup();
        store.create_pool(&pool("P1", "ACME"), &[]).unwrap();
        assert_eq!(store.apply_pool_occupancy_delta("P1", 1).unwrap(), 1);
        assert_eq!(store.apply_pool_occupancy_delta("P1", -1).unwrap(), 0);
        assert_eq!(store.apply_pool_occupancy_delta("P1", -1).unwrap(), 0);
    }

    #[test]
    fn test_delete_pool_releases_stacks() {
        let store = setup();
        store
            .create_pool(
                &pool("P1", "ACME"),
                &[assignment("s3", "P1", "ACME"), assignment("s5", "P1", "ACME")],
            )
            .unwrap();
        let released = store.delete_pool("P1").unwrap();
        assert_eq!(released, vec!["s3".to_string(), "s5".to_string()]);
        assert!(store.assigned_stack_ids().unwrap().is_empty());
        assert!(store.find_pool("P1").unwrap().is_none());
    }

    #[test]
    fn test_ledger_writes_carry_pool_occupancy_delta() {
        let store = setup();
        store.create_pool(&pool("P1", "ACME"), &[]).unwrap();

        store.attach_stack(&assignment("s7", "P1", "ACME"), 10).unwrap();
        // 同池重复分配不再计入
        store.attach_stack(&assignment("s7", "P1", "ACME"), 10).unwrap();
        assert_eq!(store.find_pool("P1").unwrap().unwrap().current_occupancy, 10);

        store
            .reconcile_stacks("P1", &[], &[assignment("s9", "P1", "ACME")], 3)
            .unwrap();
        assert_eq!(store.find_pool("P1").unwrap().unwrap().current_occupancy, 13);

        assert!(store.detach_stack("P1", "s7", -10).unwrap());
        assert!(!store.detach_stack("P1", "s7", -10).unwrap());
        assert_eq!(store.find_pool("P1").unwrap().unwrap().current_occupancy, 3);

        store.set_pool_occupancy("P1", 8).unwrap();
        assert_eq!(store.find_pool("P1").unwrap().unwrap().current_occupancy, 8);
        assert!(matches!(
            store.set_pool_occupancy("missing", 1),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_deactivate_pool_releases_stacks_atomically() {
        let store = setup();
        let mut p1 = pool("P1", "ACME");
        p1.current_occupancy = 6;
        store
            .create_pool(
                &p1,
                &[assignment("s3", "P1", "ACME"), assignment("s5", "P1", "ACME")],
            )
            .unwrap();

        p1.notes = Some("合同到期".to_string());
        let released = store.deactivate_pool(&p1).unwrap();
        assert_eq!(released, vec!["s3".to_string(), "s5".to_string()]);

        let stored = store.find_pool("P1").unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(stored.assigned_stacks.is_empty());
        assert_eq!(stored.current_occupancy, 0);
        assert_eq!(stored.notes.as_deref(), Some("合同到期"));
        assert!(store.assigned_stack_ids().unwrap().is_empty());
        assert!(store.find_active_pool_by_code("ACME").unwrap().is_none());

        // 释放后其他池可以独占
        store.create_pool(&pool("P2", "GLOBEX"), &[]).unwrap();
        store.attach_stack(&assignment("s3", "P2", "GLOBEX"), 0).unwrap();
        // 同客户可重新建池
        store.create_pool(&pool("P3", "ACME"), &[]).unwrap();
    }
}
