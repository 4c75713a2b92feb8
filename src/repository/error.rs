// ==========================================
// 堆场客户池分配引擎 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类: 瞬时错误（可退避重试） / 冲突 / 完整性 / 其他
// ==========================================

use rusqlite::ErrorCode;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 归属冲突 =====
    #[error("箱位已被独占分配: stack_id={stack_id}, owner_pool_id={owner_pool_id}")]
    ExclusiveAssignmentConflict {
        stack_id: String,
        owner_pool_id: String,
    },

    #[error("客户已存在有效客户池: client_code={client_code}")]
    ActivePoolExists { client_code: String },

    // ===== 数据库错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库繁忙: {0}")]
    DatabaseBusy(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    // ===== 数据一致性错误 =====
    #[error("台账完整性违反: {0}")]
    IntegrityViolation(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    /// 是否为瞬时（连接/繁忙）错误；只有此类错误允许退避重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::DatabaseConnectionError(_) | RepositoryError::DatabaseBusy(_)
        )
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, ref msg) => match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    RepositoryError::DatabaseBusy(err.to_string())
                }
                ErrorCode::CannotOpen => RepositoryError::DatabaseConnectionError(err.to_string()),
                _ => match msg {
                    Some(m) if m.contains("UNIQUE") => {
                        RepositoryError::UniqueConstraintViolation(m.clone())
                    }
                    Some(m) => RepositoryError::DatabaseQueryError(m.clone()),
                    None => RepositoryError::DatabaseQueryError(err.to_string()),
                },
            },
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                id: "Unknown".to_string(),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::FieldValueError {
            field: "json".to_string(),
            message: err.to_string(),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let repo_err: RepositoryError = err.into();
        assert!(repo_err.is_transient());
    }

    #[test]
    fn test_unique_violation_not_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed: stack_assignment.stack_id".to_string()),
        );
        let repo_err: RepositoryError = err.into();
        assert!(matches!(repo_err, RepositoryError::UniqueConstraintViolation(_)));
        assert!(!repo_err.is_transient());
    }
}
