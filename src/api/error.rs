// ==========================================
// 堆场客户池分配引擎 - API层错误类型
// ==========================================
// 职责: 将仓储/引擎错误转换为业务错误
// 分类: 校验 / 冲突 / 未找到 / 完整性 / 瞬时存储 / 格式 / 权限 / 落箱身份
// ==========================================

use crate::domain::location::LocationFormatError;
use crate::engine::placement_validator::LedgerIntegrityError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与业务规则
    // ==========================================
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("位置编号格式错误: {0}")]
    FormatError(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 归属与落箱
    // ==========================================
    /// 调用方解决冲突后可重试
    #[error("归属冲突: {0}")]
    Conflict(String),

    #[error("无权使用: {0}")]
    AccessDenied(String),

    #[error("非法落箱位置: {0}")]
    InvalidPlacement(String),

    // ==========================================
    // 数据一致性与存储
    // ==========================================
    /// 台账与客户池记录不一致；不自动修复
    #[error("台账完整性错误: {0}")]
    IntegrityError(String),

    /// 退避重试耗尽后的存储瞬时错误
    #[error("存储暂不可用: {0}")]
    TransientStoreError(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 调用方是否可在处理后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Conflict(_) | ApiError::TransientStoreError(_))
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 归属冲突
            RepositoryError::ExclusiveAssignmentConflict {
                stack_id,
                owner_pool_id,
            } => ApiError::Conflict(format!(
                "箱位{}已被客户池{}独占",
                stack_id, owner_pool_id
            )),
            RepositoryError::ActivePoolExists { client_code } => {
                ApiError::Conflict(format!("客户{}已存在有效客户池", client_code))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Conflict(format!("唯一约束违反: {}", msg))
            }

            // 数据库错误
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) | RepositoryError::DatabaseBusy(msg) => {
                ApiError::TransientStoreError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::InternalError(format!("存储锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),

            // 数据一致性
            RepositoryError::IntegrityViolation(msg) => ApiError::IntegrityError(msg),
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::ValidationError(format!("字段{}错误: {}", field, message))
            }

            // 通用错误
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<LocationFormatError> for ApiError {
    fn from(err: LocationFormatError) -> Self {
        ApiError::FormatError(err.to_string())
    }
}

impl From<LedgerIntegrityError> for ApiError {
    fn from(err: LedgerIntegrityError) -> Self {
        ApiError::IntegrityError(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
