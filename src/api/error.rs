// ==========================================
// 生产领料与库存移动引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型，把引擎/仓储错误转换为面向操作员的错误消息
// 红线: 每个错误必须包含未满足的具体前置条件
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("库存不足: 商品{product_id}在货架{shelf_id}上可用{available}，需求{requested}，缺口{shortfall}")]
    InsufficientStock {
        product_id: i64,
        shelf_id: i64,
        available: f64,
        requested: f64,
        shortfall: f64,
    },

    #[error("分摊结果不一致: {0}")]
    InconsistentAllocation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::DatabaseError(format!("外键约束违反: {}", msg))
            }
            RepositoryError::InsufficientStock {
                product_id,
                shelf_id,
                available,
                requested,
            } => ApiError::InsufficientStock {
                product_id,
                shelf_id,
                available,
                requested,
                shortfall: (requested - available).max(0.0),
            },
            RepositoryError::InvalidStateTransition {
                order_id,
                expected,
                actual,
            } => ApiError::InvalidStateTransition {
                from: format!("{}(工单{}当前实际状态)", actual, order_id),
                to: format!("期望{}", expected),
            },
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::SerializationError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::ValidationError(msg),
            EngineError::InsufficientStock {
                product_id,
                shelf_id,
                available,
                requested,
                shortfall,
            } => ApiError::InsufficientStock {
                product_id,
                shelf_id,
                available,
                requested,
                shortfall,
            },
            EngineError::InconsistentAllocation {
                group_key,
                expected,
                actual,
            } => ApiError::InconsistentAllocation(format!(
                "物料组{}应分摊{}，实际{}",
                group_key, expected, actual
            )),
            EngineError::InvalidStateTransition { order_id, from, to } => {
                ApiError::InvalidStateTransition {
                    from: format!("{}(工单{})", from, order_id),
                    to: to.to_string(),
                }
            }
            EngineError::Persistence(repo_err) => repo_err.into(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
