// ==========================================
// 生产领料与库存移动引擎 - 引擎层错误类型
// ==========================================
// 红线: 每个被拒绝的操作必须指明未满足的具体前置条件
// ==========================================

use crate::domain::types::ProductionStatus;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 前置条件校验失败（任何修改发生之前抛出）
    #[error("校验失败: {0}")]
    Validation(String),

    /// 出库后库存将为负
    #[error("库存不足: product_id={product_id}, shelf_id={shelf_id}, 可用={available}, 需求={requested}, 缺口={shortfall}")]
    InsufficientStock {
        product_id: i64,
        shelf_id: i64,
        available: f64,
        requested: f64,
        shortfall: f64,
    },

    /// 分摊结果与输入总量不一致（断言失败，正常情况下不可达）
    #[error("分摊结果不一致: group={group_key}, expected={expected}, actual={actual}")]
    InconsistentAllocation {
        group_key: String,
        expected: f64,
        actual: f64,
    },

    #[error("无效的状态转换: order_id={order_id}, from={from} to={to}")]
    InvalidStateTransition {
        order_id: i64,
        from: ProductionStatus,
        to: ProductionStatus,
    },

    /// 存储层错误原样上抛，不做重试
    #[error(transparent)]
    Persistence(RepositoryError),
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InsufficientStock {
                product_id,
                shelf_id,
                available,
                requested,
            } => EngineError::InsufficientStock {
                product_id,
                shelf_id,
                available,
                requested,
                shortfall: (requested - available).max(0.0),
            },
            other => EngineError::Persistence(other),
        }
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
