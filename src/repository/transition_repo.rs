// ==========================================
// 生产领料与库存移动引擎 - 工单状态转换提交仓储
// ==========================================
// 红线: 库存分录、工单写回、库存缓存重算必须在同一事务内完成
//       任何一步失败整体回滚，不留部分修改
// ==========================================

use crate::domain::inventory::{ProductStockSummary, StockLeg};
use crate::domain::order::ProductionOrder;
use crate::domain::types::ProductionStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::order_repo::update_with_status_guard_in_tx;
use crate::repository::shelf_stock_repo::{apply_legs_in_tx, sync_products_in_tx};
use rusqlite::{Connection, TransactionBehavior};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// 带状态守卫的工单写入
#[derive(Debug, Clone)]
pub struct GuardedOrderWrite {
    pub order: ProductionOrder,
    /// 写入前库中应处的状态
    pub expected_status: ProductionStatus,
}

/// 一次状态转换的完整写集
#[derive(Debug, Clone, Default)]
pub struct TransitionWriteSet {
    /// 按执行顺序排列的库存分录
    pub legs: Vec<StockLeg>,
    pub orders: Vec<GuardedOrderWrite>,
    /// 需重算库存缓存的商品（分录涉及的商品会自动加入）
    pub sync_product_ids: Vec<i64>,
}

// ==========================================
// TransitionRepository - 状态转换提交仓储
// ==========================================
pub struct TransitionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TransitionRepository {
    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 原子提交写集
    ///
    /// # 顺序
    /// 1. 库存分录（出库条件更新 / 入库 upsert）
    /// 2. 工单写回（状态守卫）
    /// 3. 重算涉及商品的库存缓存
    ///
    /// # 返回
    /// - Ok(Vec<ProductStockSummary>): 重算后的商品库存
    /// - Err: 任一步失败，事务已回滚
    pub fn commit(
        &self,
        write_set: &TransitionWriteSet,
        epsilon: f64,
    ) -> RepositoryResult<Vec<ProductStockSummary>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        apply_legs_in_tx(&tx, &write_set.legs, epsilon)?;

        for write in &write_set.orders {
            update_with_status_guard_in_tx(&tx, &write.order, write.expected_status)?;
        }

        let product_ids = write_set
            .legs
            .iter()
            .map(|leg| leg.product_id)
            .chain(write_set.sync_product_ids.iter().copied());
        let summaries = sync_products_in_tx(&tx, product_ids)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        debug!(
            legs = write_set.legs.len(),
            orders = write_set.orders.len(),
            "状态转换写集已提交"
        );
        Ok(summaries)
    }
}
