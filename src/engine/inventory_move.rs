// ==========================================
// 生产领料与库存移动引擎 - 库存移动引擎
// ==========================================
// 职责: 货架间库存移动的合并、执行、冲回；完工消耗与成品入库
// 红线: 货架库存永不为负；一批分录在单个事务内执行，失败不留部分修改
// ==========================================
// 分两步:
// 1. plan_*: 纯计算，把移动展开为有序库存分录 (StockLeg)
// 2. 执行: 分录交给仓储层在一个事务内完成（条件出库 + upsert 入库）
// ==========================================

use crate::domain::inventory::{InventoryMove, ProductStockSummary, StockLeg};
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::shelf_stock_repo::ShelfStockRepository;
use std::sync::Arc;
use tracing::{info, instrument, warn};

// ==========================================
// InventoryMoveEngine - 库存移动引擎
// ==========================================
pub struct InventoryMoveEngine {
    stock_repo: Arc<ShelfStockRepository>,
    /// 数量与零比较的浮点容差
    epsilon: f64,
}

impl InventoryMoveEngine {
    pub fn new(stock_repo: Arc<ShelfStockRepository>, epsilon: f64) -> Self {
        Self {
            stock_repo,
            epsilon,
        }
    }

    // ==========================================
    // 分录规划（纯计算）
    // ==========================================

    /// 按路线 (product, from, to) 合并移动，数量相加，保持首次出现顺序
    pub fn group_moves(moves: &[InventoryMove]) -> Vec<InventoryMove> {
        let mut grouped: Vec<InventoryMove> = Vec::new();
        for mv in moves {
            match grouped.iter_mut().find(|g| g.route() == mv.route()) {
                Some(existing) => existing.quantity += mv.quantity,
                None => grouped.push(mv.clone()),
            }
        }
        grouped
    }

    fn validate_quantity(mv: &InventoryMove) -> EngineResult<()> {
        if !mv.quantity.is_finite() || mv.quantity < 0.0 {
            return Err(EngineError::Validation(format!(
                "移动数量无效: product_id={}, quantity={}",
                mv.product_id, mv.quantity
            )));
        }
        Ok(())
    }

    /// 移动 → 分录: 每条合并后的移动先出库源货架，再入库目标货架
    ///
    /// 源货架与目标货架相同、或数量在容差内的移动不产生分录
    pub fn plan_apply(&self, moves: &[InventoryMove]) -> EngineResult<Vec<StockLeg>> {
        for mv in moves {
            Self::validate_quantity(mv)?;
            if mv.from_shelf_id.is_none() || mv.to_shelf_id.is_none() {
                return Err(EngineError::Validation(format!(
                    "移动缺少货架: product_id={}, from={:?}, to={:?}",
                    mv.product_id, mv.from_shelf_id, mv.to_shelf_id
                )));
            }
        }

        let mut legs = Vec::new();
        for mv in Self::group_moves(moves) {
            let (Some(from), Some(to)) = (mv.from_shelf_id, mv.to_shelf_id) else {
                continue;
            };
            if from == to || mv.quantity <= self.epsilon {
                continue;
            }
            legs.push(StockLeg::decrement(mv.product_id, from, mv.quantity));
            legs.push(StockLeg::increment(mv.product_id, to, mv.quantity));
        }
        Ok(legs)
    }

    /// 冲回: 源/目标互换后按 plan_apply 展开
    pub fn plan_rollback(&self, moves: &[InventoryMove]) -> EngineResult<Vec<StockLeg>> {
        let reversed: Vec<InventoryMove> = moves.iter().map(InventoryMove::reversed).collect();
        self.plan_apply(&reversed)
    }

    /// 消耗: 仅出库，货架取 to_shelf_id，缺失时用 fallback_shelf_id
    pub fn plan_consume(
        &self,
        moves: &[InventoryMove],
        fallback_shelf_id: Option<i64>,
    ) -> EngineResult<Vec<StockLeg>> {
        let mut legs: Vec<StockLeg> = Vec::new();
        for mv in moves {
            Self::validate_quantity(mv)?;
            let shelf_id = mv.to_shelf_id.or(fallback_shelf_id).ok_or_else(|| {
                EngineError::Validation(format!(
                    "无法确定消耗货架: product_id={}（移动未记录目标货架且工单无生产货架）",
                    mv.product_id
                ))
            })?;
            if mv.quantity <= self.epsilon {
                continue;
            }
            match legs
                .iter_mut()
                .find(|leg| leg.product_id == mv.product_id && leg.shelf_id == shelf_id)
            {
                Some(leg) => leg.delta -= mv.quantity,
                None => legs.push(StockLeg::decrement(mv.product_id, shelf_id, mv.quantity)),
            }
        }
        Ok(legs)
    }

    /// 成品入库: 单条入库分录
    pub fn plan_add_finished(
        &self,
        product_id: i64,
        shelf_id: i64,
        quantity: f64,
    ) -> EngineResult<Vec<StockLeg>> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "成品数量必须大于0: {}",
                quantity
            )));
        }
        Ok(vec![StockLeg::increment(product_id, shelf_id, quantity)])
    }

    // ==========================================
    // 执行
    // ==========================================

    fn execute(&self, legs: &[StockLeg]) -> EngineResult<Vec<ProductStockSummary>> {
        Ok(self.stock_repo.apply_legs(legs, self.epsilon)?)
    }

    /// 执行货架间移动
    ///
    /// # 错误
    /// - Validation: 移动缺少货架或数量无效（未做任何修改）
    /// - InsufficientStock: 源货架库存不足（整批回滚）
    #[instrument(skip(self, moves), fields(count = moves.len()))]
    pub fn apply_moves(&self, moves: &[InventoryMove]) -> EngineResult<Vec<ProductStockSummary>> {
        let legs = self.plan_apply(moves)?;
        let summaries = self.execute(&legs)?;
        info!(legs = legs.len(), "库存移动已执行");
        Ok(summaries)
    }

    /// 冲回移动
    #[instrument(skip(self, moves), fields(count = moves.len()))]
    pub fn rollback_moves(
        &self,
        moves: &[InventoryMove],
    ) -> EngineResult<Vec<ProductStockSummary>> {
        if moves.is_empty() {
            warn!("没有可冲回的库存移动");
            return Ok(Vec::new());
        }
        let legs = self.plan_rollback(moves)?;
        let summaries = self.execute(&legs)?;
        info!(legs = legs.len(), "库存移动已冲回");
        Ok(summaries)
    }

    /// 消耗生产货架上的物料
    #[instrument(skip(self, moves), fields(count = moves.len()))]
    pub fn consume_materials(
        &self,
        moves: &[InventoryMove],
        fallback_shelf_id: Option<i64>,
    ) -> EngineResult<Vec<ProductStockSummary>> {
        let legs = self.plan_consume(moves, fallback_shelf_id)?;
        let summaries = self.execute(&legs)?;
        info!(legs = legs.len(), "物料已消耗");
        Ok(summaries)
    }

    /// 成品入库（仓库由货架决定）
    #[instrument(skip(self))]
    pub fn add_finished_goods(
        &self,
        product_id: i64,
        shelf_id: i64,
        quantity: f64,
    ) -> EngineResult<ProductStockSummary> {
        let legs = self.plan_add_finished(product_id, shelf_id, quantity)?;
        let mut summaries = self.execute(&legs)?;
        info!(product_id, shelf_id, quantity, "成品已入库");
        summaries.pop().ok_or_else(|| {
            EngineError::Validation(format!("成品入库未产生库存汇总: product_id={}", product_id))
        })
    }

    /// 重算商品库存缓存（幂等）
    pub fn sync_product_stock(&self, product_id: i64) -> EngineResult<ProductStockSummary> {
        Ok(self.stock_repo.sync_product_stock(product_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn engine() -> InventoryMoveEngine {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let repo = ShelfStockRepository::from_connection(Arc::new(Mutex::new(conn)));
        InventoryMoveEngine::new(Arc::new(repo), 1e-9)
    }

    #[test]
    fn test_group_moves_nets_same_route() {
        let moves = vec![
            InventoryMove::new(1, 10, 20, 5.0),
            InventoryMove::new(2, 10, 20, 1.0),
            InventoryMove::new(1, 10, 20, 3.0),
        ];
        let grouped = InventoryMoveEngine::group_moves(&moves);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0], InventoryMove::new(1, 10, 20, 8.0));
        assert_eq!(grouped[1], InventoryMove::new(2, 10, 20, 1.0));
    }

    #[test]
    fn test_plan_apply_orders_legs_and_skips_noops() {
        let e = engine();
        let legs = e
            .plan_apply(&[
                InventoryMove::new(1, 10, 20, 4.0),
                InventoryMove::new(1, 30, 30, 4.0),
                InventoryMove::new(1, 40, 50, 0.0),
            ])
            .unwrap();
        assert_eq!(
            legs,
            vec![StockLeg::decrement(1, 10, 4.0), StockLeg::increment(1, 20, 4.0)]
        );
    }

    #[test]
    fn test_plan_apply_rejects_invalid_moves() {
        let e = engine();
        let missing = InventoryMove {
            product_id: 1,
            from_shelf_id: None,
            to_shelf_id: Some(2),
            quantity: 1.0,
        };
        assert!(matches!(e.plan_apply(&[missing]), Err(EngineError::Validation(_))));
        assert!(matches!(
            e.plan_apply(&[InventoryMove::new(1, 1, 2, -1.0)]),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            e.plan_apply(&[InventoryMove::new(1, 1, 2, f64::NAN)]),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_plan_rollback_swaps_direction() {
        let e = engine();
        let legs = e.plan_rollback(&[InventoryMove::new(1, 10, 20, 4.0)]).unwrap();
        assert_eq!(
            legs,
            vec![StockLeg::decrement(1, 20, 4.0), StockLeg::increment(1, 10, 4.0)]
        );
    }

    #[test]
    fn test_plan_consume_uses_fallback_shelf() {
        let e = engine();
        let partial = InventoryMove {
            product_id: 1,
            from_shelf_id: Some(10),
            to_shelf_id: None,
            quantity: 2.0,
        };
        let legs = e
            .plan_consume(&[InventoryMove::new(1, 10, 20, 3.0), partial.clone()], Some(20))
            .unwrap();
        assert_eq!(legs, vec![StockLeg::decrement(1, 20, 5.0)]);

        let err = e.plan_consume(&[partial], None).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_plan_add_finished_requires_positive_quantity() {
        let e = engine();
        assert!(e.plan_add_finished(1, 2, 0.0).is_err());
        assert_eq!(
            e.plan_add_finished(1, 2, 10.0).unwrap(),
            vec![StockLeg::increment(1, 2, 10.0)]
        );
    }
}
