// ==========================================
// 生产领料与库存移动引擎 - 生产状态流转控制器
// ==========================================
// 职责: 驱动工单状态流转，串联 台账校验 → 分摊 → 库存移动 → 工单回写
// 状态: pending → in_progress → completed；in_progress → pending (停工)
// ==========================================
// 红线:
// - 校验失败不修改任何数据
// - 库存分录与工单写回在同一事务内提交，工单字段只在分录成功后落库
// - 工单写入带状态守卫，并发冲突整体回滚
// ==========================================

use crate::config::EngineConfig;
use crate::domain::inventory::{InventoryMove, ProductStockSummary};
use crate::domain::material_group::Draft;
use crate::domain::order::ProductionOrder;
use crate::domain::types::ProductionStatus;
use crate::engine::aggregator::piece_key;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::inventory_move::InventoryMoveEngine;
use crate::engine::ledger::DeliveryLedger;
use crate::engine::splitter::AllocationSplitter;
use crate::repository::shelf_stock_repo::ShelfStockRepository;
use crate::repository::transition_repo::{
    GuardedOrderWrite, TransitionRepository, TransitionWriteSet,
};
use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 状态流转结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// 写回后的工单
    pub orders: Vec<ProductionOrder>,
    /// 重算后的商品库存
    pub stock_summaries: Vec<ProductStockSummary>,
}

/// 状态流转计划（校验通过、尚未提交）
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub write_set: TransitionWriteSet,
    pub orders: Vec<ProductionOrder>,
}

// ==========================================
// ProductionLifecycleController - 状态流转控制器
// ==========================================
pub struct ProductionLifecycleController {
    transition_repo: Arc<TransitionRepository>,
    move_engine: InventoryMoveEngine,
    ledger: DeliveryLedger,
    splitter: AllocationSplitter,
    config: EngineConfig,
}

impl ProductionLifecycleController {
    pub fn new(
        transition_repo: Arc<TransitionRepository>,
        stock_repo: Arc<ShelfStockRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            transition_repo,
            move_engine: InventoryMoveEngine::new(stock_repo, config.stock_epsilon),
            ledger: DeliveryLedger::new(config.stock_epsilon),
            splitter: AllocationSplitter::new(config.allocation_tolerance),
            config,
        }
    }

    fn now() -> NaiveDateTime {
        Local::now().naive_local().trunc_subsecs(0)
    }

    fn require_status(
        order: &ProductionOrder,
        expected: ProductionStatus,
        to: ProductionStatus,
    ) -> EngineResult<()> {
        if order.status != expected || !order.status.can_transition_to(to) {
            return Err(EngineError::InvalidStateTransition {
                order_id: order.order_id,
                from: order.status,
                to,
            });
        }
        Ok(())
    }

    fn commit(&self, plan: TransitionPlan) -> EngineResult<TransitionOutcome> {
        let stock_summaries = self
            .transition_repo
            .commit(&plan.write_set, self.config.stock_epsilon)?;
        Ok(TransitionOutcome {
            orders: plan.orders,
            stock_summaries,
        })
    }

    // ==========================================
    // 开工
    // ==========================================

    /// 规划开工（纯校验与计算，不写库）
    ///
    /// # 前置条件
    /// - 工单非空且全部为 pending
    /// - 草稿覆盖全部工单，且物料组需求不引用未提供的工单
    /// - 至少一个已确认物料组；每个已确认组的商品、货架、交付量齐全
    /// - 开启 block_on_unresolved_rows 时草稿不得有未归集行
    pub fn plan_start(
        &self,
        draft: &Draft,
        orders: &[ProductionOrder],
    ) -> EngineResult<TransitionPlan> {
        if orders.is_empty() {
            return Err(EngineError::Validation("开工工单列表为空".to_string()));
        }
        for order in orders {
            Self::require_status(order, ProductionStatus::Pending, ProductionStatus::InProgress)?;
            if !draft.order_ids.contains(&order.order_id) {
                return Err(EngineError::Validation(format!(
                    "草稿不包含工单: order_id={}",
                    order.order_id
                )));
            }
        }
        if self.config.block_on_unresolved_rows && !draft.unresolved_rows.is_empty() {
            let first = &draft.unresolved_rows[0];
            return Err(EngineError::Validation(format!(
                "存在未选择商品的需求行: order_no={}, row_index={}, 共{}行",
                first.order_no,
                first.row_index,
                draft.unresolved_rows.len()
            )));
        }

        let mut groups: Vec<_> = draft.confirmed_groups().cloned().collect();
        if groups.is_empty() {
            return Err(EngineError::Validation("没有已确认的物料组".to_string()));
        }

        let mut updated: Vec<ProductionOrder> = orders.to_vec();
        let mut order_shares: Vec<Vec<InventoryMove>> = vec![Vec::new(); updated.len()];
        let mut pooled_moves: Vec<InventoryMove> = Vec::new();

        for group in groups.iter_mut() {
            group.recompute_totals();
            let (source, production) = self.ledger.check_fields(group)?;
            let allocations = self.splitter.split(group)?;

            pooled_moves.push(InventoryMove::new(
                group.selected_product_id,
                source,
                production,
                group.total_delivered_qty,
            ));

            for allocation in &allocations {
                let position = updated
                    .iter()
                    .position(|o| o.order_id == allocation.order_id)
                    .ok_or_else(|| {
                        EngineError::Validation(format!(
                            "物料组引用了未提供的工单: group={}, order_id={}",
                            group.key, allocation.order_id
                        ))
                    })?;
                let order = &mut updated[position];

                let row_position = order
                    .locate_row(allocation.row_key.as_deref(), allocation.row_index)
                    .ok_or_else(|| {
                        EngineError::Validation(format!(
                            "需求行不存在: order_id={}, row_index={}",
                            order.order_id, allocation.row_index
                        ))
                    })?;
                let row = &mut order.material_requirement_rows[row_position];
                if !row.belongs_to(&group.category, group.selected_product_id) {
                    return Err(EngineError::Validation(format!(
                        "需求行已变更，请刷新草稿: order_id={}, row_index={}, group={}, 行商品={:?}",
                        order.order_id, row_position, group.key, row.selected_product_id
                    )));
                }
                row.source_shelf_id = Some(source);
                row.production_shelf_id = Some(production);
                row.delivered_qty = Some(allocation.delivered_qty);
                for (index, piece) in row.pieces.iter_mut().enumerate() {
                    let key = piece_key(piece, index);
                    if let Some(qty) = allocation.piece_delivered.get(Some(&key), index) {
                        piece.delivered_qty = Some(qty);
                    }
                }

                if order_shares[position].is_empty() {
                    order.production_shelf_id = Some(production);
                }
                order_shares[position].push(InventoryMove::new(
                    group.selected_product_id,
                    source,
                    production,
                    allocation.delivered_qty,
                ));
            }
        }

        let legs = self.move_engine.plan_apply(&pooled_moves)?;

        let started_at = Self::now();
        let mut write_set = TransitionWriteSet {
            legs,
            ..Default::default()
        };
        for (order, shares) in updated.iter_mut().zip(order_shares) {
            order.production_moves = InventoryMoveEngine::group_moves(&shares)
                .into_iter()
                .filter(|mv| mv.quantity > self.config.stock_epsilon)
                .collect();
            order.handoff_moves.clear();
            order.status = ProductionStatus::InProgress;
            order.started_at = Some(started_at);
            if order.production_moves.is_empty() {
                warn!(order_id = order.order_id, "工单未分摊到任何物料，仍按开工处理");
            }
            write_set.orders.push(GuardedOrderWrite {
                order: order.clone(),
                expected_status: ProductionStatus::Pending,
            });
        }

        Ok(TransitionPlan {
            write_set,
            orders: updated,
        })
    }

    /// 开工: 执行已确认物料组的移动并回写分摊结果
    #[instrument(skip(self, draft, orders), fields(order_count = orders.len()))]
    pub fn start(
        &self,
        draft: &Draft,
        orders: &[ProductionOrder],
    ) -> EngineResult<TransitionOutcome> {
        let plan = self.plan_start(draft, orders)?;
        let outcome = self.commit(plan)?;
        info!(
            orders = outcome.orders.len(),
            products = outcome.stock_summaries.len(),
            "工单已开工"
        );
        Ok(outcome)
    }

    // ==========================================
    // 停工
    // ==========================================

    pub fn plan_stop(&self, order: &ProductionOrder) -> EngineResult<TransitionPlan> {
        Self::require_status(order, ProductionStatus::InProgress, ProductionStatus::Pending)?;

        if order.production_moves.is_empty() {
            warn!(order_id = order.order_id, "工单没有开工移动记录，跳过库存冲回");
        }
        let legs = self.move_engine.plan_rollback(&order.production_moves)?;

        let mut updated = order.clone();
        for row in updated.material_requirement_rows.iter_mut() {
            row.clear_delivery_annotations();
        }
        updated.status = ProductionStatus::Pending;
        updated.production_shelf_id = None;
        updated.production_moves.clear();
        updated.handoff_moves.clear();
        updated.stopped_at = Some(Self::now());

        Ok(TransitionPlan {
            write_set: TransitionWriteSet {
                legs,
                orders: vec![GuardedOrderWrite {
                    order: updated.clone(),
                    expected_status: ProductionStatus::InProgress,
                }],
                sync_product_ids: Vec::new(),
            },
            orders: vec![updated],
        })
    }

    /// 停工: 冲回本工单的开工移动，工单回到待生产
    #[instrument(skip(self, order), fields(order_id = order.order_id))]
    pub fn stop(&self, order: &ProductionOrder) -> EngineResult<TransitionOutcome> {
        let plan = self.plan_stop(order)?;
        let outcome = self.commit(plan)?;
        info!("工单已停工");
        Ok(outcome)
    }

    // ==========================================
    // 完工
    // ==========================================

    pub fn plan_complete(
        &self,
        order: &ProductionOrder,
        output_product_id: Option<i64>,
        output_shelf_id: Option<i64>,
        quantity: f64,
    ) -> EngineResult<TransitionPlan> {
        Self::require_status(order, ProductionStatus::InProgress, ProductionStatus::Completed)?;

        let product_id = output_product_id.ok_or_else(|| {
            EngineError::Validation(format!("未选择成品: order_id={}", order.order_id))
        })?;
        let shelf_id = output_shelf_id.ok_or_else(|| {
            EngineError::Validation(format!("未选择成品入库货架: order_id={}", order.order_id))
        })?;
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "成品数量必须大于0: order_id={}, quantity={}",
                order.order_id, quantity
            )));
        }

        let consumption: Vec<InventoryMove> = order
            .consumption_moves()
            .iter()
            .filter(|mv| mv.quantity > self.config.stock_epsilon)
            .cloned()
            .collect();
        if consumption.is_empty() {
            return Err(EngineError::Validation(format!(
                "没有可消耗的物料移动: order_id={}",
                order.order_id
            )));
        }

        let mut legs = self
            .move_engine
            .plan_consume(&consumption, order.production_shelf_id)?;
        legs.extend(
            self.move_engine
                .plan_add_finished(product_id, shelf_id, quantity)?,
        );

        let mut updated = order.clone();
        updated.status = ProductionStatus::Completed;
        updated.completed_at = Some(Self::now());
        updated.output_product_id = Some(product_id);
        updated.output_shelf_id = Some(shelf_id);
        updated.output_quantity = Some(quantity);

        Ok(TransitionPlan {
            write_set: TransitionWriteSet {
                legs,
                orders: vec![GuardedOrderWrite {
                    order: updated.clone(),
                    expected_status: ProductionStatus::InProgress,
                }],
                sync_product_ids: Vec::new(),
            },
            orders: vec![updated],
        })
    }

    /// 完工: 消耗生产货架物料，成品入库
    #[instrument(skip(self, order), fields(order_id = order.order_id))]
    pub fn complete(
        &self,
        order: &ProductionOrder,
        output_product_id: Option<i64>,
        output_shelf_id: Option<i64>,
        quantity: f64,
    ) -> EngineResult<TransitionOutcome> {
        let plan = self.plan_complete(order, output_product_id, output_shelf_id, quantity)?;
        let outcome = self.commit(plan)?;
        info!(quantity, "工单已完工");
        Ok(outcome)
    }
}
