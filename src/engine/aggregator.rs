// ==========================================
// 生产领料与库存移动引擎 - 物料需求归集引擎
// ==========================================
// 职责: 跨工单按 (类别, 商品) 归集物料需求，生成开工草稿
// 输入: 生产工单列表 + 商品目录
// 输出: Draft（物料组 + 按工单需求明细 + 未归集行）
// ==========================================
// 用量规则:
// - per_item_usage = 显式值，缺失时 = 原始总用量 / max(1, 工单数量)
// - total_usage    = per_item_usage × 工单数量
// ==========================================

use crate::domain::material_group::{
    Draft, GroupPiece, OrderRequirement, StartMaterialGroup, UnresolvedRow,
};
use crate::domain::order::{MaterialRequirementRow, PieceRequirement, ProductionOrder};
use crate::engine::catalog::MaterialCatalog;
use crate::engine::error::EngineResult;
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// 部件键: 显式键优先，否则由下标和名称派生（同一行内唯一）
pub fn piece_key(piece: &PieceRequirement, index: usize) -> String {
    match piece.key.as_deref() {
        Some(key) if !key.trim().is_empty() => key.to_string(),
        _ => format!("{}#{}", index, piece.name),
    }
}

// ==========================================
// MaterialRequirementAggregator - 物料需求归集引擎
// ==========================================
pub struct MaterialRequirementAggregator {
    // 无状态引擎，不需要注入依赖
}

impl Default for MaterialRequirementAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialRequirementAggregator {
    pub fn new() -> Self {
        Self {}
    }

    /// 把一行需求的部件归一为确定用量
    pub fn resolve_pieces(row: &MaterialRequirementRow, order_quantity: f64) -> Vec<GroupPiece> {
        let divisor = order_quantity.max(1.0);
        row.pieces
            .iter()
            .enumerate()
            .map(|(index, piece)| {
                let per_item_usage = match piece.per_item_usage {
                    Some(v) if v.is_finite() => v,
                    _ => piece.total_usage.unwrap_or(0.0) / divisor,
                };
                GroupPiece {
                    key: piece_key(piece, index),
                    name: piece.name.clone(),
                    length: piece.length,
                    width: piece.width,
                    quantity: piece.quantity,
                    main_unit: piece.main_unit.clone(),
                    sub_unit: piece.sub_unit.clone(),
                    per_item_usage,
                    total_usage: per_item_usage * order_quantity,
                    sub_usage: piece.sub_usage,
                }
            })
            .collect()
    }

    /// 生成开工草稿
    ///
    /// # 说明
    /// - 物料组按首次出现顺序排列；组内 order_requirements 保持工单输入顺序
    /// - 未选商品或商品不存在的行不参与归集，记入 unresolved_rows 交调用方提示
    /// - 需求行上已保存的货架作为物料组的初始货架
    #[instrument(skip(self, orders, catalog), fields(order_count = orders.len()))]
    pub fn build_draft<C>(&self, orders: &[ProductionOrder], catalog: &C) -> EngineResult<Draft>
    where
        C: MaterialCatalog + ?Sized,
    {
        let mut groups: Vec<StartMaterialGroup> = Vec::new();
        let mut index_by_key: HashMap<String, usize> = HashMap::new();
        let mut unresolved_rows = Vec::new();
        let mut label_cache: HashMap<String, Option<String>> = HashMap::new();

        for order in orders {
            let quantity = order.order_quantity();

            for (row_index, row) in order.material_requirement_rows.iter().enumerate() {
                let Some(product_id) = row.selected_product_id else {
                    unresolved_rows.push(UnresolvedRow {
                        order_id: order.order_id,
                        order_no: order.order_no.clone(),
                        row_index,
                        category: row.category.clone(),
                        reason: "未选择商品".to_string(),
                    });
                    continue;
                };

                let Some(product) = catalog.product(product_id)? else {
                    unresolved_rows.push(UnresolvedRow {
                        order_id: order.order_id,
                        order_no: order.order_no.clone(),
                        row_index,
                        category: row.category.clone(),
                        reason: format!("商品不存在: product_id={}", product_id),
                    });
                    continue;
                };

                let category = if row.category.trim().is_empty() {
                    product.category_code.clone().unwrap_or_default()
                } else {
                    row.category.trim().to_string()
                };
                let key = StartMaterialGroup::group_key(&category, product_id);

                let pieces = Self::resolve_pieces(row, quantity);
                let total_usage: f64 = pieces.iter().map(|p| p.total_usage).sum();

                let position = match index_by_key.get(&key) {
                    Some(pos) => *pos,
                    None => {
                        let category_label = match label_cache.get(&category) {
                            Some(label) => label.clone(),
                            None => {
                                let label = catalog.category_label(&category)?;
                                label_cache.insert(category.clone(), label.clone());
                                label
                            }
                        };
                        groups.push(StartMaterialGroup {
                            key: key.clone(),
                            category: category.clone(),
                            category_label,
                            selected_product_id: product_id,
                            product_name: Some(product.name.clone()),
                            product_code: Some(product.code.clone()),
                            pieces: Vec::new(),
                            source_shelf_id: None,
                            production_shelf_id: None,
                            delivery_rows: Vec::new(),
                            total_delivered_qty: 0.0,
                            is_confirmed: false,
                            order_requirements: Vec::new(),
                        });
                        index_by_key.insert(key.clone(), groups.len() - 1);
                        groups.len() - 1
                    }
                };

                let group = &mut groups[position];
                merge_pieces(&mut group.pieces, &pieces);
                if group.source_shelf_id.is_none() {
                    group.source_shelf_id = row.source_shelf_id;
                }
                if group.production_shelf_id.is_none() {
                    group.production_shelf_id =
                        row.production_shelf_id.or(order.production_shelf_id);
                }
                group.order_requirements.push(OrderRequirement {
                    order_id: order.order_id,
                    row_index,
                    row_key: row.row_key.clone(),
                    pieces,
                    total_usage,
                });
            }
        }

        if !unresolved_rows.is_empty() {
            warn!(
                unresolved = unresolved_rows.len(),
                "存在未选择商品的需求行，已跳过归集"
            );
        }
        info!(groups = groups.len(), "物料需求归集完成");

        Ok(Draft {
            order_ids: orders.iter().map(|o| o.order_id).collect(),
            groups,
            unresolved_rows,
            created_at: Utc::now().naive_utc(),
        })
    }

    /// 用缓存草稿恢复操作员的录入
    ///
    /// # 规则
    /// - 组键仍存在: 恢复交付行与货架选择
    /// - 需求明细未变化时才恢复确认状态
    /// - 组键已消失: 丢弃，并记录日志
    pub fn restore_draft(&self, fresh: Draft, cached: &Draft) -> Draft {
        let mut restored = fresh;

        for group in restored.groups.iter_mut() {
            let Some(previous) = cached.group(&group.key) else {
                continue;
            };

            group.delivery_rows = previous.delivery_rows.clone();
            if previous.source_shelf_id.is_some() {
                group.source_shelf_id = previous.source_shelf_id;
            }
            if previous.production_shelf_id.is_some() {
                group.production_shelf_id = previous.production_shelf_id;
            }
            group.recompute_totals();
            group.is_confirmed =
                previous.is_confirmed && previous.order_requirements == group.order_requirements;

            debug!(group_key = %group.key, rows = group.delivery_rows.len(), "已恢复草稿物料组");
        }

        let dropped = cached
            .groups
            .iter()
            .filter(|g| restored.group(&g.key).is_none())
            .count();
        if dropped > 0 {
            warn!(dropped, "缓存草稿中的部分物料组已不存在，已丢弃");
        }

        restored
    }
}

/// 同名同规格同单位的部件合并数量与用量，其余按首次出现顺序追加
///
/// 单件用量依赖各工单数量，不可相加，合并后保留首次出现的值
fn merge_pieces(merged: &mut Vec<GroupPiece>, incoming: &[GroupPiece]) {
    for piece in incoming {
        match merged
            .iter_mut()
            .find(|existing| existing.merge_key() == piece.merge_key())
        {
            Some(existing) => {
                existing.quantity += piece.quantity;
                existing.total_usage += piece.total_usage;
                existing.sub_usage = match (existing.sub_usage, piece.sub_usage) {
                    (Some(a), Some(b)) => Some(a + b),
                    (a, b) => a.or(b),
                };
            }
            None => merged.push(piece.clone()),
        }
    }
}
