// ==========================================
// 生产领料与库存移动引擎 - 交付量分摊引擎
// ==========================================
// 职责: 把物料组的合计交付量按需求比例分摊回各工单与部件
// 红线: 分摊结果之和必须严格等于输入（最后一项吸收浮点余量）
// ==========================================
// 规则:
// - alloc_i = D × (need_i / Σneed)，i = 0..n-2（Σneed = 0 时平均分配）
// - alloc_{n-1} = D − Σ_{i<n-1} alloc_i
// - 工单内部按部件 total_usage 以同一规则再分一次
// 注意: 吸收余量的总是输入顺序中的最后一项，调用方不得重排输入
// ==========================================

use crate::domain::material_group::StartMaterialGroup;
use crate::engine::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// 按权重比例拆分总量，最后一项吸收余量
///
/// 权重之和为 0（或非有限）时平均拆分
pub fn split_proportionally(total: f64, weights: &[f64]) -> Vec<f64> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }

    let weight_sum: f64 = weights.iter().sum();
    let mut parts = Vec::with_capacity(n);
    let mut assigned = 0.0;

    for weight in &weights[..n - 1] {
        let part = if weight_sum.is_finite() && weight_sum != 0.0 {
            total * (weight / weight_sum)
        } else {
            total / n as f64
        };
        assigned += part;
        parts.push(part);
    }
    parts.push(total - assigned);
    parts
}

// ==========================================
// PieceDeliveredMap - 部件交付量
// ==========================================
/// 同时按部件键和下标索引，定位持久化部件时容错匹配
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PieceDeliveredMap {
    pub by_key: BTreeMap<String, f64>,
    pub by_index: Vec<f64>,
}

impl PieceDeliveredMap {
    /// 先按键查找，找不到再按下标
    pub fn get(&self, key: Option<&str>, index: usize) -> Option<f64> {
        key.and_then(|k| self.by_key.get(k).copied())
            .or_else(|| self.by_index.get(index).copied())
    }

    pub fn total(&self) -> f64 {
        self.by_index.iter().sum()
    }
}

// ==========================================
// RequirementAllocation - 单条需求的分摊结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementAllocation {
    pub order_id: i64,
    pub row_index: usize,
    pub row_key: Option<String>,
    pub delivered_qty: f64,
    pub piece_delivered: PieceDeliveredMap,
}

// ==========================================
// AllocationSplitter - 分摊引擎
// ==========================================
pub struct AllocationSplitter {
    /// 守恒自检的相对容差
    tolerance: f64,
}

impl Default for AllocationSplitter {
    fn default() -> Self {
        Self::new(1e-6)
    }
}

impl AllocationSplitter {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// 分摊物料组的合计交付量
    ///
    /// # 返回
    /// 按 order_requirements 原顺序排列的分摊结果
    ///
    /// # 错误
    /// - Validation: 物料组没有任何需求贡献
    /// - InconsistentAllocation: 守恒自检失败（正常情况下不可达）
    #[instrument(skip(self, group), fields(group_key = %group.key))]
    pub fn split(&self, group: &StartMaterialGroup) -> EngineResult<Vec<RequirementAllocation>> {
        if group.order_requirements.is_empty() {
            return Err(EngineError::Validation(format!(
                "物料组没有工单需求，无法分摊: {}",
                group.key
            )));
        }

        let delivered = group.total_delivered_qty;
        let needs: Vec<f64> = group
            .order_requirements
            .iter()
            .map(|r| r.total_usage)
            .collect();
        let parts = split_proportionally(delivered, &needs);

        let allocations: Vec<RequirementAllocation> = group
            .order_requirements
            .iter()
            .zip(parts)
            .map(|(requirement, part)| {
                let weights: Vec<f64> = requirement.pieces.iter().map(|p| p.total_usage).collect();
                let piece_parts = split_proportionally(part, &weights);

                let mut piece_delivered = PieceDeliveredMap::default();
                for (piece, qty) in requirement.pieces.iter().zip(piece_parts.iter()) {
                    piece_delivered.by_key.insert(piece.key.clone(), *qty);
                }
                piece_delivered.by_index = piece_parts;

                RequirementAllocation {
                    order_id: requirement.order_id,
                    row_index: requirement.row_index,
                    row_key: requirement.row_key.clone(),
                    delivered_qty: part,
                    piece_delivered,
                }
            })
            .collect();

        let actual: f64 = allocations.iter().map(|a| a.delivered_qty).sum();
        self.check_conservation(&group.key, delivered, actual)?;
        for allocation in &allocations {
            if !allocation.piece_delivered.by_index.is_empty() {
                self.check_conservation(
                    &group.key,
                    allocation.delivered_qty,
                    allocation.piece_delivered.total(),
                )?;
            }
        }

        debug!(requirements = allocations.len(), delivered, "交付量分摊完成");
        Ok(allocations)
    }

    fn check_conservation(&self, group_key: &str, expected: f64, actual: f64) -> EngineResult<()> {
        let bound = self.tolerance * expected.abs().max(1.0);
        if (actual - expected).abs() > bound || !actual.is_finite() {
            return Err(EngineError::InconsistentAllocation {
                group_key: group_key.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::material_group::{GroupPiece, OrderRequirement};

    fn piece(key: &str, total_usage: f64) -> GroupPiece {
        GroupPiece {
            key: key.to_string(),
            name: key.to_string(),
            length: 1.0,
            width: 1.0,
            quantity: 1.0,
            main_unit: None,
            sub_unit: None,
            per_item_usage: total_usage,
            total_usage,
            sub_usage: None,
        }
    }

    fn requirement(order_id: i64, pieces: Vec<GroupPiece>) -> OrderRequirement {
        let total_usage = pieces.iter().map(|p| p.total_usage).sum();
        OrderRequirement {
            order_id,
            row_index: 0,
            row_key: Some(format!("row-{}", order_id)),
            pieces,
            total_usage,
        }
    }

    fn group(delivered: f64, requirements: Vec<OrderRequirement>) -> StartMaterialGroup {
        StartMaterialGroup {
            key: "board::1".to_string(),
            category: "board".to_string(),
            category_label: None,
            selected_product_id: 1,
            product_name: None,
            product_code: None,
            pieces: Vec::new(),
            source_shelf_id: Some(1),
            production_shelf_id: Some(2),
            delivery_rows: Vec::new(),
            total_delivered_qty: delivered,
            is_confirmed: true,
            order_requirements: requirements,
        }
    }

    #[test]
    fn test_split_proportionally_last_absorbs_remainder() {
        let parts = split_proportionally(10.0, &[1.0, 1.0, 1.0]);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], parts[1]);
        assert_eq!(parts[2], 10.0 - (parts[0] + parts[1]));
        assert_eq!(parts[0] + parts[1] + parts[2], 10.0);
        assert!((parts[2] - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weights_split_evenly() {
        let parts = split_proportionally(9.0, &[0.0, 0.0, 0.0]);
        assert_eq!(parts, vec![3.0, 3.0, 3.0]);
        assert!(split_proportionally(5.0, &[]).is_empty());
    }

    #[test]
    fn test_two_orders_30_10_share_36() {
        let g = group(
            36.0,
            vec![
                requirement(1, vec![piece("A", 30.0)]),
                requirement(2, vec![piece("A", 10.0)]),
            ],
        );
        let allocations = AllocationSplitter::default().split(&g).unwrap();

        assert_eq!(allocations[0].order_id, 1);
        assert_eq!(allocations[0].delivered_qty, 27.0);
        assert_eq!(allocations[1].order_id, 2);
        assert_eq!(allocations[1].delivered_qty, 9.0);
        assert_eq!(allocations[0].delivered_qty + allocations[1].delivered_qty, 36.0);
    }

    #[test]
    fn test_conservation_for_various_totals() {
        for delivered in [0.0, 1.0, 100.33, 7.123456789] {
            let g = group(
                delivered,
                vec![
                    requirement(1, vec![piece("A", 3.0), piece("B", 2.0)]),
                    requirement(2, vec![piece("A", 2.0)]),
                    requirement(3, vec![piece("C", 1.0), piece("D", 0.5)]),
                ],
            );
            assert_eq!(g.total_usage(), 8.5);
            let allocations = AllocationSplitter::default().split(&g).unwrap();

            // 最后一项吸收余量，逐项累加与输入严格相等
            let last = allocations.len() - 1;
            let head: f64 = allocations[..last].iter().map(|a| a.delivered_qty).sum();
            assert_eq!(head + allocations[last].delivered_qty, delivered, "D={}", delivered);

            for allocation in &allocations {
                let pieces = &allocation.piece_delivered.by_index;
                let head: f64 = pieces[..pieces.len() - 1].iter().sum();
                assert_eq!(
                    head + pieces[pieces.len() - 1],
                    allocation.delivered_qty,
                    "部件分摊之和必须等于工单分摊量"
                );
            }
        }
    }

    #[test]
    fn test_piece_map_by_key_and_index() {
        let g = group(
            10.0,
            vec![requirement(1, vec![piece("0#A", 3.0), piece("1#B", 1.0)])],
        );
        let allocations = AllocationSplitter::default().split(&g).unwrap();
        let map = &allocations[0].piece_delivered;

        assert_eq!(map.get(Some("0#A"), 99), Some(7.5));
        assert_eq!(map.get(Some("unknown"), 1), Some(2.5));
        assert_eq!(map.get(None, 5), None);
    }

    #[test]
    fn test_requirements_without_usage_share_evenly() {
        let g = group(
            6.0,
            vec![requirement(1, vec![piece("A", 0.0)]), requirement(2, vec![piece("A", 0.0)])],
        );
        let allocations = AllocationSplitter::default().split(&g).unwrap();
        assert_eq!(allocations[0].delivered_qty, 3.0);
        assert_eq!(allocations[1].delivered_qty, 3.0);
    }

    #[test]
    fn test_group_without_requirements_rejected() {
        let g = group(5.0, Vec::new());
        let err = AllocationSplitter::default().split(&g).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
