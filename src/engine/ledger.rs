// ==========================================
// 生产领料与库存移动引擎 - 交付台账
// ==========================================
// 职责: 维护物料组的交付行（增 / 删 / 改 / 转移）与确认状态
// 红线: 每次修改后必须重算 delivered_qty 与组合计，并重置 is_confirmed
// ==========================================

use crate::domain::material_group::{Draft, DeliveryRow, DeliveryRowField, StartMaterialGroup};
use crate::domain::types::TransferMode;
use crate::engine::catalog::StockReader;
use crate::engine::error::{EngineError, EngineResult};
use tracing::{debug, info, instrument};
use uuid::Uuid;

// ==========================================
// DeliveryLedger - 交付台账
// ==========================================
pub struct DeliveryLedger {
    /// 库存与零比较的浮点容差
    epsilon: f64,
}

impl Default for DeliveryLedger {
    fn default() -> Self {
        Self::new(1e-9)
    }
}

impl DeliveryLedger {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// 修改后的统一收尾: 重算派生值并撤销确认
    fn touch(group: &mut StartMaterialGroup) {
        group.recompute_totals();
        group.is_confirmed = false;
    }

    fn new_row_id() -> String {
        Uuid::new_v4().to_string()
    }

    // ==========================================
    // 交付行维护
    // ==========================================

    /// 新增交付行（以组内第一个部件为默认值）
    ///
    /// # 返回
    /// 新行ID
    pub fn add_row(&self, group: &mut StartMaterialGroup) -> String {
        let id = Self::new_row_id();
        group
            .delivery_rows
            .push(DeliveryRow::from_piece(id.clone(), group.pieces.first()));
        Self::touch(group);
        debug!(group_key = %group.key, row_id = %id, "新增交付行");
        id
    }

    /// 批量删除交付行
    ///
    /// # 返回
    /// 实际删除的行数（不存在的ID忽略）
    pub fn delete_rows(&self, group: &mut StartMaterialGroup, row_ids: &[String]) -> usize {
        let before = group.delivery_rows.len();
        group
            .delivery_rows
            .retain(|row| !row_ids.iter().any(|id| id == &row.id));
        let removed = before - group.delivery_rows.len();
        Self::touch(group);
        debug!(group_key = %group.key, removed, "删除交付行");
        removed
    }

    /// 编辑交付行字段（数值字段非有限或为负时截断为 0）
    pub fn edit_row(
        &self,
        group: &mut StartMaterialGroup,
        row_id: &str,
        field: DeliveryRowField,
    ) -> EngineResult<()> {
        let group_key = group.key.clone();
        let row = group
            .delivery_rows
            .iter_mut()
            .find(|row| row.id == row_id)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "交付行不存在: group={}, row_id={}",
                    group_key, row_id
                ))
            })?;

        match field {
            DeliveryRowField::Name(name) => row.name = name,
            DeliveryRowField::Length(v) => row.length = clamp_non_negative(v),
            DeliveryRowField::Width(v) => row.width = clamp_non_negative(v),
            DeliveryRowField::Quantity(v) => row.quantity = clamp_non_negative(v),
            DeliveryRowField::MainUnit(unit) => row.main_unit = unit,
            DeliveryRowField::SubUnit(unit) => row.sub_unit = unit,
        }

        Self::touch(group);
        Ok(())
    }

    /// 把交付行转移到另一个物料组
    ///
    /// # 模式
    /// - Copy: 目标组生成新ID的副本，源组不变
    /// - Move: 原行从源组移除，保留原ID
    ///
    /// # 返回
    /// 目标组中新增行的ID
    #[instrument(skip(self, draft, row_ids), fields(count = row_ids.len()))]
    pub fn transfer_rows(
        &self,
        draft: &mut Draft,
        from_key: &str,
        to_key: &str,
        row_ids: &[String],
        mode: TransferMode,
    ) -> EngineResult<Vec<String>> {
        if from_key == to_key {
            return Err(EngineError::Validation(format!(
                "源物料组与目标物料组相同: {}",
                from_key
            )));
        }
        if draft.group(to_key).is_none() {
            return Err(EngineError::Validation(format!("目标物料组不存在: {}", to_key)));
        }

        let source = draft
            .group_mut(from_key)
            .ok_or_else(|| EngineError::Validation(format!("源物料组不存在: {}", from_key)))?;

        let selected: Vec<DeliveryRow> = source
            .delivery_rows
            .iter()
            .filter(|row| row_ids.iter().any(|id| id == &row.id))
            .cloned()
            .collect();

        let moved: Vec<DeliveryRow> = match mode {
            TransferMode::Copy => selected
                .into_iter()
                .map(|mut row| {
                    row.id = Self::new_row_id();
                    row
                })
                .collect(),
            TransferMode::Move => {
                source
                    .delivery_rows
                    .retain(|row| !row_ids.iter().any(|id| id == &row.id));
                Self::touch(source);
                selected
            }
        };

        let target = draft
            .group_mut(to_key)
            .ok_or_else(|| EngineError::Validation(format!("目标物料组不存在: {}", to_key)))?;
        let new_ids: Vec<String> = moved.iter().map(|row| row.id.clone()).collect();
        target.delivery_rows.extend(moved);
        Self::touch(target);

        info!(from = from_key, to = to_key, %mode, rows = new_ids.len(), "交付行已转移");
        Ok(new_ids)
    }

    // ==========================================
    // 货架选择
    // ==========================================

    pub fn set_source_shelf(&self, group: &mut StartMaterialGroup, shelf_id: Option<i64>) {
        group.source_shelf_id = shelf_id;
        Self::touch(group);
    }

    pub fn set_production_shelf(&self, group: &mut StartMaterialGroup, shelf_id: Option<i64>) {
        group.production_shelf_id = shelf_id;
        Self::touch(group);
    }

    // ==========================================
    // 确认
    // ==========================================

    /// 校验确认所需字段（不含库存检查）
    ///
    /// 返回第一个未满足的前置条件
    pub fn check_fields(&self, group: &StartMaterialGroup) -> EngineResult<(i64, i64)> {
        if group.selected_product_id <= 0 {
            return Err(EngineError::Validation(format!(
                "物料组未选择商品: {}",
                group.key
            )));
        }
        let source = group.source_shelf_id.ok_or_else(|| {
            EngineError::Validation(format!("物料组未选择出库货架: {}", group.key))
        })?;
        let production = group.production_shelf_id.ok_or_else(|| {
            EngineError::Validation(format!("物料组未选择生产货架: {}", group.key))
        })?;
        if source == production {
            return Err(EngineError::Validation(format!(
                "出库货架与生产货架不能相同: group={}, shelf_id={}",
                group.key, source
            )));
        }
        if !(group.total_delivered_qty > self.epsilon) {
            return Err(EngineError::Validation(format!(
                "物料组交付量必须大于0: group={}, total={}",
                group.key, group.total_delivered_qty
            )));
        }
        Ok((source, production))
    }

    /// 确认物料组
    ///
    /// # 前置条件（按顺序检查，报告第一个不满足项）
    /// 1. 已选商品
    /// 2. 已选出库货架
    /// 3. 已选生产货架，且与出库货架不同
    /// 4. 交付合计 > 0
    /// 5. 出库货架上该商品库存 > 0
    pub fn confirm<S>(&self, group: &mut StartMaterialGroup, stock: &S) -> EngineResult<()>
    where
        S: StockReader + ?Sized,
    {
        group.recompute_totals();
        let (source, _) = self.check_fields(group)?;

        let available = stock.shelf_stock(group.selected_product_id, source)?;
        if !(available > self.epsilon) {
            return Err(EngineError::Validation(format!(
                "出库货架无库存: group={}, product_id={}, shelf_id={}",
                group.key, group.selected_product_id, source
            )));
        }

        group.is_confirmed = true;
        info!(group_key = %group.key, total = group.total_delivered_qty, "物料组已确认");
        Ok(())
    }

    pub fn unconfirm(&self, group: &mut StartMaterialGroup) {
        group.is_confirmed = false;
    }
}

fn clamp_non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
