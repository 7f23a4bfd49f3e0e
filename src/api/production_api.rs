// ==========================================
// 生产领料与库存移动引擎 - 生产 API
// ==========================================
// 职责: 请求处理入口，按ID加载工单，调用引擎，转换错误
// 说明: 草稿 (Draft) 由调用方持有并回传，API 在两次调用之间不保存草稿
// ==========================================

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, EngineConfig};
use crate::db::{get_default_db_path, init_schema, open_sqlite_connection};
use crate::domain::inventory::{InventoryMove, ProductStockSummary, ShelfStockRecord};
use crate::domain::material_group::{DeliveryRowField, Draft, StartMaterialGroup};
use crate::domain::order::{MaterialRequirementRow, ProductionOrder};
use crate::domain::types::{ProductionStatus, TransferMode};
use crate::engine::aggregator::MaterialRequirementAggregator;
use crate::engine::inventory_move::InventoryMoveEngine;
use crate::engine::ledger::DeliveryLedger;
use crate::engine::lifecycle::{ProductionLifecycleController, TransitionOutcome};
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::error::RepositoryError;
use crate::repository::order_repo::ProductionOrderRepository;
use crate::repository::shelf_stock_repo::ShelfStockRepository;
use crate::repository::transition_repo::TransitionRepository;

// ==========================================
// ProductionApi - 生产 API
// ==========================================

/// 生产API
///
/// 职责：
/// 1. 开工草稿的生成与恢复
/// 2. 交付台账维护与物料组确认
/// 3. 开工 / 停工 / 完工
/// 4. 货架库存查询与调拨
pub struct ProductionApi {
    order_repo: Arc<ProductionOrderRepository>,
    catalog_repo: Arc<CatalogRepository>,
    stock_repo: Arc<ShelfStockRepository>,
    config_manager: Arc<ConfigManager>,
    config: EngineConfig,
    aggregator: MaterialRequirementAggregator,
    ledger: DeliveryLedger,
    move_engine: InventoryMoveEngine,
    lifecycle: ProductionLifecycleController,
}

impl ProductionApi {
    /// 打开数据库并创建 API 实例（表结构幂等初始化）
    pub fn new(db_path: &str) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path).map_err(|e| {
            ApiError::DatabaseConnectionError(format!("无法打开数据库{}: {}", db_path, e))
        })?;
        init_schema(&conn).map_err(RepositoryError::from)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 使用默认数据库路径创建 API 实例
    pub fn open_default() -> ApiResult<Self> {
        let db_path = get_default_db_path();
        info!(db_path = %db_path, "打开默认数据库");
        Self::new(&db_path)
    }

    /// 基于共享连接创建 API 实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let config = config_manager.load_engine_config()?;
        debug!(?config, "引擎参数已加载");

        let stock_repo = Arc::new(ShelfStockRepository::from_connection(conn.clone()));
        let transition_repo = Arc::new(TransitionRepository::from_connection(conn.clone()));

        Ok(Self {
            order_repo: Arc::new(ProductionOrderRepository::from_connection(conn.clone())),
            catalog_repo: Arc::new(CatalogRepository::from_connection(conn)),
            stock_repo: stock_repo.clone(),
            config_manager,
            aggregator: MaterialRequirementAggregator::new(),
            ledger: DeliveryLedger::new(config.stock_epsilon),
            move_engine: InventoryMoveEngine::new(stock_repo.clone(), config.stock_epsilon),
            lifecycle: ProductionLifecycleController::new(
                transition_repo,
                stock_repo,
                config.clone(),
            ),
            config,
        })
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    /// 配置快照（JSON）
    pub fn config_snapshot(&self) -> ApiResult<String> {
        Ok(self.config_manager.get_config_snapshot()?)
    }

    fn group_mut<'a>(draft: &'a mut Draft, group_key: &str) -> ApiResult<&'a mut StartMaterialGroup> {
        draft
            .group_mut(group_key)
            .ok_or_else(|| ApiError::NotFound(format!("物料组{}不存在", group_key)))
    }

    fn load_orders(&self, order_ids: &[i64]) -> ApiResult<Vec<ProductionOrder>> {
        if order_ids.is_empty() {
            return Err(ApiError::InvalidInput("工单ID列表不能为空".to_string()));
        }
        let mut seen = HashSet::with_capacity(order_ids.len());
        if let Some(dup) = order_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ApiError::ValidationError(format!(
                "工单ID重复: order_id={}",
                dup
            )));
        }
        Ok(self.order_repo.find_by_ids(order_ids)?)
    }

    // ==========================================
    // 需求行维护
    // ==========================================

    /// 覆写工单的物料需求行（外部 BOM 编辑器写入口，仅限待生产工单）
    pub fn update_requirement_rows(
        &self,
        order_id: i64,
        rows: &[MaterialRequirementRow],
    ) -> ApiResult<()> {
        let order = self.get_order(order_id)?;
        if order.status != ProductionStatus::Pending {
            return Err(ApiError::ValidationError(format!(
                "只有待生产工单可以修改需求行: order_id={}, status={}",
                order_id, order.status
            )));
        }
        self.order_repo.update_requirement_rows(order_id, rows)?;
        Ok(())
    }

    // ==========================================
    // 草稿
    // ==========================================

    /// 为一批工单生成开工草稿
    #[instrument(skip(self))]
    pub fn prepare_draft(&self, order_ids: &[i64]) -> ApiResult<Draft> {
        let orders = self.load_orders(order_ids)?;
        let draft = self
            .aggregator
            .build_draft(&orders, self.catalog_repo.as_ref())?;
        Ok(draft)
    }

    /// 重新生成草稿并恢复缓存草稿中的操作员录入
    #[instrument(skip(self, cached))]
    pub fn restore_draft(&self, order_ids: &[i64], cached: &Draft) -> ApiResult<Draft> {
        let fresh = self.prepare_draft(order_ids)?;
        Ok(self.aggregator.restore_draft(fresh, cached))
    }

    // ==========================================
    // 交付台账
    // ==========================================

    pub fn add_delivery_row(&self, draft: &mut Draft, group_key: &str) -> ApiResult<String> {
        let group = Self::group_mut(draft, group_key)?;
        Ok(self.ledger.add_row(group))
    }

    pub fn edit_delivery_row(
        &self,
        draft: &mut Draft,
        group_key: &str,
        row_id: &str,
        field: DeliveryRowField,
    ) -> ApiResult<()> {
        let group = Self::group_mut(draft, group_key)?;
        Ok(self.ledger.edit_row(group, row_id, field)?)
    }

    pub fn delete_delivery_rows(
        &self,
        draft: &mut Draft,
        group_key: &str,
        row_ids: &[String],
    ) -> ApiResult<usize> {
        let group = Self::group_mut(draft, group_key)?;
        Ok(self.ledger.delete_rows(group, row_ids))
    }

    pub fn transfer_delivery_rows(
        &self,
        draft: &mut Draft,
        from_key: &str,
        to_key: &str,
        row_ids: &[String],
        mode: TransferMode,
    ) -> ApiResult<Vec<String>> {
        Ok(self
            .ledger
            .transfer_rows(draft, from_key, to_key, row_ids, mode)?)
    }

    /// 设置物料组的出库货架与生产货架
    pub fn set_group_shelves(
        &self,
        draft: &mut Draft,
        group_key: &str,
        source_shelf_id: Option<i64>,
        production_shelf_id: Option<i64>,
    ) -> ApiResult<()> {
        for shelf_id in [source_shelf_id, production_shelf_id].into_iter().flatten() {
            if self.catalog_repo.find_shelf(shelf_id)?.is_none() {
                return Err(ApiError::NotFound(format!("货架{}不存在", shelf_id)));
            }
        }
        let group = Self::group_mut(draft, group_key)?;
        self.ledger.set_source_shelf(group, source_shelf_id);
        self.ledger.set_production_shelf(group, production_shelf_id);
        Ok(())
    }

    /// 确认物料组（检查出库货架库存）
    pub fn confirm_group(&self, draft: &mut Draft, group_key: &str) -> ApiResult<()> {
        let group = Self::group_mut(draft, group_key)?;
        Ok(self.ledger.confirm(group, self.stock_repo.as_ref())?)
    }

    pub fn unconfirm_group(&self, draft: &mut Draft, group_key: &str) -> ApiResult<()> {
        let group = Self::group_mut(draft, group_key)?;
        self.ledger.unconfirm(group);
        Ok(())
    }

    // ==========================================
    // 状态流转
    // ==========================================

    /// 开工（草稿中的全部工单一起开工）
    #[instrument(skip(self, draft), fields(order_ids = ?draft.order_ids))]
    pub fn start_production(&self, draft: &Draft) -> ApiResult<TransitionOutcome> {
        let orders = self.load_orders(&draft.order_ids)?;
        let outcome = self.lifecycle.start(draft, &orders)?;
        info!(orders = outcome.orders.len(), "开工请求完成");
        Ok(outcome)
    }

    /// 停工
    #[instrument(skip(self))]
    pub fn stop_production(&self, order_id: i64) -> ApiResult<ProductionOrder> {
        let order = self.get_order(order_id)?;
        let outcome = self.lifecycle.stop(&order)?;
        Self::single_order(outcome, order_id)
    }

    /// 完工
    #[instrument(skip(self))]
    pub fn complete_production(
        &self,
        order_id: i64,
        output_product_id: Option<i64>,
        output_shelf_id: Option<i64>,
        quantity: f64,
    ) -> ApiResult<ProductionOrder> {
        let order = self.get_order(order_id)?;
        let outcome =
            self.lifecycle
                .complete(&order, output_product_id, output_shelf_id, quantity)?;
        Self::single_order(outcome, order_id)
    }

    fn single_order(outcome: TransitionOutcome, order_id: i64) -> ApiResult<ProductionOrder> {
        outcome.orders.into_iter().next().ok_or_else(|| {
            ApiError::InternalError(format!("状态流转未返回工单: order_id={}", order_id))
        })
    }

    /// 记录产线交接移动（完工时优先消耗）
    pub fn record_handoff(&self, order_id: i64, moves: &[InventoryMove]) -> ApiResult<()> {
        let order = self.get_order(order_id)?;
        if order.status != ProductionStatus::InProgress {
            return Err(ApiError::ValidationError(format!(
                "只有生产中的工单可以记录交接: order_id={}, status={}",
                order_id, order.status
            )));
        }
        if let Some(bad) = moves
            .iter()
            .find(|mv| !mv.quantity.is_finite() || mv.quantity < 0.0)
        {
            return Err(ApiError::InvalidInput(format!(
                "交接数量无效: product_id={}, quantity={}",
                bad.product_id, bad.quantity
            )));
        }
        self.order_repo.set_handoff_moves(order_id, moves)?;
        info!(order_id, moves = moves.len(), "产线交接已记录");
        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_order(&self, order_id: i64) -> ApiResult<ProductionOrder> {
        self.order_repo
            .find_by_id(order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("工单{}不存在", order_id)))
    }

    pub fn shelf_stock(&self, product_id: i64, shelf_id: i64) -> ApiResult<f64> {
        Ok(self.stock_repo.get_stock(product_id, shelf_id)?)
    }

    pub fn list_shelf_stock(&self, product_id: i64) -> ApiResult<Vec<ShelfStockRecord>> {
        Ok(self.stock_repo.list_by_product(product_id)?)
    }

    pub fn product_stock(&self, product_id: i64) -> ApiResult<ProductStockSummary> {
        self.catalog_repo
            .find_product_stock(product_id)?
            .ok_or_else(|| ApiError::NotFound(format!("商品{}不存在", product_id)))
    }

    // ==========================================
    // 库存调拨
    // ==========================================

    /// 货架间调拨（与生产流程无关的手工移库）
    pub fn transfer_stock(&self, moves: &[InventoryMove]) -> ApiResult<Vec<ProductStockSummary>> {
        Ok(self.move_engine.apply_moves(moves)?)
    }

    /// 盘点: 直接设定货架库存
    pub fn set_shelf_stock(&self, product_id: i64, shelf_id: i64, stock: f64) -> ApiResult<()> {
        self.stock_repo.set_stock(product_id, shelf_id, stock)?;
        info!(product_id, shelf_id, stock, "货架库存已盘点");
        Ok(())
    }

    /// 重算商品库存缓存
    pub fn resync_product_stock(&self, product_id: i64) -> ApiResult<ProductStockSummary> {
        Ok(self.move_engine.sync_product_stock(product_id)?)
    }
}
