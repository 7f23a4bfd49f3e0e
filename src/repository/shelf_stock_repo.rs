// ==========================================
// 生产领料与库存移动引擎 - 货架库存仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 出库必须是带条件的原子更新 (stock >= 请求量)，
//       不允许“先读后写”的无保护读改写
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::inventory::{
    convert_to_sub_unit, ProductStockSummary, ShelfStockRecord, StockLeg,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{
    params, Connection, OptionalExtension, Result as SqliteResult, TransactionBehavior,
};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ==========================================
// ShelfStockRepository - 货架库存仓储
// ==========================================
/// 货架库存仓储
/// 职责: 管理 shelf_stock 表，并维护 product.stock 缓存
pub struct ShelfStockRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ShelfStockRepository {
    /// 创建新的 ShelfStockRepository 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

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

    // ==========================================
    // 查询
    // ==========================================

    /// 按主键查询
    ///
    /// # 返回
    /// - Ok(Some(record)): 存在库存记录
    /// - Ok(None): 该货架从未存放过该商品
    pub fn find(&self, product_id: i64, shelf_id: i64) -> RepositoryResult<Option<ShelfStockRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                r#"
                SELECT product_id, shelf_id, warehouse_id, stock
                FROM shelf_stock
                WHERE product_id = ?1 AND shelf_id = ?2
                "#,
                params![product_id, shelf_id],
                map_row,
            )
            .optional()?;
        Ok(record)
    }

    /// 查询货架库存数量（无记录视为 0）
    pub fn get_stock(&self, product_id: i64, shelf_id: i64) -> RepositoryResult<f64> {
        Ok(self
            .find(product_id, shelf_id)?
            .map(|r| r.stock)
            .unwrap_or(0.0))
    }

    /// 查询商品在所有货架上的库存
    pub fn list_by_product(&self, product_id: i64) -> RepositoryResult<Vec<ShelfStockRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT product_id, shelf_id, warehouse_id, stock
            FROM shelf_stock
            WHERE product_id = ?1
            ORDER BY shelf_id ASC
            "#,
        )?;
        let records = stmt
            .query_map(params![product_id], map_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(records)
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 直接设定货架库存（盘点/初始化用，warehouse_id 取自货架）
    pub fn set_stock(&self, product_id: i64, shelf_id: i64, stock: f64) -> RepositoryResult<()> {
        if !stock.is_finite() || stock < 0.0 {
            return Err(RepositoryError::FieldValueError {
                field: "stock".to_string(),
                message: format!("库存必须为非负数: {}", stock),
            });
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let affected = tx.execute(
            r#"
            INSERT INTO shelf_stock (product_id, shelf_id, warehouse_id, stock, updated_at)
            SELECT ?1, s.shelf_id, s.warehouse_id, ?3, datetime('now')
            FROM shelf s
            WHERE s.shelf_id = ?2
            ON CONFLICT(product_id, shelf_id)
            DO UPDATE SET stock = excluded.stock, updated_at = excluded.updated_at
            "#,
            params![product_id, shelf_id, stock],
        )?;
        if affected == 0 {
            return Err(shelf_not_found(shelf_id));
        }
        sync_product_stock_in_tx(&tx, product_id)?;
        tx.commit()?;
        Ok(())
    }

    /// 在单个事务中执行一批库存分录
    ///
    /// 任一分录失败（库存不足 / 货架不存在）时整批回滚，不留部分修改；
    /// 成功后重算涉及商品的库存缓存
    pub fn apply_legs(
        &self,
        legs: &[StockLeg],
        epsilon: f64,
    ) -> RepositoryResult<Vec<ProductStockSummary>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        apply_legs_in_tx(&tx, legs, epsilon)?;
        let summaries = sync_products_in_tx(&tx, legs.iter().map(|l| l.product_id))?;

        tx.commit()?;
        Ok(summaries)
    }

    /// 重算商品库存缓存（幂等，可随时调用）
    pub fn sync_product_stock(&self, product_id: i64) -> RepositoryResult<ProductStockSummary> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let summary = sync_product_stock_in_tx(&tx, product_id)?;
        tx.commit()?;
        Ok(summary)
    }
}

// ==========================================
// 事务内辅助函数（供跨仓储事务复用）
// ==========================================

fn map_row(row: &rusqlite::Row) -> SqliteResult<ShelfStockRecord> {
    Ok(ShelfStockRecord {
        product_id: row.get(0)?,
        shelf_id: row.get(1)?,
        warehouse_id: row.get(2)?,
        stock: row.get(3)?,
    })
}

fn shelf_not_found(shelf_id: i64) -> RepositoryError {
    RepositoryError::NotFound {
        entity: "shelf".to_string(),
        id: shelf_id.to_string(),
    }
}

/// 按顺序执行库存分录（调用方负责事务边界）
pub(crate) fn apply_legs_in_tx(
    conn: &Connection,
    legs: &[StockLeg],
    epsilon: f64,
) -> RepositoryResult<()> {
    // 上一条出库在容差内截断时少扣的量，由紧随其后的同商品入库分录扣回，保证总量守恒
    let mut clamped: Option<(i64, f64)> = None;

    for leg in legs {
        let carried = clamped.take();
        if leg.delta.abs() <= epsilon {
            continue;
        }

        let applied = if leg.is_decrement() {
            let requested = -leg.delta;
            let available: f64 = conn
                .query_row(
                    "SELECT stock FROM shelf_stock WHERE product_id = ?1 AND shelf_id = ?2",
                    params![leg.product_id, leg.shelf_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0.0);
            let insufficient = RepositoryError::InsufficientStock {
                product_id: leg.product_id,
                shelf_id: leg.shelf_id,
                available,
                requested,
            };
            if available + epsilon < requested {
                return Err(insufficient);
            }

            // 条件更新: 库存不足时不命中任何行；容差内的微小负值截断为 0
            let affected = conn.execute(
                r#"
                UPDATE shelf_stock
                SET stock = MAX(0, stock - ?3), updated_at = datetime('now')
                WHERE product_id = ?1 AND shelf_id = ?2 AND stock + ?4 >= ?3
                "#,
                params![leg.product_id, leg.shelf_id, requested, epsilon],
            )?;
            if affected == 0 {
                return Err(insufficient);
            }

            let removed = requested.min(available);
            if removed < requested {
                clamped = Some((leg.product_id, requested - removed));
            }
            -removed
        } else {
            let quantity = match carried {
                Some((product_id, shortfall)) if product_id == leg.product_id => {
                    (leg.delta - shortfall).max(0.0)
                }
                _ => leg.delta,
            };

            // 增量 upsert: 新建记录时继承目标货架的仓库
            let affected = conn.execute(
                r#"
                INSERT INTO shelf_stock (product_id, shelf_id, warehouse_id, stock, updated_at)
                SELECT ?1, s.shelf_id, s.warehouse_id, ?3, datetime('now')
                FROM shelf s
                WHERE s.shelf_id = ?2
                ON CONFLICT(product_id, shelf_id)
                DO UPDATE SET stock = stock + excluded.stock, updated_at = excluded.updated_at
                "#,
                params![leg.product_id, leg.shelf_id, quantity],
            )?;
            if affected == 0 {
                return Err(shelf_not_found(leg.shelf_id));
            }
            quantity
        };

        debug!(
            product_id = leg.product_id,
            shelf_id = leg.shelf_id,
            delta = applied,
            "库存分录已执行"
        );
    }
    Ok(())
}

/// 重算单个商品的库存缓存（主单位合计 + 辅单位折算）
pub(crate) fn sync_product_stock_in_tx(
    conn: &Connection,
    product_id: i64,
) -> RepositoryResult<ProductStockSummary> {
    let ratio: Option<f64> = conn
        .query_row(
            "SELECT sub_unit_ratio FROM product WHERE product_id = ?1",
            params![product_id],
            |row| row.get::<_, Option<f64>>(0),
        )
        .optional()?
        .ok_or_else(|| RepositoryError::NotFound {
            entity: "product".to_string(),
            id: product_id.to_string(),
        })?;

    let stock: f64 = conn.query_row(
        "SELECT COALESCE(SUM(stock), 0) FROM shelf_stock WHERE product_id = ?1",
        params![product_id],
        |row| row.get(0),
    )?;
    let sub_stock = convert_to_sub_unit(stock, ratio);

    conn.execute(
        "UPDATE product SET stock = ?2, sub_stock = ?3 WHERE product_id = ?1",
        params![product_id, stock, sub_stock],
    )?;

    Ok(ProductStockSummary {
        product_id,
        stock,
        sub_stock,
    })
}

/// 按首次出现顺序去重后批量重算
pub(crate) fn sync_products_in_tx(
    conn: &Connection,
    product_ids: impl IntoIterator<Item = i64>,
) -> RepositoryResult<Vec<ProductStockSummary>> {
    let mut seen: Vec<i64> = Vec::new();
    for id in product_ids {
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen.into_iter()
        .map(|id| sync_product_stock_in_tx(conn, id))
        .collect()
}
