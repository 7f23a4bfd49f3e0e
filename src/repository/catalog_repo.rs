// ==========================================
// 生产领料与库存移动引擎 - 目录数据仓储
// ==========================================
// 职责: 商品 / 类别 / 仓库 / 货架 主数据读取与登记
// 说明: 主数据由外部系统维护，这里只提供引擎所需的查找
//       以及初始化/测试用的登记入口
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::inventory::{ProductInfo, ProductStockSummary, ShelfInfo};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// CatalogRepository - 目录数据仓储
// ==========================================
pub struct CatalogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogRepository {
    /// 创建新的 CatalogRepository 实例
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

    /// 查询商品
    pub fn find_product(&self, product_id: i64) -> RepositoryResult<Option<ProductInfo>> {
        let conn = self.get_conn()?;
        let product = conn
            .query_row(
                r#"
                SELECT product_id, code, name, category_code, main_unit, sub_unit, sub_unit_ratio
                FROM product
                WHERE product_id = ?1
                "#,
                params![product_id],
                |row| {
                    Ok(ProductInfo {
                        product_id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                        category_code: row.get(3)?,
                        main_unit: row.get(4)?,
                        sub_unit: row.get(5)?,
                        sub_unit_ratio: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(product)
    }

    /// 查询商品库存缓存
    pub fn find_product_stock(&self, product_id: i64) -> RepositoryResult<Option<ProductStockSummary>> {
        let conn = self.get_conn()?;
        let summary = conn
            .query_row(
                "SELECT product_id, stock, sub_stock FROM product WHERE product_id = ?1",
                params![product_id],
                |row| {
                    Ok(ProductStockSummary {
                        product_id: row.get(0)?,
                        stock: row.get(1)?,
                        sub_stock: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    /// 查询类别显示名
    pub fn find_category_label(&self, code: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let label = conn
            .query_row(
                "SELECT label FROM category WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(label)
    }

    /// 查询货架
    pub fn find_shelf(&self, shelf_id: i64) -> RepositoryResult<Option<ShelfInfo>> {
        let conn = self.get_conn()?;
        let shelf = conn
            .query_row(
                "SELECT shelf_id, warehouse_id, name FROM shelf WHERE shelf_id = ?1",
                params![shelf_id],
                |row| {
                    Ok(ShelfInfo {
                        shelf_id: row.get(0)?,
                        warehouse_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(shelf)
    }

    // ==========================================
    // 登记
    // ==========================================

    /// 登记商品（库存缓存初始为 0）
    pub fn insert_product(&self, product: &ProductInfo) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO product (
                product_id, code, name, category_code, main_unit, sub_unit, sub_unit_ratio, stock
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
            "#,
            params![
                product.product_id,
                product.code,
                product.name,
                product.category_code,
                product.main_unit,
                product.sub_unit,
                product.sub_unit_ratio,
            ],
        )?;
        Ok(())
    }

    /// 登记类别（已存在则更新显示名）
    pub fn upsert_category(&self, code: &str, label: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO category (code, label) VALUES (?1, ?2)
            ON CONFLICT(code) DO UPDATE SET label = excluded.label
            "#,
            params![code, label],
        )?;
        Ok(())
    }

    /// 登记仓库
    pub fn insert_warehouse(&self, warehouse_id: i64, name: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO warehouse (warehouse_id, name) VALUES (?1, ?2)",
            params![warehouse_id, name],
        )?;
        Ok(())
    }

    /// 登记货架
    pub fn insert_shelf(&self, shelf: &ShelfInfo) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO shelf (shelf_id, warehouse_id, name) VALUES (?1, ?2, ?3)",
            params![shelf.shelf_id, shelf.warehouse_id, shelf.name],
        )?;
        Ok(())
    }
}
