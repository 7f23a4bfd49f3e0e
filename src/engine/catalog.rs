// ==========================================
// 生产领料与库存移动引擎 - 外部协作方接口
// ==========================================
// 职责: 引擎所需的商品目录 / 类别 / 货架库存读取接口
// 实现者: CatalogRepository、ShelfStockRepository（SQLite），
//         StaticCatalog（调用方已加载好目录数据时使用）
// ==========================================

use crate::domain::inventory::ProductInfo;
use crate::repository::catalog_repo::CatalogRepository;
use crate::repository::error::RepositoryResult;
use crate::repository::shelf_stock_repo::ShelfStockRepository;
use std::collections::HashMap;

/// 商品目录与类别显示名查找
pub trait MaterialCatalog {
    fn product(&self, product_id: i64) -> RepositoryResult<Option<ProductInfo>>;

    fn category_label(&self, category: &str) -> RepositoryResult<Option<String>>;
}

/// 货架库存读取
pub trait StockReader {
    /// 商品在货架上的库存（无记录视为 0）
    fn shelf_stock(&self, product_id: i64, shelf_id: i64) -> RepositoryResult<f64>;
}

impl MaterialCatalog for CatalogRepository {
    fn product(&self, product_id: i64) -> RepositoryResult<Option<ProductInfo>> {
        self.find_product(product_id)
    }

    fn category_label(&self, category: &str) -> RepositoryResult<Option<String>> {
        self.find_category_label(category)
    }
}

impl StockReader for ShelfStockRepository {
    fn shelf_stock(&self, product_id: i64, shelf_id: i64) -> RepositoryResult<f64> {
        self.get_stock(product_id, shelf_id)
    }
}

// ==========================================
// StaticCatalog - 内存目录
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    products: HashMap<i64, ProductInfo>,
    category_labels: HashMap<String, String>,
    stocks: HashMap<(i64, i64), f64>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product: ProductInfo) -> Self {
        self.products.insert(product.product_id, product);
        self
    }

    pub fn with_category(mut self, code: &str, label: &str) -> Self {
        self.category_labels
            .insert(code.to_string(), label.to_string());
        self
    }

    pub fn with_stock(mut self, product_id: i64, shelf_id: i64, stock: f64) -> Self {
        self.stocks.insert((product_id, shelf_id), stock);
        self
    }
}

impl MaterialCatalog for StaticCatalog {
    fn product(&self, product_id: i64) -> RepositoryResult<Option<ProductInfo>> {
        Ok(self.products.get(&product_id).cloned())
    }

    fn category_label(&self, category: &str) -> RepositoryResult<Option<String>> {
        Ok(self.category_labels.get(category).cloned())
    }
}

impl StockReader for StaticCatalog {
    fn shelf_stock(&self, product_id: i64, shelf_id: i64) -> RepositoryResult<f64> {
        Ok(self
            .stocks
            .get(&(product_id, shelf_id))
            .copied()
            .unwrap_or(0.0))
    }
}
