// ==========================================
// 生产状态流转集成测试
// ==========================================
// 测试目标: 开工 / 停工 / 完工的库存变化、分摊回写、校验与回滚
// ==========================================

mod test_helpers;

use production_inventory::api::{ApiError, ProductionApi};
use production_inventory::config::{config_keys, ConfigManager, EngineConfig};
use production_inventory::domain::{DeliveryRowField, Draft, InventoryMove, ProductionStatus};
use production_inventory::engine::{EngineError, ProductionLifecycleController};
use production_inventory::repository::{
    ProductionOrderRepository, RepositoryError, ShelfStockRepository, TransitionRepository,
};
use std::sync::Arc;
use tempfile::NamedTempFile;
use test_helpers::*;

const GROUP_P: &str = "board::1";

fn open_api(db_path: &str) -> ProductionApi {
    production_inventory::logging::init_test();
    ProductionApi::new(db_path).expect("Failed to create ProductionApi")
}

/// 单工单场景: 数量 10，单件用量 2（总需求 20）
fn setup_single_order() -> (NamedTempFile, String, ProductionApi) {
    let (temp_file, db_path) = setup_standard_scenario().expect("Failed to create test db");
    let order = build_order(
        1,
        10.0,
        vec![requirement_row("r1", "board", Some(PRODUCT_P), vec![piece("侧板", 2.0)])],
    );
    insert_order(&db_path, &order).expect("Failed to insert order");
    let api = open_api(&db_path);
    (temp_file, db_path, api)
}

/// 录入一条交付行（1 × 1 × quantity），设置货架并确认
fn prepare_confirmed_draft(api: &ProductionApi, order_ids: &[i64], delivered: f64) -> Draft {
    let mut draft = api.prepare_draft(order_ids).expect("生成草稿失败");
    api.set_group_shelves(&mut draft, GROUP_P, Some(SHELF_A), Some(SHELF_B))
        .expect("设置货架失败");
    let row_id = api.add_delivery_row(&mut draft, GROUP_P).expect("新增交付行失败");
    api.edit_delivery_row(
        &mut draft,
        GROUP_P,
        &row_id,
        DeliveryRowField::Quantity(delivered),
    )
    .expect("编辑交付行失败");
    api.confirm_group(&mut draft, GROUP_P).expect("确认物料组失败");
    draft
}

#[test]
fn test_start_moves_stock_and_writes_back_delivery() {
    let (_temp_file, _db_path, api) = setup_single_order();
    let draft = prepare_confirmed_draft(&api, &[1], 20.0);

    let group = draft.group(GROUP_P).unwrap();
    assert_eq!(group.total_delivered_qty, 20.0);
    assert_eq!(group.total_usage(), 20.0);

    let outcome = api.start_production(&draft).expect("开工应成功");
    assert_eq!(outcome.orders.len(), 1);

    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 80.0);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 20.0);

    let order = api.get_order(1).unwrap();
    assert_eq!(order.status, ProductionStatus::InProgress);
    assert!(order.started_at.is_some());
    assert_eq!(order.production_shelf_id, Some(SHELF_B));
    assert_eq!(
        order.production_moves,
        vec![InventoryMove::new(PRODUCT_P, SHELF_A, SHELF_B, 20.0)]
    );

    let row = &order.material_requirement_rows[0];
    assert_eq!(row.source_shelf_id, Some(SHELF_A));
    assert_eq!(row.production_shelf_id, Some(SHELF_B));
    assert_eq!(row.delivered_qty, Some(20.0));
    assert_eq!(row.pieces[0].delivered_qty, Some(20.0));
}

#[test]
fn test_start_then_stop_restores_stock() {
    let (_temp_file, _db_path, api) = setup_single_order();
    let draft = prepare_confirmed_draft(&api, &[1], 20.0);
    api.start_production(&draft).unwrap();

    let order = api.stop_production(1).expect("停工应成功");
    assert_eq!(order.status, ProductionStatus::Pending);
    assert!(order.stopped_at.is_some());
    assert!(order.production_moves.is_empty());
    assert_eq!(order.production_shelf_id, None);

    let row = &order.material_requirement_rows[0];
    assert_eq!(row.source_shelf_id, None);
    assert_eq!(row.delivered_qty, None);
    assert_eq!(row.pieces[0].delivered_qty, None);

    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 100.0);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 0.0);
    assert_eq!(api.product_stock(PRODUCT_P).unwrap().stock, 100.0);

    // 持久化结果与返回值一致
    assert_eq!(api.get_order(1).unwrap(), order);
}

#[test]
fn test_pooled_delivery_split_across_orders() {
    let (_temp_file, db_path) = setup_standard_scenario().unwrap();
    // 工单1需求 30，工单2需求 10
    insert_order(
        &db_path,
        &build_order(
            1,
            10.0,
            vec![requirement_row("r1", "board", Some(PRODUCT_P), vec![piece("侧板", 3.0)])],
        ),
    )
    .unwrap();
    insert_order(
        &db_path,
        &build_order(
            2,
            5.0,
            vec![requirement_row("r1", "board", Some(PRODUCT_P), vec![piece("背板", 2.0)])],
        ),
    )
    .unwrap();
    let api = open_api(&db_path);

    let draft = prepare_confirmed_draft(&api, &[1, 2], 36.0);
    let group = draft.group(GROUP_P).unwrap();
    assert_eq!(group.order_requirements.len(), 2);
    assert_eq!(group.total_usage(), 40.0);

    api.start_production(&draft).expect("开工应成功");
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 64.0);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 36.0);

    let order1 = api.get_order(1).unwrap();
    let order2 = api.get_order(2).unwrap();
    assert_eq!(order1.material_requirement_rows[0].delivered_qty, Some(27.0));
    assert_eq!(order2.material_requirement_rows[0].delivered_qty, Some(9.0));
    assert_eq!(order1.production_moves[0].quantity, 27.0);
    assert_eq!(order2.production_moves[0].quantity, 9.0);

    // 停工只冲回本工单的份额
    api.stop_production(2).expect("停工应成功");
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 73.0);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 27.0);
    assert_eq!(api.get_order(1).unwrap().status, ProductionStatus::InProgress);
}

#[test]
fn test_complete_consumes_and_adds_finished_goods() {
    let (_temp_file, _db_path, api) = setup_single_order();
    let draft = prepare_confirmed_draft(&api, &[1], 20.0);
    api.start_production(&draft).unwrap();

    let order = api
        .complete_production(1, Some(PRODUCT_Q), Some(SHELF_C), 10.0)
        .expect("完工应成功");
    assert_eq!(order.status, ProductionStatus::Completed);
    assert!(order.completed_at.is_some());
    assert_eq!(order.output_product_id, Some(PRODUCT_Q));
    assert_eq!(order.output_shelf_id, Some(SHELF_C));
    assert_eq!(order.output_quantity, Some(10.0));

    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 0.0);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 80.0);
    assert_eq!(api.shelf_stock(PRODUCT_Q, SHELF_C).unwrap(), 10.0);
    assert_eq!(api.product_stock(PRODUCT_P).unwrap().stock, 80.0);
    assert_eq!(api.product_stock(PRODUCT_Q).unwrap().stock, 10.0);

    // 完工后不可再停工
    let err = api.stop_production(1).unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }), "{:?}", err);
}

#[test]
fn test_complete_prefers_handoff_record() {
    let (_temp_file, _db_path, api) = setup_single_order();
    let draft = prepare_confirmed_draft(&api, &[1], 20.0);
    api.start_production(&draft).unwrap();

    api.record_handoff(1, &[InventoryMove::new(PRODUCT_P, SHELF_A, SHELF_B, 15.0)])
        .expect("记录交接应成功");
    api.complete_production(1, Some(PRODUCT_Q), Some(SHELF_C), 3.0)
        .expect("完工应成功");

    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 5.0);
    assert_eq!(api.shelf_stock(PRODUCT_Q, SHELF_C).unwrap(), 3.0);
}

#[test]
fn test_complete_validation_mutates_nothing() {
    let (_temp_file, _db_path, api) = setup_single_order();

    // 待生产工单不能完工
    let err = api
        .complete_production(1, Some(PRODUCT_Q), Some(SHELF_C), 10.0)
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }), "{:?}", err);

    let draft = prepare_confirmed_draft(&api, &[1], 20.0);
    api.start_production(&draft).unwrap();

    let err = api
        .complete_production(1, None, Some(SHELF_C), 10.0)
        .unwrap_err();
    assert!(err.to_string().contains("成品"), "{}", err);

    let err = api
        .complete_production(1, Some(PRODUCT_Q), None, 10.0)
        .unwrap_err();
    assert!(err.to_string().contains("货架"), "{}", err);

    let err = api
        .complete_production(1, Some(PRODUCT_Q), Some(SHELF_C), 0.0)
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)), "{:?}", err);

    assert_eq!(api.get_order(1).unwrap().status, ProductionStatus::InProgress);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 20.0);
    assert_eq!(api.shelf_stock(PRODUCT_Q, SHELF_C).unwrap(), 0.0);
}

#[test]
fn test_start_without_confirmed_group_rejected() {
    let (_temp_file, _db_path, api) = setup_single_order();
    let mut draft = prepare_confirmed_draft(&api, &[1], 20.0);
    api.unconfirm_group(&mut draft, GROUP_P).unwrap();

    let err = api.start_production(&draft).unwrap_err();
    match err {
        ApiError::ValidationError(msg) => assert!(msg.contains("已确认"), "{}", msg),
        other => panic!("Expected ValidationError, got {:?}", other),
    }

    assert_eq!(api.get_order(1).unwrap().status, ProductionStatus::Pending);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 100.0);
}

#[test]
fn test_start_insufficient_stock_rolls_back_everything() {
    let (_temp_file, _db_path, api) = setup_single_order();
    let draft = prepare_confirmed_draft(&api, &[1], 20.0);

    // 确认后库存被盘点调减
    api.set_shelf_stock(PRODUCT_P, SHELF_A, 5.0).unwrap();

    let err = api.start_production(&draft).unwrap_err();
    match err {
        ApiError::InsufficientStock {
            product_id,
            shelf_id,
            shortfall,
            ..
        } => {
            assert_eq!(product_id, PRODUCT_P);
            assert_eq!(shelf_id, SHELF_A);
            assert_eq!(shortfall, 15.0);
        }
        other => panic!("Expected InsufficientStock, got {:?}", other),
    }

    let order = api.get_order(1).unwrap();
    assert_eq!(order.status, ProductionStatus::Pending);
    assert!(order.production_moves.is_empty());
    assert_eq!(order.material_requirement_rows[0].delivered_qty, None);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 5.0);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 0.0);
}

#[test]
fn test_confirm_requires_source_stock() {
    let (_temp_file, db_path, api) = setup_single_order();
    let conn = open_test_connection(&db_path).unwrap();
    seed_stock(&conn, PRODUCT_P, SHELF_A, 0.0).unwrap();

    let mut draft = api.prepare_draft(&[1]).unwrap();
    api.set_group_shelves(&mut draft, GROUP_P, Some(SHELF_A), Some(SHELF_B))
        .unwrap();
    api.add_delivery_row(&mut draft, GROUP_P).unwrap();

    let err = api.confirm_group(&mut draft, GROUP_P).unwrap_err();
    assert!(err.to_string().contains("无库存"), "{}", err);
    assert!(!draft.group(GROUP_P).unwrap().is_confirmed);

    let err = api
        .set_group_shelves(&mut draft, GROUP_P, Some(999), Some(SHELF_B))
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[test]
fn test_stale_orders_lose_status_guard() {
    let (_temp_file, db_path, api) = setup_single_order();
    let draft = prepare_confirmed_draft(&api, &[1], 20.0);

    // 同一批待生产工单对象提交两次，第二次被状态守卫拦截
    let conn = shared_connection(&db_path).unwrap();
    let order_repo = ProductionOrderRepository::from_connection(conn.clone());
    let stale_orders = order_repo.find_by_ids(&[1]).unwrap();
    let controller = ProductionLifecycleController::new(
        Arc::new(TransitionRepository::from_connection(conn.clone())),
        Arc::new(ShelfStockRepository::from_connection(conn)),
        EngineConfig::default(),
    );

    controller.start(&draft, &stale_orders).expect("首次开工应成功");
    let err = controller.start(&draft, &stale_orders).unwrap_err();
    assert!(
        matches!(
            err,
            EngineError::Persistence(RepositoryError::InvalidStateTransition { .. })
        ),
        "{:?}",
        err
    );

    // 第二次的库存分录随事务回滚
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 80.0);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 20.0);

    // 重新加载后状态不再是 pending，直接拒绝
    let err = api.start_production(&draft).unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }), "{:?}", err);
}

#[test]
fn test_unresolved_rows_block_start_when_configured() {
    let (_temp_file, db_path) = setup_standard_scenario().unwrap();
    insert_order(
        &db_path,
        &build_order(
            1,
            10.0,
            vec![
                requirement_row("r1", "board", Some(PRODUCT_P), vec![piece("侧板", 2.0)]),
                requirement_row("r2", "edge", None, vec![piece("封边", 1.0)]),
            ],
        ),
    )
    .unwrap();

    // 默认只告警，允许开工
    let api = open_api(&db_path);
    let draft = prepare_confirmed_draft(&api, &[1], 20.0);
    assert_eq!(draft.unresolved_rows.len(), 1);
    assert_eq!(draft.unresolved_rows[0].row_index, 1);

    ConfigManager::new(&db_path)
        .unwrap()
        .set_config_value(config_keys::BLOCK_ON_UNRESOLVED_ROWS, "true")
        .unwrap();
    let strict_api = open_api(&db_path);
    assert!(strict_api.engine_config().block_on_unresolved_rows);

    let err = strict_api.start_production(&draft).unwrap_err();
    assert!(err.to_string().contains("未选择商品"), "{}", err);

    api.start_production(&draft).expect("默认配置下应允许开工");
}

#[test]
fn test_restore_draft_keeps_operator_input() {
    let (_temp_file, _db_path, api) = setup_single_order();
    let cached = prepare_confirmed_draft(&api, &[1], 20.0);

    let restored = api.restore_draft(&[1], &cached).expect("恢复草稿失败");
    let group = restored.group(GROUP_P).unwrap();
    assert_eq!(group.source_shelf_id, Some(SHELF_A));
    assert_eq!(group.production_shelf_id, Some(SHELF_B));
    assert_eq!(group.total_delivered_qty, 20.0);
    assert!(group.is_confirmed);

    // 草稿可序列化缓存
    let json = serde_json::to_string(&restored).unwrap();
    let reloaded: Draft = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded, restored);

    api.start_production(&reloaded).expect("用恢复的草稿开工应成功");
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_B).unwrap(), 20.0);
}

#[test]
fn test_start_rejects_draft_after_rows_reordered() {
    let (_temp_file, db_path) = setup_standard_scenario().unwrap();
    // 历史数据: 需求行没有 row_key，只能按下标定位
    let mut rows = vec![
        requirement_row("p", "board", Some(PRODUCT_P), vec![piece("侧板", 2.0)]),
        requirement_row("e", "edge", Some(PRODUCT_E), vec![piece("封边", 1.0)]),
    ];
    for row in rows.iter_mut() {
        row.row_key = None;
    }
    insert_order(&db_path, &build_order(1, 10.0, rows.clone())).unwrap();
    let api = open_api(&db_path);

    let stale = prepare_confirmed_draft(&api, &[1], 20.0);

    // 草稿生成后 BOM 编辑器调换了行顺序
    rows.reverse();
    api.update_requirement_rows(1, &rows).unwrap();

    let err = api.start_production(&stale).unwrap_err();
    match err {
        ApiError::ValidationError(msg) => assert!(msg.contains("刷新草稿"), "{}", msg),
        other => panic!("Expected ValidationError, got {:?}", other),
    }
    let order = api.get_order(1).unwrap();
    assert_eq!(order.status, ProductionStatus::Pending);
    assert!(order.material_requirement_rows.iter().all(|r| r.delivered_qty.is_none()));
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 100.0);

    // 刷新草稿后交付量落在颗粒板所在的行
    let mut fresh = api.restore_draft(&[1], &stale).unwrap();
    assert!(!fresh.group(GROUP_P).unwrap().is_confirmed, "需求位置变化后需重新确认");
    assert_eq!(fresh.group(GROUP_P).unwrap().total_delivered_qty, 20.0);
    api.confirm_group(&mut fresh, GROUP_P).unwrap();
    api.start_production(&fresh).expect("刷新后开工应成功");
    let order = api.get_order(1).unwrap();
    assert_eq!(order.material_requirement_rows[0].selected_product_id, Some(PRODUCT_E));
    assert_eq!(order.material_requirement_rows[0].delivered_qty, None);
    assert_eq!(order.material_requirement_rows[1].selected_product_id, Some(PRODUCT_P));
    assert_eq!(order.material_requirement_rows[1].delivered_qty, Some(20.0));
}

#[test]
fn test_duplicate_order_ids_rejected() {
    let (_temp_file, _db_path, api) = setup_single_order();

    let err = api.prepare_draft(&[1, 1]).unwrap_err();
    match err {
        ApiError::ValidationError(msg) => assert!(msg.contains("重复"), "{}", msg),
        other => panic!("Expected ValidationError, got {:?}", other),
    }

    let mut draft = prepare_confirmed_draft(&api, &[1], 20.0);
    draft.order_ids.push(1);
    let err = api.start_production(&draft).unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)), "{:?}", err);
    assert_eq!(api.get_order(1).unwrap().status, ProductionStatus::Pending);
    assert_eq!(api.shelf_stock(PRODUCT_P, SHELF_A).unwrap(), 100.0);
}
