//! End-to-end tests driving the assembled engine against the simulated
//! broker and mock feed.

use std::sync::Arc;

use rust_decimal_macros::dec;
use trading_engine::broker::{BrokerClient, SimulatedBroker};
use trading_engine::config::Config;
use trading_engine::feed::{MarketDataFeed, MockFeed};
use trading_engine::loading::{StaticPlanSource, basic_row};
use trading_engine::manager::TradingManager;
use trading_engine::models::OrderState;
use trading_engine::persistence::TradingStore;
use trading_engine::risk::{RiskDecision, RiskManagementService};

struct Harness {
    manager: Arc<TradingManager>,
    store: Arc<TradingStore>,
    feed: Arc<MockFeed>,
    broker: Arc<SimulatedBroker>,
}

async fn harness(config: Config, rows: Vec<trading_engine::loading::PlanRow>) -> Harness {
    let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
    let feed = Arc::new(MockFeed::new());
    let broker = Arc::new(SimulatedBroker::new(dec!(100000)));
    let manager = Arc::new(TradingManager::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&feed) as Arc<dyn MarketDataFeed>,
        Some(Arc::clone(&broker) as Arc<dyn BrokerClient>),
        Some(Box::new(StaticPlanSource::new(rows))),
    ));
    Harness {
        manager,
        store,
        feed,
        broker,
    }
}

#[tokio::test]
async fn two_equal_orders_one_slot_allocates_by_symbol() {
    let mut config = Config::default();
    config.risk_limits.max_open_orders = 1;

    let rows = vec![
        basic_row("MSFT", "BUY", dec!(300), dec!(295)),
        basic_row("AAPL", "BUY", dec!(150), dec!(145)),
    ];
    let harness = harness(config, rows).await;
    harness.feed.set_price("AAPL", dec!(149));
    harness.feed.set_price("MSFT", dec!(299));

    let summary = harness.manager.run_tick().await;
    assert_eq!(summary.orders_evaluated, 2);
    assert_eq!(summary.orders_allocated, 1);
    assert_eq!(summary.orders_executed, 1);

    // Tie broken lexicographically: AAPL wins the slot
    let working = harness.manager.active_orders().working();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].planned_order.symbol, "AAPL");
}

#[tokio::test]
async fn risk_cap_mutates_order_before_submission() {
    let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
    let risk = RiskManagementService::new(
        Arc::clone(&store),
        trading_engine::config::RiskLimitsConfig::default(),
        None,
    );

    let mut order = trading_engine::models::PlannedOrder {
        security_type: trading_engine::models::SecurityType::Stk,
        exchange: "SMART".to_string(),
        currency: "USD".to_string(),
        action: trading_engine::models::Action::Buy,
        symbol: "AAPL".to_string(),
        order_type: trading_engine::models::OrderType::Limit,
        risk_per_trade: dec!(0.03),
        entry_price: Some(dec!(150)),
        stop_loss: Some(dec!(145)),
        risk_reward_ratio: dec!(2.0),
        position_strategy: trading_engine::models::PositionStrategy::Day,
        priority: 3,
        trading_setup: None,
        core_timeframe: None,
        overall_trend: None,
        brief_analysis: None,
        expiration_date: None,
    };

    let decision = risk.can_place_order(&mut order, &[], dec!(100000)).await;
    assert!(decision.is_allowed());
    assert_eq!(order.risk_per_trade, dec!(0.02));
}

#[tokio::test]
async fn daily_loss_halt_blocks_submissions() {
    let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
    store
        .record_realized_pnl(1, "XYZ", dec!(-2100), chrono::Utc::now(), None)
        .await
        .unwrap();
    let risk = RiskManagementService::new(
        Arc::clone(&store),
        trading_engine::config::RiskLimitsConfig::default(),
        None,
    );

    let mut order = trading_engine::models::PlannedOrder {
        security_type: trading_engine::models::SecurityType::Stk,
        exchange: "SMART".to_string(),
        currency: "USD".to_string(),
        action: trading_engine::models::Action::Buy,
        symbol: "AAPL".to_string(),
        order_type: trading_engine::models::OrderType::Limit,
        risk_per_trade: dec!(0.005),
        entry_price: Some(dec!(150)),
        stop_loss: Some(dec!(145)),
        risk_reward_ratio: dec!(2.0),
        position_strategy: trading_engine::models::PositionStrategy::Day,
        priority: 3,
        trading_setup: None,
        core_timeframe: None,
        overall_trend: None,
        brief_analysis: None,
        expiration_date: None,
    };

    // 2,100 loss on 100k equity breaches the 2% daily limit
    match risk.can_place_order(&mut order, &[], dec!(100000)).await {
        RiskDecision::Halted(reason) => assert!(reason.contains("Daily loss limit exceeded")),
        other => panic!("expected halt, got {other:?}"),
    }
}

#[tokio::test]
async fn submitted_bracket_syncs_when_broker_fills() {
    let harness = harness(Config::default(), vec![basic_row("AAPL", "BUY", dec!(150), dec!(145))])
        .await;
    harness.feed.set_price("AAPL", dec!(149));

    let summary = harness.manager.run_tick().await;
    assert_eq!(summary.orders_executed, 1);

    // The broker fills the parent leg; reconciliation must drag the
    // internal record to FILLED even though it still reads as working.
    let working = harness.manager.active_orders().working();
    let parent_id = working[0].broker_order_ids[0];
    let db_id = working[0].planned_order_db_id;
    harness
        .store
        .update_order_status(db_id, OrderState::LiveWorking, None, None)
        .await
        .unwrap();
    harness.broker.set_order_status(parent_id, "Filled");

    let engine = trading_engine::reconciliation::ReconciliationEngine::new(
        Arc::clone(&harness.store),
        harness.manager.state(),
        harness.manager.active_orders(),
        Arc::clone(&harness.broker) as Arc<dyn BrokerClient>,
        trading_engine::config::ReconciliationConfig::default(),
    );
    let report = engine.reconcile_cycle().await.unwrap();
    assert_eq!(report.synchronized, 1);

    assert_eq!(
        harness.store.get_order_status(db_id).await.unwrap(),
        Some(OrderState::Filled)
    );
    // The tracked bracket is retired
    assert_eq!(harness.manager.active_orders().working_count(), 0);
}

#[tokio::test]
async fn low_probability_order_is_still_viable_and_allocated() {
    let harness = harness(Config::default(), vec![basic_row("AAPL", "BUY", dec!(150), dec!(145))])
        .await;
    // Market above entry: BUY LMT scores 0.1
    harness.feed.set_price("AAPL", dec!(155));

    let summary = harness.manager.run_tick().await;
    assert_eq!(summary.orders_evaluated, 1);
    // Viability ignores probability on the two-layer path; allocation
    // depends only on slots and capital.
    assert_eq!(summary.orders_allocated, 1);
    assert_eq!(summary.orders_executed, 1);
}

#[tokio::test]
async fn full_cycle_simulated_fill_labels_and_closes() {
    // No broker: simulation path fills at entry immediately
    let config = Config::default();
    let store = Arc::new(TradingStore::new_in_memory().await.unwrap());
    let feed = Arc::new(MockFeed::new());
    let manager = Arc::new(TradingManager::new(
        &config,
        Arc::clone(&store),
        Arc::clone(&feed) as Arc<dyn MarketDataFeed>,
        None,
        Some(Box::new(StaticPlanSource::new(vec![basic_row(
            "AAPL",
            "BUY",
            dec!(150),
            dec!(145),
        )]))),
    ));
    feed.set_price("AAPL", dec!(149));

    let summary = manager.run_tick().await;
    assert_eq!(summary.orders_executed, 1);

    let open = store.open_positions(None).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].filled_price, dec!(150));

    // Labeling derives outcomes and is idempotent across reruns
    let labeling = trading_engine::labeling::OutcomeLabelingService::new(Arc::clone(&store));
    labeling.label_completed_orders(24).await;
    let count = store.count_labels(open[0].planned_order_id).await.unwrap();
    assert!(count >= 2);
    labeling.label_completed_orders(24).await;
    assert_eq!(
        store.count_labels(open[0].planned_order_id).await.unwrap(),
        count
    );

    // Close the position through the state service and verify P&L lands
    let pnl = manager
        .state()
        .close_position(open[0].id, dec!(155), dec!(0))
        .await
        .unwrap();
    assert_eq!(pnl, dec!(500));
    assert!(store.open_positions(None).await.unwrap().is_empty());
}
