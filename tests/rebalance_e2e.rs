//! Rebalancing End-to-End Tests
//!
//! Exercises the full stack: HTTP position/price adapters against mock
//! services, the sqlite-backed model store, the optimization engine, and the
//! orchestrator.
//!
//! Test categories:
//! 1. Single-portfolio pipeline against live mock services
//! 2. Model-wide fan-out with partial failure isolation
//! 3. Dead-dependency batch abort
//! 4. Persistence of audit records and the model stamp

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use ribalta::application::services::rebalance_orchestrator::RebalanceOrchestrator;
use ribalta::config::RebalanceConfig;
use ribalta::domain::entities::investment_model::InvestmentModel;
use ribalta::domain::entities::portfolio::PortfolioSnapshot;
use ribalta::domain::entities::position::Position;
use ribalta::domain::entities::rebalance_record::TransactionType;
use ribalta::domain::errors::RebalanceError;
use ribalta::domain::repositories::{ModelSource, RebalanceStore};
use ribalta::domain::services::optimization::OptimizationEngine;
use ribalta::domain::value_objects::drift_bounds::DriftBounds;
use ribalta::infrastructure::position_client::HttpPositionClient;
use ribalta::infrastructure::price_client::HttpPriceClient;
use ribalta::infrastructure::resilience::RetryPolicy;
use ribalta::infrastructure::ttl_cache::TtlCache;
use ribalta::persistence::init_database;
use ribalta::persistence::repository::{SqliteModelRepository, SqliteRebalanceStore};
use rust_decimal::{dec, Decimal};
use std::collections::{BTreeMap, HashMap};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

fn sec(c: char) -> String {
    std::iter::repeat(c).take(24).collect()
}

fn target(value: Decimal) -> ribalta::domain::value_objects::target_percentage::TargetPercentage {
    ribalta::domain::value_objects::target_percentage::TargetPercentage::new(value).unwrap()
}

fn balanced_model(portfolio_ids: Vec<String>) -> InvestmentModel {
    InvestmentModel::new(
        "m1",
        "Balanced Growth",
        vec![
            Position::new(
                sec('a'),
                target(dec!(0.40)),
                DriftBounds::new(dec!(0.02), dec!(0.05)).unwrap(),
            )
            .unwrap(),
            Position::new(
                sec('b'),
                target(dec!(0.30)),
                DriftBounds::new(dec!(0.01), dec!(0.03)).unwrap(),
            )
            .unwrap(),
        ],
        portfolio_ids,
    )
    .unwrap()
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, router).into_future());
    format!("http://{}", addr)
}

/// Mock position service serving fixed snapshots; unknown ids get a 404.
async fn position_service(snapshots: HashMap<String, PortfolioSnapshot>) -> String {
    let snapshots = Arc::new(snapshots);
    let router = Router::new().route(
        "/portfolios/:id",
        get(move |Path(id): Path<String>| {
            let snapshots = snapshots.clone();
            async move {
                match snapshots.get(&id) {
                    Some(snapshot) => Ok(Json(snapshot.clone())),
                    None => Err(axum::http::StatusCode::NOT_FOUND),
                }
            }
        }),
    );
    serve(router).await
}

/// Mock price service serving one fixed sheet for every request.
async fn price_service(prices: BTreeMap<String, Decimal>) -> String {
    let router = Router::new().route("/prices", get(move || async move { Json(prices) }));
    serve(router).await
}

fn snapshot(portfolio_id: &str, cash: Decimal) -> PortfolioSnapshot {
    PortfolioSnapshot {
        portfolio_id: portfolio_id.to_string(),
        portfolio_name: Some(format!("Portfolio {}", portfolio_id)),
        cash_balance: cash,
        positions: BTreeMap::new(),
    }
}

fn standard_prices() -> BTreeMap<String, Decimal> {
    let mut prices = BTreeMap::new();
    prices.insert(sec('a'), dec!(50));
    prices.insert(sec('b'), dec!(25));
    prices.insert(sec('c'), dec!(10));
    prices
}

struct Harness {
    orchestrator: RebalanceOrchestrator,
    models: Arc<SqliteModelRepository>,
    store: Arc<SqliteRebalanceStore>,
}

async fn harness(
    model: InvestmentModel,
    position_base: String,
    price_base: String,
) -> Harness {
    let pool = init_database("sqlite::memory:").await.unwrap();
    let models = Arc::new(SqliteModelRepository::new(pool.clone()));
    let store = Arc::new(SqliteRebalanceStore::new(pool));
    store.create_model(&model).await.unwrap();

    let retry = RetryPolicy::new(2, Duration::from_millis(1));
    let cache = Arc::new(TtlCache::new(Duration::from_secs(60), 64));
    let positions = Arc::new(HttpPositionClient::new(position_base, retry.clone()));
    let prices = Arc::new(HttpPriceClient::new(price_base, retry, cache));

    let config = RebalanceConfig {
        max_rebalance_concurrency: 4,
        ..RebalanceConfig::default()
    };
    let orchestrator = RebalanceOrchestrator::new(
        positions,
        prices,
        models.clone(),
        store.clone(),
        Arc::new(OptimizationEngine::new(Duration::from_secs(10))),
        config,
    );
    Harness {
        orchestrator,
        models,
        store,
    }
}

#[tokio::test]
async fn test_single_portfolio_full_pipeline() {
    let mut snapshots = HashMap::new();
    snapshots.insert("p1".to_string(), snapshot("p1", dec!(1000)));
    let position_base = position_service(snapshots).await;
    let price_base = price_service(standard_prices()).await;

    let harness = harness(
        balanced_model(vec!["p1".to_string()]),
        position_base,
        price_base,
    )
    .await;

    let dto = harness
        .orchestrator
        .rebalance_portfolio("m1", "p1")
        .await
        .unwrap();

    assert_eq!(dto.portfolio_id, "p1");
    assert_eq!(dto.portfolio_name, "Portfolio p1");
    assert_eq!(dto.transactions.len(), 2);
    for transaction in &dto.transactions {
        assert_eq!(transaction.transaction_type, TransactionType::Buy);
    }
    let quantities: BTreeMap<_, _> = dto
        .transactions
        .iter()
        .map(|t| (t.security_id.clone(), t.quantity))
        .collect();
    assert_eq!(quantities[&sec('a')], 8);
    assert_eq!(quantities[&sec('b')], 12);

    // The audit record landed in sqlite
    let record = harness.store.record(&dto.rebalance_id).await.unwrap().unwrap();
    assert_eq!(record.model_id, "m1");
    assert_eq!(record.portfolios.len(), 1);
    assert_eq!(record.portfolios[0].market_value, dec!(1000));

    // Single-portfolio rebalances never stamp the model
    let model = harness.models.model("m1").await.unwrap();
    assert_eq!(model.version(), 1);
    assert!(model.last_rebalance_date().is_none());
}

#[tokio::test]
async fn test_model_wide_run_with_one_failing_portfolio() {
    let mut snapshots = HashMap::new();
    snapshots.insert("p1".to_string(), snapshot("p1", dec!(1000)));
    // p2 is unknown to the position service (404)
    snapshots.insert("p3".to_string(), snapshot("p3", dec!(2000)));
    let position_base = position_service(snapshots).await;
    let price_base = price_service(standard_prices()).await;

    let harness = harness(
        balanced_model(vec!["p1".to_string(), "p2".to_string(), "p3".to_string()]),
        position_base,
        price_base,
    )
    .await;

    let report = harness.orchestrator.rebalance_model("m1").await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.portfolio_id == "p2")
        .unwrap();
    assert!(matches!(
        failed.result.as_ref().unwrap_err(),
        RebalanceError::ExternalService(_)
    ));

    // One shared record covering exactly the successful portfolios
    let rebalance_id = report.rebalance_id.clone().unwrap();
    let record = harness.store.record(&rebalance_id).await.unwrap().unwrap();
    let ids: Vec<&str> = record
        .portfolios
        .iter()
        .map(|p| p.portfolio_id.as_str())
        .collect();
    assert_eq!(ids, vec!["p1", "p3"]);

    // The model stamp went through the CAS boundary
    let model = harness.models.model("m1").await.unwrap();
    assert_eq!(model.version(), 2);
    assert!(model.last_rebalance_date().is_some());
    assert!(report.model_update_error.is_none());
}

#[tokio::test]
async fn test_unreachable_position_service_aborts_batch() {
    // Nothing is listening on this address
    let position_base = "http://127.0.0.1:9".to_string();
    let price_base = price_service(standard_prices()).await;

    let harness = harness(
        balanced_model(vec!["p1".to_string(), "p2".to_string()]),
        position_base,
        price_base,
    )
    .await;

    let err = harness.orchestrator.rebalance_model("m1").await.unwrap_err();
    assert!(err.is_dead_dependency());

    // No record and no stamp
    assert!(harness
        .store
        .records_for_model("m1")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(harness.models.model("m1").await.unwrap().version(), 1);
}

#[tokio::test]
async fn test_held_but_unmodeled_security_sold_off() {
    let mut held = snapshot("p1", dec!(900));
    held.positions.insert(sec('c'), dec!(10));
    let mut snapshots = HashMap::new();
    snapshots.insert("p1".to_string(), held);
    let position_base = position_service(snapshots).await;
    let price_base = price_service(standard_prices()).await;

    let harness = harness(
        balanced_model(vec!["p1".to_string()]),
        position_base,
        price_base,
    )
    .await;

    let dto = harness
        .orchestrator
        .rebalance_portfolio("m1", "p1")
        .await
        .unwrap();

    let sell = dto
        .transactions
        .iter()
        .find(|t| t.security_id == sec('c'))
        .unwrap();
    assert_eq!(sell.transaction_type, TransactionType::Sell);
    assert_eq!(sell.quantity, 10);

    let drift = dto.drifts.iter().find(|d| d.security_id == sec('c')).unwrap();
    assert_eq!(drift.target, Decimal::ZERO);
    assert_eq!(drift.adjusted_quantity, Decimal::ZERO);
}

#[tokio::test]
async fn test_infeasible_portfolio_isolated_in_batch() {
    let tight = InvestmentModel::new(
        "m1",
        "Tight",
        vec![Position::new(
            sec('a'),
            target(dec!(0.40)),
            DriftBounds::new(Decimal::ZERO, Decimal::ZERO).unwrap(),
        )
        .unwrap()],
        vec!["p1".to_string(), "p2".to_string()],
    )
    .unwrap();

    let mut snapshots = HashMap::new();
    // 0.40 * 1500 = 600, divisible by the 30 share price: feasible
    snapshots.insert("p1".to_string(), snapshot("p1", dec!(1500)));
    // 0.40 * 1000 = 400, not divisible by 30: infeasible
    snapshots.insert("p2".to_string(), snapshot("p2", dec!(1000)));
    let position_base = position_service(snapshots).await;

    let mut prices = BTreeMap::new();
    prices.insert(sec('a'), dec!(30));
    let price_base = price_service(prices).await;

    let harness = harness(tight, position_base, price_base).await;
    let report = harness.orchestrator.rebalance_model("m1").await.unwrap();

    assert_eq!(report.succeeded(), 1);
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.portfolio_id == "p2")
        .unwrap();
    assert!(matches!(
        failed.result.as_ref().unwrap_err(),
        RebalanceError::OptimizationInfeasible { .. }
    ));

    let rebalance_id = report.rebalance_id.unwrap();
    let record = harness.store.record(&rebalance_id).await.unwrap().unwrap();
    assert_eq!(record.portfolios.len(), 1);
    assert_eq!(record.portfolios[0].portfolio_id, "p1");
}

#[tokio::test]
async fn test_balanced_portfolio_is_a_no_op() {
    let mut held = snapshot("p1", dec!(300));
    held.positions.insert(sec('a'), dec!(8));
    held.positions.insert(sec('b'), dec!(12));
    let mut snapshots = HashMap::new();
    snapshots.insert("p1".to_string(), held);
    let position_base = position_service(snapshots).await;
    let price_base = price_service(standard_prices()).await;

    let harness = harness(
        balanced_model(vec!["p1".to_string()]),
        position_base,
        price_base,
    )
    .await;

    let dto = harness
        .orchestrator
        .rebalance_portfolio("m1", "p1")
        .await
        .unwrap();
    assert!(dto.transactions.is_empty());

    let drift_a = dto.drifts.iter().find(|d| d.security_id == sec('a')).unwrap();
    assert_eq!(drift_a.actual, dec!(0.4000));
    assert_eq!(drift_a.original_quantity, drift_a.adjusted_quantity);
}
