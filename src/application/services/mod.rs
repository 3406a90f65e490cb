pub mod rebalance_orchestrator;
