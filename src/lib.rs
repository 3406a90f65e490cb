//! RIBALTA Model Rebalancing Library
//!
//! This library provides the core components for the RIBALTA portfolio
//! rebalancing service: the investment-model domain, the integer
//! rebalancing optimizer, and the per-model orchestrator.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
