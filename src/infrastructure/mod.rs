pub mod position_client;
pub mod price_client;
pub mod resilience;
pub mod ttl_cache;
