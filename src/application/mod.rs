// Application layer - Live feed orchestration and aggregation use cases
pub mod aggregator;
pub mod connection_pool;
pub mod debouncer;
pub mod feed_key;
pub mod historical_service;
pub mod historical_source;
pub mod live_transport;
pub mod live_view;
pub mod stream_manager;
