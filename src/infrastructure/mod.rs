// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod historical_client;
pub mod sse_transport;
