// Presentation layer - HTTP surface for dashboard clients
pub mod app_state;
pub mod handlers;
