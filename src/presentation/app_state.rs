// Application state for HTTP handlers
use crate::application::historical_service::HistoricalService;
use crate::application::stream_manager::StreamConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: StreamConnectionManager,
    pub historical: HistoricalService,
}
