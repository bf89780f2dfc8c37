use std::sync::Arc;

use crate::{config::AppConfig, rag::RagPipeline};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: RagPipeline,
}
