// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod ingest;
mod llm;
mod models;
mod rag;
mod vector_store;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::llm::OpenAiModel;
use crate::rag::{GenerationSettings, RagPipeline};
use crate::vector_store::LanceDbStore;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración (sin credencial no arrancamos)
    let cfg = match config::AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error al cargar la configuración: {e:#}");
            return Err(e);
        }
    };

    // 3. Abrir el vector store (se mantiene abierto toda la vida del proceso)
    let store = LanceDbStore::open(&cfg.vector_store_path)
        .await
        .context("Error abriendo el vector store")?;

    // 4. Construir el pipeline RAG
    let pipeline = RagPipeline::new(
        Arc::new(OpenAiModel::from_config(&cfg)),
        Arc::new(store),
        GenerationSettings::from_config(&cfg),
    );

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: Arc::new(cfg),
        pipeline,
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
