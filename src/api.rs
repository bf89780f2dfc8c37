use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use crate::{
    app_state::AppState,
    ingest::{self, UploadError},
};

/// Límite de tamaño para los ficheros subidos (200 MB).
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct QueryPayload {
    question: String,
}

#[derive(Serialize)]
pub struct QueryResponse {
    response: String,
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Success,
    Error,
}

#[derive(Serialize)]
pub struct UploadStatus {
    status: UploadState,
    message: String,
}

impl UploadStatus {
    fn error(message: impl Into<String>) -> Self {
        Self { status: UploadState::Error, message: message.into() }
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_handler))
        .route("/api/query", post(query_handler))
        .route("/api/status", get(status_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<UploadStatus>) {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let filename = field.file_name().unwrap_or("upload.txt").to_string();
                match field.bytes().await {
                    Ok(bytes) => upload = Some((filename, bytes)),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(UploadStatus::error(format!("Error leyendo el fichero: {e}"))),
                        );
                    }
                }
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(UploadStatus::error(format!("Petición de subida inválida: {e}"))),
                );
            }
        }
    }

    let Some((filename, bytes)) = upload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(UploadStatus::error("Falta el campo 'file' en la subida.")),
        );
    };

    match ingest::ingest_upload(&state.pipeline, &filename, &bytes).await {
        Ok(receipt) => {
            info!("Subida de {filename} ingerida como {}", receipt.document_id);
            (
                StatusCode::OK,
                Json(UploadStatus {
                    status: UploadState::Success,
                    message: receipt.to_string(),
                }),
            )
        }
        Err(err) => {
            let code = match err {
                UploadError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                UploadError::Empty | UploadError::Undecodable => StatusCode::UNPROCESSABLE_ENTITY,
                UploadError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, Json(UploadStatus::error(err.to_string())))
        }
    }
}

/// Una pregunta vacía no llega al pipeline y no cambia nada en pantalla.
#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Response {
    if payload.question.trim().is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let outcome = state.pipeline.query(&payload.question).await;
    debug!("Consulta respondida (fallo: {})", outcome.is_failure());
    Json(QueryResponse {
        response: outcome.text().to_string(),
    })
    .into_response()
}

#[axum::debug_handler]
async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.pipeline.document_count().await {
        Ok(documents) => Ok(Json(json!({
            "documents": documents,
            "model": state.config.language_model,
        }))),
        Err(e) => {
            error!("Error contando documentos: {e:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{AppConfig, Secrets, API_KEY_VAR};
    use crate::llm::LanguageModel;
    use crate::rag::testing::{EchoModel, FailingModel};
    use crate::rag::{GenerationSettings, RagPipeline, QUERY_ERROR_PREFIX};
    use crate::vector_store::LanceDbStore;

    const BOUNDARY: &str = "docu-rag-test-boundary";

    async fn test_app_with(model: Arc<dyn LanguageModel>) -> (Router, TempDir) {
        let dir = TempDir::new().expect("should create temp dir");
        let config = AppConfig::from_sources(
            |key| (key == API_KEY_VAR).then(|| "sk-test".to_string()),
            &Secrets::default(),
        )
        .expect("config");
        let store = LanceDbStore::open(&dir.path().join("vectorstore"))
            .await
            .expect("store");
        let pipeline = RagPipeline::new(
            model,
            Arc::new(store),
            GenerationSettings::from_config(&config),
        );
        let state = AppState {
            config: Arc::new(config),
            pipeline,
        };
        (create_router(state), dir)
    }

    async fn test_app() -> (Router, Arc<EchoModel>, TempDir) {
        let model = Arc::new(EchoModel::default());
        let (app, dir) = test_app_with(model.clone()).await;
        (app, model, dir)
    }

    fn upload_request(filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: text/plain\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn query_request(question: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/query")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "question": question }).to_string()))
            .expect("request")
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    async fn document_count(app: &Router) -> u64 {
        let response = app
            .clone()
            .oneshot(Request::get("/api/status").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["documents"].as_u64().expect("count")
    }

    #[tokio::test]
    async fn upload_then_query_round_trip() {
        let (app, _model, _dir) = test_app().await;

        let response = app
            .clone()
            .oneshot(upload_request("sky.txt", b"The sky is blue."))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "success");
        assert_eq!(document_count(&app).await, 1);

        let response = app
            .clone()
            .oneshot(query_request("What color is the sky?"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let answer = json_body(response).await["response"]
            .as_str()
            .expect("text")
            .to_string();
        assert!(answer.contains("blue"));
    }

    #[tokio::test]
    async fn undecodable_upload_reports_error_and_stores_nothing() {
        let (app, model, _dir) = test_app().await;

        let response = app
            .clone()
            .oneshot(upload_request("garbled.txt", b"\x81\x8d\x8f"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .expect("message")
            .contains("No se pudo decodificar"));

        assert_eq!(document_count(&app).await, 0);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn non_text_upload_is_rejected() {
        let (app, _model, _dir) = test_app().await;

        let response = app
            .clone()
            .oneshot(upload_request("slides.pdf", b"%PDF-1.7"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(document_count(&app).await, 0);
    }

    #[tokio::test]
    async fn empty_question_skips_the_pipeline() {
        let (app, model, _dir) = test_app().await;

        for question in ["", "   "] {
            let response = app
                .clone()
                .oneshot(query_request(question))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn query_on_empty_store_still_answers() {
        let (app, _model, _dir) = test_app().await;

        let response = app
            .clone()
            .oneshot(query_request("Is anything stored?"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let answer = json_body(response).await["response"]
            .as_str()
            .expect("text")
            .to_string();
        assert!(answer.contains("Context: \n\nQuestion: Is anything stored?"));
    }

    #[tokio::test]
    async fn failed_ingestion_reports_error_and_stores_nothing() {
        let (app, _dir) = test_app_with(Arc::new(FailingModel {
            fail_embeddings: true,
            fail_chat: false,
        }))
        .await;

        let response = app
            .clone()
            .oneshot(upload_request("notes.txt", b"Perfectly readable text."))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["status"], "error");
        let message = body["message"].as_str().expect("message");
        assert!(message.starts_with("Error procesando el documento"));
        assert!(message.contains("embeddings endpoint unavailable"));

        assert_eq!(document_count(&app).await, 0);
    }

    #[tokio::test]
    async fn failed_query_is_returned_like_an_answer() {
        let (app, _dir) = test_app_with(Arc::new(FailingModel {
            fail_embeddings: false,
            fail_chat: true,
        }))
        .await;

        let response = app
            .clone()
            .oneshot(query_request("Will the model answer?"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let text = json_body(response).await["response"]
            .as_str()
            .expect("text")
            .to_string();
        assert!(text.starts_with(QUERY_ERROR_PREFIX));
        assert!(text.contains("chat endpoint unavailable"));
    }
}
