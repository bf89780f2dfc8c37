//! Pipeline RAG: embeddings, almacenamiento y respuesta a consultas.
//!
//! Flujo de una consulta:
//!   1. Embedding de la pregunta.
//!   2. Búsqueda de los `min(2, n)` documentos más cercanos (se omite si no hay ninguno).
//!   3. Contexto = textos recuperados separados por un espacio.
//!   4. Prompt de dos mensajes (sistema + usuario) al modelo de chat.
//!
//! Los fallos de ingesta se propagan; los de consulta se devuelven como
//! `QueryOutcome::Failure`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    llm::LanguageModel,
    models::{ChatMessage, ChatRequest, DocumentRecord, QueryOutcome},
    vector_store::DocumentStore,
};

/// Número máximo de documentos que se recuperan por consulta.
pub const MAX_RETRIEVED: usize = 2;

pub const SYSTEM_PROMPT: &str = "Use the provided context to answer the question. \
If the context doesn't contain the answer, say so.";

/// Prefijo de los mensajes de error devueltos por `query`.
pub const QUERY_ERROR_PREFIX: &str = "Error al procesar la consulta";

/// Parámetros de generación para el modelo de chat.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl GenerationSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            model: cfg.language_model.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
        }
    }
}

#[derive(Clone)]
pub struct RagPipeline {
    model: Arc<dyn LanguageModel>,
    store: Arc<dyn DocumentStore>,
    settings: GenerationSettings,
}

impl RagPipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: Arc<dyn DocumentStore>,
        settings: GenerationSettings,
    ) -> Self {
        Self { model, store, settings }
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.model.embed_one(text).await
    }

    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.model.embed_many(texts).await?;
        if vectors.len() != texts.len() {
            return Err(anyhow!(
                "El modelo devolvió {} embeddings para {} textos",
                vectors.len(),
                texts.len()
            ));
        }
        Ok(vectors)
    }

    pub async fn document_count(&self) -> Result<usize> {
        self.store.count().await
    }

    /// Añade documentos al vector store en un único lote.
    /// Devuelve los identificadores asignados, en el orden de entrada.
    pub async fn add_documents(&self, documents: &[String]) -> Result<Vec<String>> {
        match self.try_add_documents(documents).await {
            Ok(ids) => Ok(ids),
            Err(e) => {
                error!("Error añadiendo documentos: {e:#}");
                Err(e)
            }
        }
    }

    async fn try_add_documents(&self, documents: &[String]) -> Result<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embed_many(documents).await?;

        let records: Vec<DocumentRecord> = documents
            .iter()
            .zip(vectors)
            .map(|(document, embedding)| DocumentRecord {
                id: Uuid::new_v4().to_string(),
                document: document.clone(),
                embedding,
            })
            .collect();
        let ids = records.iter().map(|r| r.id.clone()).collect();

        self.store.insert_batch(records).await?;
        info!("{} documento(s) añadidos al vector store", documents.len());
        Ok(ids)
    }

    /// Responde una pregunta usando los documentos almacenados como contexto.
    /// Nunca falla: los errores se devuelven como `QueryOutcome::Failure`.
    pub async fn query(&self, question: &str) -> QueryOutcome {
        match self.try_query(question).await {
            Ok(answer) => QueryOutcome::Answer(answer),
            Err(e) => {
                error!("Error consultando el pipeline RAG: {e:#}");
                QueryOutcome::Failure(format!("{QUERY_ERROR_PREFIX}: {e}"))
            }
        }
    }

    async fn try_query(&self, question: &str) -> Result<String> {
        let question_embedding = self.embed_one(question).await?;

        let stored = self.store.count().await?;
        let n_results = MAX_RETRIEVED.min(stored);
        let documents = if n_results > 0 {
            self.store.search(&question_embedding, n_results).await?
        } else {
            Vec::new()
        };
        debug!("Recuperados {} de {} documentos", documents.len(), stored);

        let context = documents.join(" ");
        let request = self.build_request(&context, question);
        self.model.complete(&request).await
    }

    fn build_request(&self, context: &str, question: &str) -> ChatRequest {
        ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(format!("Context: {context}\n\nQuestion: {question}")),
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }
}
