//! Abstracción sobre Rig para los embeddings y el chat.
//! El pipeline depende del trait `LanguageModel`; la implementación real usa OpenAI.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_text / .embed_texts
use tracing::debug;

use crate::config::{AppConfig, ApiKey};
use crate::models::{ChatRequest, Role};

/// Operaciones de modelo que necesita el pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Embedding de un único texto.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeddings en bloque, un vector por entrada y en el mismo orden.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Llama al endpoint de chat y devuelve el texto generado.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Modelo OpenAI vía Rig. La credencial se pasa explícitamente al cliente.
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    api_key: ApiKey,
    embedding_model: String,
}

impl OpenAiModel {
    /// Construye el modelo a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            api_key: cfg.api_key.clone(),
            embedding_model: cfg.embedding_model.clone(),
        }
    }

    fn client(&self) -> rig::providers::openai::Client {
        rig::providers::openai::Client::new(self.api_key.expose())
    }
}

fn to_f32(vec: &[f64]) -> Vec<f32> {
    vec.iter().map(|&v| v as f32).collect()
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let model = self.client().embedding_model(&self.embedding_model);
        let embedding = model.embed_text(text).await?;
        Ok(to_f32(&embedding.vec))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        use rig::client::EmbeddingsClient as _;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.client().embedding_model(&self.embedding_model);
        let embeddings = model.embed_texts(texts.to_vec()).await?;

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                texts.len()
            ));
        }

        debug!("Generados {} embeddings con {}", embeddings.len(), self.embedding_model);
        Ok(embeddings.iter().map(|e| to_f32(&e.vec)).collect())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let preamble = join_role(request, Role::System, "\n");
        let prompt = join_role(request, Role::User, "\n\n");

        let agent = self
            .client()
            .agent(&request.model)
            .preamble(&preamble)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build();

        let answer = agent.prompt(prompt.as_str()).await?;
        Ok(answer)
    }
}

/// Concatena, en orden, el contenido de los mensajes de un rol.
fn join_role(request: &ChatRequest, role: Role, separator: &str) -> String {
    request
        .messages
        .iter()
        .filter(|m| m.role == role)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;

    #[test]
    fn join_role_keeps_message_order() {
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![
                ChatMessage::system("uno"),
                ChatMessage::user("pregunta"),
                ChatMessage::system("dos"),
            ],
            temperature: 0.7,
            max_tokens: 16,
        };

        assert_eq!(join_role(&request, Role::System, "\n"), "uno\ndos");
        assert_eq!(join_role(&request, Role::User, "\n\n"), "pregunta");
    }

    #[test]
    fn embeddings_are_narrowed_to_f32() {
        assert_eq!(to_f32(&[0.5, -1.25]), vec![0.5_f32, -1.25_f32]);
    }
}
