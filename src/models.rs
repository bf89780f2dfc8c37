//! Modelos de dominio (documentos almacenados, mensajes de chat y resultado de consultas).

/// Un documento tal y como se guarda en el vector store:
/// texto original + embedding + identificador único.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
}

/// Rol de un mensaje dentro del prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Petición completa al endpoint de chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u64,
}

/// Resultado de una consulta RAG.
///
/// Los fallos son datos: el usuario ve ambos casos igual, pero internamente
/// se distingue qué camino se tomó.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Answer(String),
    Failure(String),
}

impl QueryOutcome {
    /// Texto que se muestra al usuario.
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) | Self::Failure(text) => text,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}
