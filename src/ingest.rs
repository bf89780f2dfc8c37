//! Ingesta de ficheros subidos por el usuario: validación, decodificación del
//! texto probando varias codificaciones en orden y alta en el pipeline RAG.

use std::fmt;

use encoding_rs::{UTF_8, WINDOWS_1252};
use tracing::{info, warn};

use crate::rag::RagPipeline;

/// Codificaciones candidatas, en orden de preferencia.
pub const UPLOAD_ENCODINGS: [TextEncoding; 3] = [
    TextEncoding::Utf8,
    TextEncoding::Latin1,
    TextEncoding::Windows1252,
];

/// Bytes sin carácter asignado en Windows-1252.
const WINDOWS_1252_UNDEFINED: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Windows1252,
}

impl TextEncoding {
    pub fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "latin-1",
            Self::Windows1252 => "windows-1252",
        }
    }

    /// Decodifica el contenido completo. `None` si los bytes no son válidos
    /// en esta codificación.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => {
                let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
                (!had_errors).then(|| text.into_owned())
            }
            // Juego gráfico ISO-8859-1: 0x80-0x9F no son texto.
            Self::Latin1 => {
                if bytes.iter().any(|b| (0x80..=0x9F).contains(b)) {
                    return None;
                }
                Some(encoding_rs::mem::decode_latin1(bytes).into_owned())
            }
            Self::Windows1252 => {
                if bytes.iter().any(|b| WINDOWS_1252_UNDEFINED.contains(b)) {
                    return None;
                }
                WINDOWS_1252
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(|text| text.into_owned())
            }
        }
    }
}

/// Texto decodificado junto con la codificación que funcionó.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

/// Prueba cada codificación en orden y se queda con la primera que funcione.
/// Cada intento parte del principio del contenido.
pub fn decode_upload(bytes: &[u8], encodings: &[TextEncoding]) -> Option<DecodedText> {
    encodings.iter().find_map(|&encoding| {
        encoding
            .decode(bytes)
            .map(|text| DecodedText { text, encoding })
    })
}

/// Motivos por los que una subida no llega al vector store.
#[derive(Debug)]
pub enum UploadError {
    UnsupportedType(String),
    Empty,
    Undecodable,
    Pipeline(anyhow::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType(name) => {
                write!(f, "Sólo se admiten ficheros .txt (recibido: {name}).")
            }
            Self::Empty => write!(f, "El fichero está vacío."),
            Self::Undecodable => write!(
                f,
                "No se pudo decodificar el fichero con ninguna de las codificaciones soportadas."
            ),
            Self::Pipeline(err) => write!(f, "Error procesando el documento: {err}"),
        }
    }
}

impl std::error::Error for UploadError {}

/// Resultado de una subida correcta.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub document_id: String,
    pub encoding: TextEncoding,
    pub chars: usize,
}

impl fmt::Display for UploadReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "¡Documento añadido a la base de conocimiento! ({} caracteres, {})",
            self.chars,
            self.encoding.label()
        )
    }
}

fn is_plain_text(filename: &str) -> bool {
    filename.to_lowercase().ends_with(".txt")
}

/// Valida, decodifica e ingiere un fichero subido como un único documento.
pub async fn ingest_upload(
    pipeline: &RagPipeline,
    filename: &str,
    bytes: &[u8],
) -> Result<UploadReceipt, UploadError> {
    if !is_plain_text(filename) {
        return Err(UploadError::UnsupportedType(filename.to_string()));
    }
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }

    let Some(decoded) = decode_upload(bytes, &UPLOAD_ENCODINGS) else {
        warn!("No se pudo decodificar {filename} ({} bytes)", bytes.len());
        return Err(UploadError::Undecodable);
    };
    info!("{filename} decodificado como {}", decoded.encoding.label());
    // Un BOM sin contenido decodifica a texto vacío.
    if decoded.text.is_empty() {
        return Err(UploadError::Empty);
    }

    let chars = decoded.text.chars().count();
    let ids = pipeline
        .add_documents(&[decoded.text])
        .await
        .map_err(UploadError::Pipeline)?;

    let document_id = ids.into_iter().next().unwrap_or_default();
    Ok(UploadReceipt {
        document_id,
        encoding: decoded.encoding,
        chars,
    })
}
