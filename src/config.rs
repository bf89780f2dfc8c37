//! Carga y gestión de configuración de la aplicación (credencial + LLM + vector store).
//!
//! La credencial se resuelve primero desde el entorno y después desde un fichero
//! de secretos TOML. Nunca se escribe de vuelta en el entorno del proceso: se
//! pasa explícitamente al cliente de la API.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

const DEFAULT_LANGUAGE_MODEL: &str = "gpt-4";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_MAX_TOKENS: u64 = 4096;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_VECTOR_STORE_PATH: &str = "./vectorstore";
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:3322";
const DEFAULT_SECRETS_PATH: &str = ".secrets.toml";

/// Credencial de la API. Su `Debug` nunca muestra el valor.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Almacén de secretos de respaldo (fichero TOML plano `CLAVE = "valor"`).
#[derive(Debug, Default, Clone)]
pub struct Secrets {
    values: HashMap<String, toml::Value>,
}

impl Secrets {
    /// Lee el fichero de secretos. Si no existe se considera vacío.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Sin fichero de secretos en {}", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("No se pudo leer el fichero de secretos {}", path.display()))?;
        Self::parse(&raw)
            .with_context(|| format!("Fichero de secretos inválido: {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let values: HashMap<String, toml::Value> = toml::from_str(raw)?;
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(toml::Value::as_str)
            .map(str::to_string)
    }
}

/// Configuración completa de la aplicación. Inmutable tras construirse.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_key: ApiKey,
    pub language_model: String,
    pub embedding_model: String,
    pub llm_max_tokens: u64,
    pub llm_temperature: f64,
    pub vector_store_path: PathBuf,
    pub server_addr: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe)
    /// y, para la credencial, desde el fichero de secretos como respaldo.
    pub fn from_env() -> Result<Self> {
        let secrets_path =
            env::var("SECRETS_PATH").unwrap_or_else(|_| DEFAULT_SECRETS_PATH.to_string());
        let secrets = Secrets::load(Path::new(&secrets_path))?;
        let cfg = Self::from_sources(|key| env::var(key).ok(), &secrets)?;
        info!(
            "Configuración cargada: modelo={}, embeddings={}, vector store={}",
            cfg.language_model,
            cfg.embedding_model,
            cfg.vector_store_path.display()
        );
        Ok(cfg)
    }

    /// Construye la configuración a partir de una fuente de variables y de los secretos.
    pub fn from_sources<F>(lookup: F, secrets: &Secrets) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var(API_KEY_VAR)
            .or_else(|| secrets.get(API_KEY_VAR).filter(|v| !v.trim().is_empty()))
            .map(ApiKey)
            .ok_or_else(|| {
                anyhow!("{API_KEY_VAR} debe definirse en el entorno o en el fichero de secretos")
            })?;

        let language_model =
            var("LANGUAGE_MODEL").unwrap_or_else(|| DEFAULT_LANGUAGE_MODEL.to_string());
        let embedding_model =
            var("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        let llm_max_tokens = match var("LLM_MAX_TOKENS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("LLM_MAX_TOKENS no es un entero válido: {raw}"))?,
            None => DEFAULT_MAX_TOKENS,
        };
        let llm_temperature = match var("LLM_TEMPERATURE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("LLM_TEMPERATURE no es un número válido: {raw}"))?,
            None => DEFAULT_TEMPERATURE,
        };

        let vector_store_path = PathBuf::from(
            var("VECTOR_STORE_PATH").unwrap_or_else(|| DEFAULT_VECTOR_STORE_PATH.to_string()),
        );
        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());

        Ok(Self {
            api_key,
            language_model,
            embedding_model,
            llm_max_tokens,
            llm_temperature,
            vector_store_path,
            server_addr,
        })
    }
}
