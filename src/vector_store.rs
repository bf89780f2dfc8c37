//! Integración con LanceDB como vector store de documentos.
//!
//! Una única tabla (`document_collection`) con el esquema
//! `{id, document, vector}`. La tabla se crea en la primera inserción con la
//! dimensión del primer lote y a partir de ahí sólo se añaden filas.
//!
//! API pública:
//!   - `DocumentStore` (trait usado por el pipeline)
//!   - `LanceDbStore::open(&Path)`

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::database::CreateTableMode;
use lancedb::Connection;
use tracing::{debug, info};

use crate::models::DocumentRecord;

pub const COLLECTION_NAME: &str = "document_collection";

/// Almacén de documentos con búsqueda por similitud.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Número de documentos almacenados.
    async fn count(&self) -> Result<usize>;

    /// Inserta un lote completo. O se guarda todo o nada.
    async fn insert_batch(&self, records: Vec<DocumentRecord>) -> Result<()>;

    /// Textos de los `limit` documentos más cercanos, en el orden que
    /// devuelve el índice.
    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<String>>;
}

/// Vector store persistente en disco sobre LanceDB.
pub struct LanceDbStore {
    connection: Connection,
    table_name: String,
}

impl LanceDbStore {
    /// Abre (o crea) la base de datos en `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).with_context(|| {
            format!("No se pudo crear el directorio del vector store {}", path.display())
        })?;

        let uri = path.to_string_lossy().to_string();
        info!("Abriendo LanceDB en {uri}...");
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .with_context(|| format!("Error conectando a LanceDB en {uri}"))?;

        let store = Self {
            connection,
            table_name: COLLECTION_NAME.to_string(),
        };
        info!(
            "Vector store listo ({} documentos en '{}')",
            store.count().await?,
            store.table_name
        );
        Ok(store)
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self.connection.table_names().execute().await?;
        Ok(names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .with_context(|| format!("No se pudo abrir la tabla '{}'", self.table_name))
    }

    /// Dimensión de la columna `vector` de la tabla existente.
    async fn existing_dimension(&self, table: &lancedb::Table) -> Result<usize> {
        let schema = table.schema().await?;
        let field = schema
            .field_with_name("vector")
            .map_err(|_| anyhow!("La tabla '{}' no tiene columna 'vector'", self.table_name))?;
        match field.data_type() {
            DataType::FixedSizeList(_, size) => Ok(*size as usize),
            other => Err(anyhow!("Tipo inesperado en la columna 'vector': {other:?}")),
        }
    }
}

fn schema_for(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("document", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
    ]))
}

/// Convierte los registros en un único `RecordBatch`.
fn to_record_batch(records: &[DocumentRecord], dimension: usize) -> Result<RecordBatch> {
    let mut flat = Vec::with_capacity(records.len() * dimension);
    for record in records {
        if record.embedding.len() != dimension {
            return Err(anyhow!(
                "Dimensión de embedding inconsistente en el documento {}: {} (esperada {})",
                record.id,
                record.embedding.len(),
                dimension
            ));
        }
        flat.extend_from_slice(&record.embedding);
    }

    let ids = StringArray::from_iter_values(records.iter().map(|r| r.id.as_str()));
    let documents = StringArray::from_iter_values(records.iter().map(|r| r.document.as_str()));
    let vectors = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dimension as i32,
        Arc::new(Float32Array::from(flat)),
        None,
    )?;

    let columns: Vec<ArrayRef> = vec![Arc::new(ids), Arc::new(documents), Arc::new(vectors)];
    let batch = RecordBatch::try_new(schema_for(dimension), columns)?;
    Ok(batch)
}

#[async_trait]
impl DocumentStore for LanceDbStore {
    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await? {
            return Ok(0);
        }
        let table = self.open_table().await?;
        Ok(table.count_rows(None).await?)
    }

    async fn insert_batch(&self, records: Vec<DocumentRecord>) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("Lote vacío, nada que insertar");
            return Ok(());
        };
        let dimension = first.embedding.len();
        if dimension == 0 {
            return Err(anyhow!("Embedding vacío para el documento {}", first.id));
        }

        if !self.table_exists().await? {
            info!("Creando tabla '{}' con dimensión {dimension}", self.table_name);
            self.connection
                .create_empty_table(&self.table_name, schema_for(dimension))
                // Otra inserción concurrente puede haberla creado ya.
                .mode(CreateTableMode::exist_ok(|builder| builder))
                .execute()
                .await
                .with_context(|| format!("No se pudo crear la tabla '{}'", self.table_name))?;
        }

        let table = self.open_table().await?;
        let expected = self.existing_dimension(&table).await?;
        if expected != dimension {
            return Err(anyhow!(
                "La colección guarda vectores de dimensión {expected}, el lote trae {dimension}"
            ));
        }

        // Un único RecordBatch => un único commit en LanceDB.
        let batch = to_record_batch(&records, dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .context("Error insertando documentos en LanceDB")?;

        debug!("Insertados {} documentos en '{}'", records.len(), self.table_name);
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<String>> {
        if limit == 0 || !self.table_exists().await? {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;
        let mut stream = table
            .vector_search(query_vector)?
            .column("vector")
            .limit(limit)
            .execute()
            .await
            .context("Error ejecutando la búsqueda vectorial")?;

        let mut documents = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let column = batch
                .column_by_name("document")
                .ok_or_else(|| anyhow!("Falta la columna 'document' en el resultado"))?
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| anyhow!("Tipo inválido en la columna 'document'"))?;
            for row in 0..column.len() {
                documents.push(column.value(row).to_string());
            }
        }

        Ok(documents)
    }
}
