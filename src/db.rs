use crate::error::{CatalogError, Result};
use crate::storage::{PersistenceSink, TableTarget};
use crate::types::NormalizedRecord;
use async_trait::async_trait;
use libsql::{Builder, Connection, Database, Value};
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info};

struct RemoteState {
    _db: Database,
    conn: Connection,
    prepared: HashSet<TableTarget>,
}

/// Catalog sink backed by a remote libSQL (Turso) database.
///
/// Remote databases have a single `main` schema. Batches are serialized on
/// one connection and each is written in its own transaction.
pub struct RemoteSink {
    state: Mutex<Option<RemoteState>>,
}

impl RemoteSink {
    pub async fn open(url: &str, auth_token: Option<&str>, target: &TableTarget) -> Result<Self> {
        if !target.is_main_schema() {
            return Err(CatalogError::Config(format!(
                "remote databases only support the main schema, got '{}'",
                target.schema
            )));
        }

        info!("Connecting to libSQL database at {}", url);
        let db = Builder::new_remote(url.to_string(), auth_token.unwrap_or_default().to_string())
            .build()
            .await
            .map_err(|e| CatalogError::Database {
                message: format!("Failed to connect to database: {e}"),
            })?;
        let conn = db.connect()?;
        conn.execute_batch(&target.create_table_sql()).await?;

        let mut prepared = HashSet::new();
        prepared.insert(target.clone());
        Ok(Self {
            state: Mutex::new(Some(RemoteState { _db: db, conn, prepared })),
        })
    }

    async fn insert_batch(state: &mut RemoteState, batch: &[NormalizedRecord], target: &TableTarget) -> Result<usize> {
        if !state.prepared.contains(target) {
            state.conn.execute_batch(&target.create_table_sql()).await?;
            state.prepared.insert(target.clone());
        }

        let sql = target.insert_sql();
        let tx = state.conn.transaction().await?;
        for record in batch {
            tx.execute(&sql, libsql::params::Params::Positional(row_values(record)))
                .await?;
        }
        tx.commit().await?;
        Ok(batch.len())
    }
}

fn text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn row_values(record: &NormalizedRecord) -> Vec<Value> {
    vec![
        text(&record.provedor),
        text(&record.categoria),
        text(&record.titulo),
        record.ano.map(|v| Value::Integer(i64::from(v))).unwrap_or(Value::Null),
        text(&record.duracao),
        record
            .duracao_minutos
            .map(|v| Value::Integer(i64::from(v)))
            .unwrap_or(Value::Null),
        record.imdb_score.map(Value::Real).unwrap_or(Value::Null),
        record
            .imdb_count
            .and_then(|v| i64::try_from(v).ok())
            .map(Value::Integer)
            .unwrap_or(Value::Null),
        text(&record.classificacao),
        text(&record.sinopse),
        text(&record.url),
        Value::Text(record.extract_timestamp_text()),
    ]
}

#[async_trait]
impl PersistenceSink for RemoteSink {
    async fn write(&self, batch: &[NormalizedRecord], target: &TableTarget) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(CatalogError::SinkClosed)?;
        let started = Instant::now();

        match Self::insert_batch(state, batch, target).await {
            Ok(written) => {
                crate::metrics::sink::batch_written(written, started.elapsed().as_secs_f64());
                Ok(written)
            }
            Err(e) => {
                crate::metrics::sink::write_failed();
                error!(table = %target, batch_size = batch.len(), "Failed to write batch: {}", e);
                Err(CatalogError::Persistence {
                    table: target.to_string(),
                    batch_size: batch.len(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.state.lock().await.take().is_some() {
            info!("libSQL sink closed");
        }
        Ok(())
    }
}
