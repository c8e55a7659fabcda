use crate::error::{CatalogError, Result};
use crate::storage::{DatabaseLocation, PersistenceSink, TableTarget};
use crate::types::NormalizedRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info};

/// Open a SQLite connection with `schema` available under its own name.
///
/// SQLite has no schemas, so a schema other than `main`/`temp` is attached
/// as a database of the same name: `<schema>.db` next to the primary file,
/// or an in-memory database for in-memory primaries.
pub fn open_connection(location: &DatabaseLocation, schema: &str, read_only: bool) -> Result<Connection> {
    let conn = match location {
        DatabaseLocation::Memory => Connection::open_in_memory()?,
        DatabaseLocation::File(path) => {
            if read_only {
                Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?
            } else {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path)?;
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                conn
            }
        }
        DatabaseLocation::Remote(url) => {
            return Err(CatalogError::Config(format!(
                "'{url}' is not a local SQLite database"
            )))
        }
    };

    if !matches!(schema, "main" | "temp") {
        let attach_path = match location {
            DatabaseLocation::File(path) => schema_file(path, schema),
            _ => ":memory:".to_string(),
        };
        conn.execute(&format!("ATTACH DATABASE ?1 AS \"{schema}\""), params![attach_path])?;
        debug!("Attached schema {} from {}", schema, attach_path);
    }

    Ok(conn)
}

fn schema_file(primary: &Path, schema: &str) -> String {
    primary
        .with_file_name(format!("{schema}.db"))
        .to_string_lossy()
        .to_string()
}

struct SinkState {
    conn: Connection,
    prepared: HashSet<TableTarget>,
}

/// Local SQLite catalog sink.
///
/// One connection is shared by every stream of a run; batch writes are
/// serialized by the mutex and each runs in its own transaction.
pub struct SqliteSink {
    state: Arc<Mutex<Option<SinkState>>>,
}

impl SqliteSink {
    pub fn open(location: &DatabaseLocation, target: &TableTarget) -> Result<Self> {
        let conn = open_connection(location, &target.schema, false)?;
        conn.execute_batch(&target.create_table_sql())?;
        info!("SQLite sink ready for {}", target);

        let mut prepared = HashSet::new();
        prepared.insert(target.clone());
        Ok(Self {
            state: Arc::new(Mutex::new(Some(SinkState { conn, prepared }))),
        })
    }

    fn insert_batch(state: &mut SinkState, batch: &[NormalizedRecord], target: &TableTarget) -> Result<usize> {
        if !state.prepared.contains(target) {
            state.conn.execute_batch(&target.create_table_sql())?;
            state.prepared.insert(target.clone());
        }

        let tx = state.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&target.insert_sql())?;
            for record in batch {
                let imdb_count = record.imdb_count.and_then(|c| i64::try_from(c).ok());
                stmt.execute(params![
                    record.provedor,
                    record.categoria,
                    record.titulo,
                    record.ano,
                    record.duracao,
                    record.duracao_minutos,
                    record.imdb_score,
                    imdb_count,
                    record.classificacao,
                    record.sinopse,
                    record.url,
                    record.extract_timestamp_text(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(batch.len())
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn write(&self, batch: &[NormalizedRecord], target: &TableTarget) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let state = Arc::clone(&self.state);
        let rows = batch.to_vec();
        let write_target = target.clone();
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut guard = state.lock().map_err(|_| CatalogError::Database {
                message: "sink connection lock poisoned".to_string(),
            })?;
            let state = guard.as_mut().ok_or(CatalogError::SinkClosed)?;
            Self::insert_batch(state, &rows, &write_target)
        })
        .await
        .map_err(|e| CatalogError::Database {
            message: format!("batch write task failed: {e}"),
        })
        .and_then(|inner| inner);

        match result {
            Ok(written) => {
                crate::metrics::sink::batch_written(written, started.elapsed().as_secs_f64());
                debug!("Wrote {} rows to {}", written, target);
                Ok(written)
            }
            Err(CatalogError::SinkClosed) => {
                error!(table = %target, batch_size = batch.len(), "Write attempted on closed sink");
                Err(CatalogError::SinkClosed)
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
        let taken = {
            let mut guard = self.state.lock().map_err(|_| CatalogError::Database {
                message: "sink connection lock poisoned".to_string(),
            })?;
            guard.take()
        };

        if let Some(state) = taken {
            state.conn.close().map_err(|(_, e)| CatalogError::from(e))?;
            info!("SQLite sink closed");
        }
        Ok(())
    }
}
