//! Document store backed by a DataFusion session
//!
//! Every collection is a table registered under its bare name, one row per
//! document. Collections come from files in the configured data directory
//! (`<name>.json` / `<name>.ndjson` holding newline-delimited JSON
//! documents, or `<name>.parquet`) or are registered in memory.

use std::path::Path;
use std::sync::Arc;

use common::config::{ConfigError, StoreConfig};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::catalog::TableProvider;
use datafusion::common::{DFSchema, TableReference};
use datafusion::datasource::MemTable;
use datafusion::logical_expr::Expr;
use datafusion::prelude::{DataFrame, NdJsonReadOptions, ParquetReadOptions, SessionContext};

use super::error::QuerierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectionFormat {
    NdJson(&'static str),
    Parquet,
}

impl CollectionFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::NdJson(".json")),
            "ndjson" => Some(Self::NdJson(".ndjson")),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct CollectionStore {
    ctx: SessionContext,
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("collections", &self.collection_names())
            .finish()
    }
}

impl Default for CollectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore {
    /// An empty store
    pub fn new() -> Self {
        Self {
            ctx: SessionContext::new(),
        }
    }

    /// Load every collection file found in `config.data_dir`
    pub async fn open(config: &StoreConfig) -> Result<Self, QuerierError> {
        let store = Self::new();
        let dir = Path::new(&config.data_dir);
        let data_dir_error = |source| QuerierError::DataDirectory {
            path: config.data_dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(data_dir_error)? {
            let path = entry.map_err(data_dir_error)?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        for path in files {
            let Some(format) = CollectionFormat::from_path(&path) else {
                log::debug!("Skipping {}: not a collection file", path.display());
                continue;
            };
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                log::warn!("Skipping {}: file name is not valid UTF-8", path.display());
                continue;
            };
            store.load_file(name, &path, format).await?;
        }

        log::info!(
            "Loaded {} collection(s) from {}",
            store.collection_names().len(),
            dir.display()
        );
        Ok(store)
    }

    async fn load_file(
        &self,
        name: &str,
        path: &Path,
        format: CollectionFormat,
    ) -> Result<(), QuerierError> {
        let location = path.to_string_lossy();
        let frame = match format {
            CollectionFormat::NdJson(extension) => {
                self.ctx
                    .read_json(
                        location.as_ref(),
                        NdJsonReadOptions::default().file_extension(extension),
                    )
                    .await
            }
            CollectionFormat::Parquet => {
                self.ctx
                    .read_parquet(location.as_ref(), ParquetReadOptions::default())
                    .await
            }
        }
        .map_err(|source| QuerierError::FailedToRegisterCollection {
            name: name.to_string(),
            source,
        })?;

        log::debug!("Registering collection '{name}' from {}", path.display());
        self.register(name, frame.into_view())
    }

    /// Register a table provider as a collection, replacing any previous one
    pub fn register(&self, name: &str, table: Arc<dyn TableProvider>) -> Result<(), QuerierError> {
        self.ctx
            .register_table(TableReference::bare(name), table)
            .map_err(|source| QuerierError::FailedToRegisterCollection {
                name: name.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Register an in-memory batch of documents as a collection
    pub fn register_batch(&self, name: &str, batch: RecordBatch) -> Result<(), QuerierError> {
        let table = MemTable::try_new(batch.schema(), vec![vec![batch]]).map_err(|source| {
            QuerierError::FailedToRegisterCollection {
                name: name.to_string(),
                source,
            }
        })?;
        self.register(name, Arc::new(table))
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.ctx
            .table_exist(TableReference::bare(name))
            .unwrap_or(false)
    }

    /// Names of all registered collections, sorted
    pub fn collection_names(&self) -> Vec<String> {
        let options = self.ctx.state().config_options().catalog.clone();
        let mut names = self
            .ctx
            .catalog(&options.default_catalog)
            .and_then(|catalog| catalog.schema(&options.default_schema))
            .map(|schema| schema.table_names())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Fail unless every exposed collection is present
    pub fn ensure_exposed(&self, exposed: &[String]) -> Result<(), ConfigError> {
        match exposed.iter().find(|name| !self.has_collection(name)) {
            Some(missing) => Err(ConfigError::UnknownCollection(missing.clone())),
            None => Ok(()),
        }
    }

    /// Resolve a collection name to a queryable frame
    pub async fn collection(&self, name: &str) -> Result<DataFrame, QuerierError> {
        if !self.has_collection(name) {
            return Err(QuerierError::UnknownCollection(name.to_string()));
        }
        Ok(self.ctx.table(TableReference::bare(name)).await?)
    }

    /// Parse a SQL expression against the given schema
    pub fn parse_expr(&self, sql: &str, schema: &DFSchema) -> Result<Expr, QuerierError> {
        Ok(self.ctx.parse_sql_expr(sql, schema)?)
    }
}
