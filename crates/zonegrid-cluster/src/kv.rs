//! A cache store backed by one cluster table.
//!
//! Lets the cache strategies front any external system with a replicated
//! ZoneGrid table: keys are primary-key tuples, values are the table's
//! non-key columns.

use std::sync::Arc;

use async_trait::async_trait;

use zonegrid_cache::{CacheError, CacheResult, KvStore};
use zonegrid_core::{Row, Value};

use crate::cluster::Cluster;
use crate::error::ClusterError;

pub struct TableKvStore {
    cluster: Arc<Cluster>,
    table: String,
}

impl TableKvStore {
    pub fn new(cluster: Arc<Cluster>, table: &str) -> Self {
        Self {
            cluster,
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

fn store_error(e: ClusterError) -> CacheError {
    CacheError::Store(e.to_string())
}

#[async_trait]
impl KvStore<Vec<Value>, Vec<Value>> for TableKvStore {
    async fn get(&self, key: &Vec<Value>) -> CacheResult<Option<Vec<Value>>> {
        let row = self
            .cluster
            .get_row(&self.table, key, None)
            .await
            .map_err(store_error)?;
        Ok(row.map(|r| r.value))
    }

    async fn put(&self, key: Vec<Value>, value: Vec<Value>) -> CacheResult<()> {
        self.cluster
            .put_row(Row::new(&self.table, key, value))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn delete(&self, key: &Vec<Value>) -> CacheResult<bool> {
        let existed = self.get(key).await?.is_some();
        self.cluster
            .delete_row(&self.table, key.clone())
            .await
            .map_err(store_error)?;
        Ok(existed)
    }
}
