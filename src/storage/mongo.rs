use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::Document;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use tracing::{debug, info};

use crate::config::MongoInstanceConfig;
use crate::error::StorageError;
use crate::storage::AggregateStore;

/// MongoDB 聚合执行器
///
/// 不做重试，超时与取消交给驱动自身的配置（连接串中的 `socketTimeoutMS` 等）。
#[derive(Clone)]
pub struct MongoAggregateStore {
    database: Database,
    _client: Arc<Client>,
}

impl MongoAggregateStore {
    pub async fn connect(config: &MongoInstanceConfig) -> Result<Self, StorageError> {
        let options = ClientOptions::parse(&config.url).await?;
        let client = Arc::new(Client::with_options(options)?);
        let database = client.database(config.database_name());

        info!(database = %config.database_name(), "MongoDB aggregate store initialized");

        Ok(Self {
            database,
            _client: client,
        })
    }

    pub fn from_client(client: Client, database: &str) -> Self {
        let database_handle = client.database(database);
        Self {
            database: database_handle,
            _client: Arc::new(client),
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl AggregateStore for MongoAggregateStore {
    async fn execute_query(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StorageError> {
        debug!(collection = %collection, stages = pipeline.len(), "Executing aggregation");

        let cursor = self
            .database
            .collection::<Document>(collection)
            .aggregate(pipeline, None)
            .await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents)
    }
}
