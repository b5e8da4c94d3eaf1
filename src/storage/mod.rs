//! 存储层接口
//!
//! 查询构建器只依赖 `AggregateStore`：按顺序执行一组聚合阶段并返回完整物化的原始文档。
//! - `mongo`：基于 MongoDB 驱动的实现
//! - `memory`：进程内实现，支持构建器生成的阶段与操作符子集，用于测试和本地运行

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use crate::error::StorageError;

pub mod memory;
pub mod mongo;

pub use memory::InMemoryAggregateStore;
pub use mongo::MongoAggregateStore;

/// 聚合执行接口
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// 在指定集合上执行聚合管道
    async fn execute_query(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StorageError>;
}

/// 按点分路径读取字段值（如 `author._id`）
pub fn get_raw_field_value<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}
