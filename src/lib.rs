//! Kogo 游标分页公共库
//!
//! 为基于 MongoDB 聚合管道的列表接口提供动态排序、过滤与游标分页：
//! - `pagination`：页面令牌、分页请求、分页结果
//! - `schema`：实体字段表与字段校验
//! - `query`：聚合管道构建与分页执行
//! - `search`：Atlas Search 检索分页
//! - `storage`：聚合执行接口（MongoDB / 内存实现）

pub mod config;
pub mod error;
pub mod pagination;
pub mod query;
pub mod schema;
pub mod search;
pub mod storage;
pub mod tracing;

pub use config::{
    ConfigManager, LoggingConfig, MongoInstanceConfig, PaginationAppConfig, PaginationConfig,
    load_config, load_config_from_source,
};
pub use error::*;
pub use pagination::{
    CursorValue, CursorValueType, FilterField, FilterOperator, PageToken, PaginationRequest,
    PaginationSlice, SortDirection, SortField,
};
pub use query::{PageOptions, PaginationQueryBuilder, build_pipeline};
pub use schema::{EntitySchema, FieldDescriptor, FieldKind, FieldValidator, PageableEntity};
pub use search::{
    NearField, Score, ScoreField, SearchConfiguration, SearchIndex, SearchQueryBuilder,
    alias_request,
};
pub use storage::{AggregateStore, InMemoryAggregateStore, MongoAggregateStore};
