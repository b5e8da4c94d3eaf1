//! 分页查询构建器
//!
//! 把 `(实体, PaginationRequest, 前置阶段)` 转换为一次聚合查询并返回一页结果：
//! 1. 校验排序、过滤、游标字段，失败时不发起任何查询
//! 2. 依次拼接前置阶段、过滤、游标、排序、limit(+1) 阶段
//! 3. 多取的一条只用于判断是否有下一页，不返回给调用方

use std::collections::HashSet;
use std::sync::Arc;

use mongodb::bson::{self, Document};
use tracing::{debug, instrument, warn};

use crate::error::PaginationResult;
use crate::pagination::{PaginationRequest, PaginationSlice};
use crate::schema::{EntitySchema, FieldValidator, PageableEntity};
use crate::storage::AggregateStore;

pub mod cursor;
pub mod stages;

/// 单次查询的附加选项
#[derive(Debug, Clone, Default)]
pub struct PageOptions {
    /// 在过滤、游标、排序之前执行的阶段（如 `$lookup`、`$addFields`）
    pub pre_stages: Vec<Document>,
    /// 前置阶段产生的计算字段，允许用于排序、过滤和游标
    pub dynamic_fields: HashSet<String>,
    /// 即使在实体上声明了也不允许使用的字段
    pub excluded_fields: HashSet<String>,
}

impl PageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre_stage(mut self, stage: Document) -> Self {
        self.pre_stages.push(stage);
        self
    }

    pub fn with_pre_stages<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = Document>,
    {
        self.pre_stages.extend(stages);
        self
    }

    pub fn allow_dynamic_field(mut self, field: impl Into<String>) -> Self {
        self.dynamic_fields.insert(field.into());
        self
    }

    pub fn exclude_field(mut self, field: impl Into<String>) -> Self {
        self.excluded_fields.insert(field.into());
        self
    }
}

/// 校验请求并生成完整的聚合管道（不执行）
pub fn build_pipeline(
    schema: &EntitySchema,
    request: &PaginationRequest,
    options: &PageOptions,
) -> PaginationResult<Vec<Document>> {
    let token = &request.page_token;

    FieldValidator::new(schema, &options.dynamic_fields, &options.excluded_fields)
        .validate_token(token)?;

    let mut pipeline = options.pre_stages.clone();
    if let Some(stage) = stages::filter_stage(&token.filter_fields, schema)? {
        pipeline.push(stage);
    }
    if let Some(stage) = stages::cursor_stage(token, schema) {
        pipeline.push(stage);
    }
    if let Some(stage) = stages::sort_stage(&token.sort_fields, schema) {
        pipeline.push(stage);
    }
    pipeline.push(stages::limit_stage(request.limit.max(1)));

    Ok(pipeline)
}

/// 分页查询构建器
#[derive(Clone)]
pub struct PaginationQueryBuilder {
    store: Arc<dyn AggregateStore>,
}

impl PaginationQueryBuilder {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    /// 查询一页实体
    ///
    /// `limit` 为 0 时按 1 处理。存储层错误原样向上传递，不在此重试。
    #[instrument(skip(self, request, options), fields(limit = request.limit))]
    pub async fn get_page<T: PageableEntity>(
        &self,
        request: &PaginationRequest,
        options: PageOptions,
    ) -> PaginationResult<PaginationSlice<T>> {
        let schema = T::schema();
        let limit = request.limit.max(1);
        let pipeline = build_pipeline(schema, request, &options)?;

        debug!(
            entity = %schema.entity_name(),
            collection = %schema.collection(),
            stages = pipeline.len(),
            first_page = request.page_token.is_first_page(),
            "Executing pagination query"
        );

        let mut rows = self
            .store
            .execute_query(schema.collection(), pipeline)
            .await?;

        let next_page_token = if rows.len() > limit {
            rows.truncate(limit);
            let token = &request.page_token;
            if token.sort_fields.is_empty() {
                warn!(
                    entity = %schema.entity_name(),
                    "Paginating without sort fields, page order is not deterministic"
                );
            }
            match rows.last() {
                Some(last) => Some(cursor::next_page_token(last, token, schema)?),
                None => None,
            }
        } else {
            None
        };

        let items = rows
            .into_iter()
            .map(bson::from_document::<T>)
            .collect::<Result<Vec<T>, _>>()?;

        debug!(
            entity = %schema.entity_name(),
            returned = items.len(),
            has_next = next_page_token.is_some(),
            "Pagination query finished"
        );

        Ok(PaginationSlice::new(items, next_page_token))
    }
}
