//! Atlas Search 查询构建
//!
//! 只负责生成 `$search` 管道并按 `searchAfter` 游标翻页，检索引擎本身在外部。
//! 检索令牌与普通分页令牌格式相同，唯一的游标键为 `searchAfter`，排序与过滤条件沿用。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document, doc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::PaginationConfig;
use crate::error::PaginationResult;
use crate::pagination::{
    CursorValue, FilterField, FilterOperator, PaginationRequest, PaginationSlice,
    SEARCH_AFTER_CURSOR,
};
use crate::query::stages::json_to_bson;
use crate::storage::AggregateStore;

pub const ONE_HOUR_MS: i64 = 60 * 60 * 1000;
pub const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;
pub const ONE_WEEK_MS: i64 = 7 * ONE_DAY_MS;

/// `$addFields` 写入的检索元数据字段
pub const SEARCH_SCORE_FIELD: &str = "_searchScore";
pub const SEARCH_AFTER_FIELD: &str = "_searchAfter";

/// 相关度打分方式
#[derive(Debug, Clone, PartialEq)]
pub enum Score {
    /// 乘以固定倍数
    Boost(f64),
    /// 替换为固定分值
    Constant(f64),
    /// 乘以文档中某个数值字段
    Path(String),
    /// 自定义打分表达式
    Function(Document),
}

impl Score {
    pub fn to_document(&self) -> Document {
        match self {
            Score::Boost(value) => doc! { "boost": { "value": *value } },
            Score::Constant(value) => doc! { "constant": { "value": *value } },
            Score::Path(path) => doc! { "boost": { "path": path.as_str() } },
            Score::Function(expression) => doc! { "function": expression.clone() },
        }
    }
}

/// 文本命中时额外加分的字段
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreField {
    pub field: String,
    pub score: Score,
}

impl ScoreField {
    pub fn new(field: impl Into<String>, score: Score) -> Self {
        Self {
            field: field.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn to_document(self) -> Document {
        doc! { "type": "Point", "coordinates": [self.longitude, self.latitude] }
    }
}

/// 距离原点越近得分越高的字段
#[derive(Debug, Clone, PartialEq)]
pub enum NearField {
    /// `pivot` 为毫秒
    Date {
        field: String,
        origin: DateTime<Utc>,
        pivot: i64,
        score: Option<Score>,
    },
    Numeric {
        field: String,
        origin: f64,
        pivot: f64,
        score: Option<Score>,
    },
    /// `pivot` 为米
    Geo {
        field: String,
        origin: GeoPoint,
        pivot: f64,
        score: Option<Score>,
    },
}

impl NearField {
    pub fn field(&self) -> &str {
        match self {
            NearField::Date { field, .. }
            | NearField::Numeric { field, .. }
            | NearField::Geo { field, .. } => field,
        }
    }

    pub fn score(&self) -> Option<&Score> {
        match self {
            NearField::Date { score, .. }
            | NearField::Numeric { score, .. }
            | NearField::Geo { score, .. } => score.as_ref(),
        }
    }

    fn to_clause(&self) -> Document {
        let (origin, pivot) = match self {
            NearField::Date { origin, pivot, .. } => (
                Bson::DateTime(bson::DateTime::from_chrono(*origin)),
                Bson::Int64(*pivot),
            ),
            NearField::Numeric { origin, pivot, .. } => {
                (Bson::Double(*origin), Bson::Double(*pivot))
            }
            NearField::Geo { origin, pivot, .. } => {
                (Bson::Document(origin.to_document()), Bson::Double(*pivot))
            }
        };

        let mut near = doc! {
            "path": self.field(),
            "origin": origin,
            "pivot": pivot,
        };
        if let Some(score) = self.score() {
            near.insert("score", score.to_document());
        }
        doc! { "near": near }
    }
}

/// 检索配置
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfiguration {
    pub text_search_fields: Vec<String>,
    pub fuzzy_max_edits: u32,
    pub score_fields: Vec<ScoreField>,
    pub near_fields: Vec<NearField>,
}

impl Default for SearchConfiguration {
    fn default() -> Self {
        Self {
            text_search_fields: Vec::new(),
            fuzzy_max_edits: 1,
            score_fields: Vec::new(),
            near_fields: Vec::new(),
        }
    }
}

impl SearchConfiguration {
    pub fn new<I, S>(text_search_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text_search_fields: text_search_fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_fuzzy_max_edits(mut self, max_edits: u32) -> Self {
        self.fuzzy_max_edits = max_edits;
        self
    }

    pub fn with_score_field(mut self, field: ScoreField) -> Self {
        self.score_fields.push(field);
        self
    }

    pub fn with_near_field(mut self, field: NearField) -> Self {
        self.near_fields.push(field);
        self
    }
}

/// 一个检索索引的定义
pub trait SearchIndex: Send + Sync {
    type Entity: DeserializeOwned + Send;

    fn index_name(&self) -> &str;

    /// 索引所在集合
    fn collection_name(&self) -> &str;

    fn configuration(&self) -> SearchConfiguration;

    /// 接口字段名到索引路径的映射（如 `title` -> `post.title`）
    fn field_aliases(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// 按别名表改写排序和过滤字段名，游标保持不变
pub fn alias_request(
    request: &PaginationRequest,
    aliases: &HashMap<String, String>,
) -> PaginationRequest {
    let resolve = |field: &str| aliases.get(field).cloned().unwrap_or_else(|| field.to_string());

    let mut aliased = request.clone();
    for sort in &mut aliased.page_token.sort_fields {
        sort.field = resolve(&sort.field);
    }
    for filter in &mut aliased.page_token.filter_fields {
        filter.field = resolve(&filter.field);
    }
    aliased
}

/// 检索查询构建器
#[derive(Clone)]
pub struct SearchQueryBuilder {
    store: Arc<dyn AggregateStore>,
    max_results: usize,
}

impl SearchQueryBuilder {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self::from_config(store, &PaginationConfig::default())
    }

    pub fn from_config(store: Arc<dyn AggregateStore>, config: &PaginationConfig) -> Self {
        Self {
            store,
            max_results: config.search_max_results.max(1),
        }
    }

    /// 实际页大小：不超过检索单页上限
    pub fn page_limit(&self, request: &PaginationRequest) -> usize {
        request.limit.clamp(1, self.max_results)
    }

    pub fn build_search_pipeline(
        &self,
        index_name: &str,
        request: &PaginationRequest,
        search_text: &str,
        configuration: &SearchConfiguration,
    ) -> Vec<Document> {
        let token = &request.page_token;

        let mut search = doc! {
            "index": index_name,
            "compound": compound_query(search_text, configuration, &token.filter_fields),
        };
        if let Some(cursor) = token.cursor(SEARCH_AFTER_CURSOR) {
            search.insert("searchAfter", cursor.to_bson());
        }

        let mut metadata = Document::new();
        metadata.insert(SEARCH_SCORE_FIELD, doc! { "$meta": "searchScore" });
        metadata.insert(SEARCH_AFTER_FIELD, doc! { "$meta": "searchSequenceToken" });

        let limit = i64::try_from(self.page_limit(request)).unwrap_or(i64::MAX);
        vec![
            doc! { "$search": search },
            doc! { "$addFields": metadata },
            doc! { "$limit": limit },
        ]
    }

    /// 执行检索
    ///
    /// 满页时以最后一条的 `_searchAfter` 作为下一页游标；结果不足一页即为最后一页。
    #[instrument(skip(self, request, configuration), fields(limit = request.limit))]
    pub async fn search<T: DeserializeOwned>(
        &self,
        index_name: &str,
        collection: &str,
        request: &PaginationRequest,
        search_text: &str,
        configuration: &SearchConfiguration,
    ) -> PaginationResult<PaginationSlice<T>> {
        let limit = self.page_limit(request);
        let pipeline = self.build_search_pipeline(index_name, request, search_text, configuration);

        let rows = self.store.execute_query(collection, pipeline).await?;

        let next_page_token = if rows.len() >= limit {
            let sequence_token = rows
                .last()
                .and_then(|row| row.get_str(SEARCH_AFTER_FIELD).ok());
            if sequence_token.is_none() {
                debug!(index = %index_name, "Full search page without sequence token");
            }
            sequence_token.map(|sequence| {
                let mut cursors = HashMap::with_capacity(1);
                cursors.insert(
                    SEARCH_AFTER_CURSOR.to_string(),
                    CursorValue::String(sequence.to_string()),
                );
                request.page_token.with_cursors(cursors)
            })
        } else {
            None
        };

        let items = rows
            .into_iter()
            .map(bson::from_document::<T>)
            .collect::<Result<Vec<T>, _>>()?;

        debug!(index = %index_name, returned = items.len(), "Search finished");
        Ok(PaginationSlice::new(items, next_page_token))
    }

    /// 使用索引定义检索：先改写字段别名，`configuration` 为空时使用索引自身的配置
    pub async fn search_index<I: SearchIndex>(
        &self,
        index: &I,
        search_text: &str,
        request: &PaginationRequest,
        configuration: Option<&SearchConfiguration>,
    ) -> PaginationResult<PaginationSlice<I::Entity>> {
        let aliased = alias_request(request, &index.field_aliases());
        let default_configuration;
        let configuration = match configuration {
            Some(configuration) => configuration,
            None => {
                default_configuration = index.configuration();
                &default_configuration
            }
        };

        self.search(
            index.index_name(),
            index.collection_name(),
            &aliased,
            search_text,
            configuration,
        )
        .await
    }
}

fn compound_query(
    search_text: &str,
    configuration: &SearchConfiguration,
    filters: &[FilterField],
) -> Document {
    let mut compound = doc! {
        "must": [ {
            "text": {
                "query": search_text,
                "path": configuration.text_search_fields.clone(),
                "fuzzy": { "maxEdits": i64::from(configuration.fuzzy_max_edits) },
            }
        } ],
    };

    let should: Vec<Document> = configuration
        .score_fields
        .iter()
        .map(|score_field| {
            doc! { "text": {
                "query": search_text,
                "path": score_field.field.as_str(),
                "score": score_field.score.to_document(),
            } }
        })
        .chain(configuration.near_fields.iter().map(NearField::to_clause))
        .collect();
    if !should.is_empty() {
        compound.insert("should", should);
    }

    if !filters.is_empty() {
        let clauses: Vec<Document> = filters.iter().map(filter_clause).collect();
        compound.insert("filter", clauses);
    }

    compound
}

fn filter_clause(filter: &FilterField) -> Document {
    let path = filter.field.as_str();
    match filter.operator {
        FilterOperator::Equals => match &filter.value {
            Value::Number(_) | Value::Bool(_) => {
                doc! { "equals": { "path": path, "value": json_to_bson(&filter.value) } }
            }
            other => doc! { "text": { "query": plain_text(other), "path": path } },
        },
        FilterOperator::In => {
            let query = match &filter.value {
                Value::Array(items) => items.iter().map(plain_text).collect::<Vec<_>>().join(" OR "),
                other => plain_text(other),
            };
            doc! { "queryString": { "defaultPath": path, "query": query } }
        }
        FilterOperator::LessThan => {
            doc! { "range": { "path": path, "lt": json_to_bson(&filter.value) } }
        }
        FilterOperator::GreaterThan => {
            doc! { "range": { "path": path, "gt": json_to_bson(&filter.value) } }
        }
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::pagination::{PageToken, SortDirection};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Hit {
        title: String,
    }

    #[derive(Default)]
    struct CannedStore {
        rows: Vec<Document>,
        pipelines: Mutex<Vec<Vec<Document>>>,
    }

    #[async_trait]
    impl AggregateStore for CannedStore {
        async fn execute_query(
            &self,
            _collection: &str,
            pipeline: Vec<Document>,
        ) -> Result<Vec<Document>, StorageError> {
            self.pipelines.lock().unwrap().push(pipeline);
            Ok(self.rows.clone())
        }
    }

    struct PostIndex;

    impl SearchIndex for PostIndex {
        type Entity = Hit;

        fn index_name(&self) -> &str {
            "post_stats_search"
        }

        fn collection_name(&self) -> &str {
            "post_stats"
        }

        fn configuration(&self) -> SearchConfiguration {
            SearchConfiguration::new(["post.title", "post.content"])
                .with_score_field(ScoreField::new("post.title", Score::Boost(1.5)))
        }

        fn field_aliases(&self) -> HashMap<String, String> {
            [("title", "post.title"), ("createdAt", "post.createdAt")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }
    }

    fn hits(count: usize) -> Vec<Document> {
        (0..count)
            .map(|i| doc! { "title": format!("post {i}"), "_searchScore": 1.0, "_searchAfter": format!("seq-{i}") })
            .collect()
    }

    #[test]
    fn test_build_search_pipeline() {
        let builder = SearchQueryBuilder::new(Arc::new(CannedStore::default()));
        let origin = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let configuration = SearchConfiguration::new(["title", "content"])
            .with_fuzzy_max_edits(2)
            .with_score_field(ScoreField::new("title", Score::Path("popularity".into())))
            .with_near_field(NearField::Date {
                field: "createdAt".into(),
                origin,
                pivot: ONE_WEEK_MS,
                score: Some(Score::Constant(3.0)),
            });
        let request = PaginationRequest::with_limit(50)
            .with_filter("likes", 5, FilterOperator::Equals)
            .with_filter("tags", json!(["rust", "async"]), FilterOperator::In)
            .with_filter("author", "ada", FilterOperator::Equals)
            .with_filter("likes", 100, FilterOperator::LessThan);

        let pipeline = builder.build_search_pipeline("posts_search", &request, "tokio", &configuration);
        assert_eq!(
            pipeline,
            vec![
                doc! { "$search": {
                    "index": "posts_search",
                    "compound": {
                        "must": [ { "text": {
                            "query": "tokio",
                            "path": ["title", "content"],
                            "fuzzy": { "maxEdits": 2_i64 },
                        } } ],
                        "should": [
                            { "text": { "query": "tokio", "path": "title", "score": { "boost": { "path": "popularity" } } } },
                            { "near": {
                                "path": "createdAt",
                                "origin": bson::DateTime::from_chrono(origin),
                                "pivot": ONE_WEEK_MS,
                                "score": { "constant": { "value": 3.0 } },
                            } },
                        ],
                        "filter": [
                            { "equals": { "path": "likes", "value": 5_i64 } },
                            { "queryString": { "defaultPath": "tags", "query": "rust OR async" } },
                            { "text": { "query": "ada", "path": "author" } },
                            { "range": { "path": "likes", "lt": 100_i64 } },
                        ],
                    },
                } },
                doc! { "$addFields": {
                    "_searchScore": { "$meta": "searchScore" },
                    "_searchAfter": { "$meta": "searchSequenceToken" },
                } },
                // 页大小被限制在检索上限以内
                doc! { "$limit": 10_i64 },
            ]
        );
    }

    #[test]
    fn test_search_after_cursor_in_pipeline() {
        let builder = SearchQueryBuilder::new(Arc::new(CannedStore::default()));
        let mut cursors = HashMap::new();
        cursors.insert(
            SEARCH_AFTER_CURSOR.to_string(),
            CursorValue::String("seq-9".to_string()),
        );
        let request = PaginationRequest::new(PageToken::new(cursors, Vec::new(), Vec::new()), 5);

        let pipeline =
            builder.build_search_pipeline("idx", &request, "q", &SearchConfiguration::new(["title"]));
        let search = pipeline[0].get_document("$search").unwrap();
        assert_eq!(search.get_str("searchAfter").unwrap(), "seq-9");
        assert!(!search.get_document("compound").unwrap().contains_key("should"));
        assert!(!search.get_document("compound").unwrap().contains_key("filter"));
        assert_eq!(pipeline[2], doc! { "$limit": 5_i64 });
    }

    #[test]
    fn test_alias_request() {
        let aliases = PostIndex.field_aliases();
        let request = PaginationRequest::with_limit(5)
            .with_sort("createdAt", SortDirection::Desc)
            .with_filter("title", "rust", FilterOperator::Equals)
            .with_filter("likeCount", 3, FilterOperator::GreaterThan);

        let aliased = alias_request(&request, &aliases);
        assert_eq!(aliased.page_token.sort_fields[0].field, "post.createdAt");
        assert_eq!(aliased.page_token.filter_fields[0].field, "post.title");
        assert_eq!(aliased.page_token.filter_fields[1].field, "likeCount");
        assert_eq!(aliased.limit, 5);
        // 原请求不变
        assert_eq!(request.page_token.sort_fields[0].field, "createdAt");
    }

    #[tokio::test]
    async fn test_search_full_page_yields_search_after_token() {
        let store = Arc::new(CannedStore {
            rows: hits(3),
            ..Default::default()
        });
        let builder = SearchQueryBuilder::new(store.clone());
        let request = PaginationRequest::with_limit(3).with_filter("title", "rust", FilterOperator::Equals);

        let page: PaginationSlice<Hit> = builder
            .search_index(&PostIndex, "rust", &request, None)
            .await
            .unwrap();
        assert_eq!(page.len(), 3);

        let next = page.next_page_token().unwrap();
        assert_eq!(next.cursors.len(), 1);
        assert_eq!(
            next.cursor(SEARCH_AFTER_CURSOR),
            Some(&CursorValue::String("seq-2".to_string()))
        );
        // 过滤条件沿用改写后的字段名
        assert_eq!(next.filter_fields[0].field, "post.title");

        // 令牌经过编码后仍然可用
        let decoded = PageToken::decode(&next.encode());
        assert_eq!(&decoded, next);

        let pipelines = store.pipelines.lock().unwrap();
        let search = pipelines[0][0].get_document("$search").unwrap();
        assert_eq!(search.get_str("index").unwrap(), "post_stats_search");
    }

    #[tokio::test]
    async fn test_search_partial_page_is_last() {
        let store = Arc::new(CannedStore {
            rows: hits(2),
            ..Default::default()
        });
        let builder = SearchQueryBuilder::new(store);
        let page: PaginationSlice<Hit> = builder
            .search(
                "idx",
                "posts",
                &PaginationRequest::with_limit(5),
                "rust",
                &SearchConfiguration::new(["title"]),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(!page.has_next());

        let empty = Arc::new(CannedStore::default());
        let page: PaginationSlice<Hit> = SearchQueryBuilder::new(empty)
            .search(
                "idx",
                "posts",
                &PaginationRequest::with_limit(5),
                "rust",
                &SearchConfiguration::new(["title"]),
            )
            .await
            .unwrap();
        assert!(page.is_empty());
        assert!(page.next_page_token().is_none());
    }

    #[test]
    fn test_geo_and_numeric_near_clauses() {
        let geo = NearField::Geo {
            field: "location".into(),
            origin: GeoPoint {
                longitude: 13.4,
                latitude: 52.5,
            },
            pivot: 1000.0,
            score: None,
        };
        assert_eq!(
            geo.to_clause(),
            doc! { "near": {
                "path": "location",
                "origin": { "type": "Point", "coordinates": [13.4, 52.5] },
                "pivot": 1000.0,
            } }
        );

        let numeric = NearField::Numeric {
            field: "score".into(),
            origin: 1.0,
            pivot: 500.0,
            score: Some(Score::Boost(1.2)),
        };
        assert_eq!(numeric.score(), Some(&Score::Boost(1.2)));
        assert_eq!(
            numeric.to_clause().get_document("near").unwrap().get_f64("origin").unwrap(),
            1.0
        );
    }
}
