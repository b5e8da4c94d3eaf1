//! 分页请求
//!
//! 支持的请求参数：
//! - `page_token`：上一页返回的令牌，存在时忽略 `sort` / `filter`
//! - `limit`：页大小
//! - `sort`：`field:asc,field2:desc`
//! - `filter`：`field:value,field2:in(a|b),field3:lt(10),field4:gt(5)`

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::config::PaginationConfig;
use crate::pagination::token::{FilterField, FilterOperator, PageToken, SortDirection, SortField};

pub const PAGE_TOKEN_PARAM: &str = "page_token";
pub const PAGE_SIZE_PARAM: &str = "limit";
pub const SORT_PARAM: &str = "sort";
pub const FILTER_PARAM: &str = "filter";

/// 默认页大小
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// 分页请求
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationRequest {
    pub page_token: PageToken,
    pub limit: usize,
}

impl Default for PaginationRequest {
    fn default() -> Self {
        Self {
            page_token: PageToken::empty(),
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PaginationRequest {
    pub fn new(page_token: PageToken, limit: usize) -> Self {
        Self { page_token, limit }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            page_token: PageToken::empty(),
            limit,
        }
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.page_token = self.page_token.with_sort(field, direction);
        self
    }

    pub fn with_filter(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
        operator: FilterOperator,
    ) -> Self {
        self.page_token = self.page_token.with_filter(field, value, operator);
        self
    }

    /// 使用下一页令牌构造后续请求，页大小不变
    pub fn next(&self, next_page_token: PageToken) -> Self {
        Self {
            page_token: next_page_token,
            limit: self.limit,
        }
    }

    /// 从请求参数解析分页请求
    pub fn from_query_params(params: &HashMap<String, String>, config: &PaginationConfig) -> Self {
        let param = |name: &str| {
            params
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let limit = param(PAGE_SIZE_PARAM)
            .and_then(|raw| match raw.parse::<usize>() {
                Ok(limit) => Some(limit),
                Err(err) => {
                    warn!(limit = %raw, error = %err, "Invalid page size, using default");
                    None
                }
            })
            .unwrap_or(config.default_page_size)
            .clamp(1, config.max_page_size.max(1));

        let page_token = match param(PAGE_TOKEN_PARAM) {
            Some(raw) => PageToken::decode(raw),
            None => PageToken::new(
                HashMap::new(),
                param(SORT_PARAM).map(parse_sort).unwrap_or_default(),
                param(FILTER_PARAM).map(parse_filters).unwrap_or_default(),
            ),
        };

        Self { page_token, limit }
    }
}

/// 解析 `field:asc,field2:desc`；缺省方向为降序，非法片段跳过
///
/// 同一字段只保留第一次出现的方向。
pub fn parse_sort(raw: &str) -> Vec<SortField> {
    let mut seen: HashSet<String> = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .filter_map(|piece| {
            let (field, direction) = match piece.split_once(':') {
                Some((field, direction)) => (field.trim(), direction.parse::<SortDirection>()),
                None => (piece, Ok(SortDirection::default())),
            };
            match direction {
                Ok(direction) if !field.is_empty() => Some(SortField::new(field, direction)),
                Ok(_) => {
                    warn!(sort = %piece, "Empty sort field, skipping");
                    None
                }
                Err(err) => {
                    warn!(sort = %piece, error = %err, "Invalid sort parameter, skipping");
                    None
                }
            }
        })
        .filter(|sort| {
            let first = seen.insert(sort.field.clone());
            if !first {
                warn!(field = %sort.field, "Duplicate sort field, keeping first occurrence");
            }
            first
        })
        .collect()
}

/// 解析过滤参数
///
/// `in(...)` 内部用 `|` 分隔，避免与外层的 `,` 冲突。值均以字符串保存，
/// 由查询构建器按字段类型转换。
pub fn parse_filters(raw: &str) -> Vec<FilterField> {
    raw.split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .filter_map(|piece| {
            let Some((field, value)) = piece.split_once(':') else {
                warn!(filter = %piece, "Invalid filter parameter, skipping");
                return None;
            };
            let field = field.trim();
            if field.is_empty() {
                warn!(filter = %piece, "Empty filter field, skipping");
                return None;
            }
            let (operator, value) = parse_filter_value(value.trim());
            Some(FilterField::new(field, value, operator))
        })
        .collect()
}

fn parse_filter_value(raw: &str) -> (FilterOperator, Value) {
    let wrapped = |prefix: &str| {
        raw.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(')'))
    };

    if let Some(inner) = wrapped("in(") {
        let values = inner
            .split('|')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Value::String(v.to_string()))
            .collect();
        (FilterOperator::In, Value::Array(values))
    } else if let Some(inner) = wrapped("lt(") {
        (FilterOperator::LessThan, Value::String(inner.trim().to_string()))
    } else if let Some(inner) = wrapped("gt(") {
        (FilterOperator::GreaterThan, Value::String(inner.trim().to_string()))
    } else {
        (FilterOperator::Equals, Value::String(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = PaginationConfig::default();
        let request = PaginationRequest::from_query_params(&HashMap::new(), &config);
        assert_eq!(request.limit, 10);
        assert!(request.page_token.is_empty());
    }

    #[test]
    fn test_limit_parsing_and_clamping() {
        let config = PaginationConfig::default();

        let request = PaginationRequest::from_query_params(&params(&[("limit", "25")]), &config);
        assert_eq!(request.limit, 25);

        let request = PaginationRequest::from_query_params(&params(&[("limit", "0")]), &config);
        assert_eq!(request.limit, 1);

        let request = PaginationRequest::from_query_params(&params(&[("limit", "5000")]), &config);
        assert_eq!(request.limit, config.max_page_size);

        let request = PaginationRequest::from_query_params(&params(&[("limit", "ten")]), &config);
        assert_eq!(request.limit, config.default_page_size);
    }

    #[test]
    fn test_sort_and_filter_parsing() {
        let config = PaginationConfig::default();
        let request = PaginationRequest::from_query_params(
            &params(&[
                ("sort", "score:desc, name:ASC"),
                ("filter", "topic:rust,score:in(200|300),likeCount:gt(5),age:lt(30)"),
            ]),
            &config,
        );

        assert_eq!(
            request.page_token.sort_fields,
            vec![
                SortField::new("score", SortDirection::Desc),
                SortField::new("name", SortDirection::Asc),
            ]
        );
        assert_eq!(
            request.page_token.filter_fields,
            vec![
                FilterField::new("topic", "rust", FilterOperator::Equals),
                FilterField::new("score", json!(["200", "300"]), FilterOperator::In),
                FilterField::new("likeCount", "5", FilterOperator::GreaterThan),
                FilterField::new("age", "30", FilterOperator::LessThan),
            ]
        );
    }

    #[test]
    fn test_malformed_sort_pieces_are_skipped() {
        let sort = parse_sort("score:sideways,createdAt,:asc,,name:asc");
        assert_eq!(
            sort,
            vec![
                SortField::new("createdAt", SortDirection::Desc),
                SortField::new("name", SortDirection::Asc),
            ]
        );

        let filters = parse_filters("novalue,:x,title:hello");
        assert_eq!(
            filters,
            vec![FilterField::new("title", "hello", FilterOperator::Equals)]
        );
    }

    #[test]
    fn test_duplicate_sort_fields_keep_first() {
        let sort = parse_sort("score:asc,name:desc,score:desc, score");
        assert_eq!(
            sort,
            vec![
                SortField::new("score", SortDirection::Asc),
                SortField::new("name", SortDirection::Desc),
            ]
        );

        let request = PaginationRequest::from_query_params(
            &params(&[("sort", "score:asc,score:desc"), ("limit", "2")]),
            &PaginationConfig::default(),
        );
        assert_eq!(
            request.page_token.sort_fields,
            vec![SortField::new("score", SortDirection::Asc)]
        );
    }

    #[test]
    fn test_page_token_takes_precedence() {
        let config = PaginationConfig::default();
        let token = PageToken::empty().with_sort("createdAt", SortDirection::Asc);
        let encoded = token.encode();
        let request = PaginationRequest::from_query_params(
            &params(&[
                ("page_token", encoded.as_str()),
                ("sort", "score:desc"),
                ("limit", "3"),
            ]),
            &config,
        );
        assert_eq!(request.page_token, token);
        assert_eq!(request.limit, 3);

        // 非法令牌回退为空令牌，同时忽略 sort 参数
        let request = PaginationRequest::from_query_params(
            &params(&[("page_token", "garbage!!"), ("sort", "score:desc")]),
            &config,
        );
        assert!(request.page_token.is_empty());
    }

    #[test]
    fn test_builders() {
        let request = PaginationRequest::with_limit(2)
            .with_filter("score", 200, FilterOperator::Equals)
            .with_sort("name", SortDirection::Asc);
        assert_eq!(request.limit, 2);
        assert_eq!(request.page_token.sort_fields.len(), 1);
        assert_eq!(request.page_token.filter_fields[0].value, json!(200));

        let next = request.next(PageToken::empty());
        assert_eq!(next.limit, 2);
        assert!(next.page_token.is_empty());
    }
}
