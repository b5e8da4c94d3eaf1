//! 页面令牌
//!
//! 令牌携带游标值、排序字段和过滤条件，序列化为 JSON 后做 base64 编码，对客户端不透明。
//! 解码失败（非法 base64、结构错误、未知枚举值）一律降级为空令牌，
//! 即"从第一页重新开始"，列表接口不会因为令牌而报错。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, oid::ObjectId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// 当前写出的令牌格式版本
pub const TOKEN_VERSION: u8 = 1;

/// 全文检索翻页使用的游标键，不对应任何排序字段
pub const SEARCH_AFTER_CURSOR: &str = "searchAfter";

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// MongoDB `$sort` 中的方向值
    pub fn as_mongo(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(SortDirection::Asc),
            "DESC" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction: {other}")),
        }
    }
}

/// 过滤操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Equals,
    In,
    LessThan,
    GreaterThan,
}

impl FilterOperator {
    pub fn as_mongo(self) -> &'static str {
        match self {
            FilterOperator::Equals => "$eq",
            FilterOperator::In => "$in",
            FilterOperator::LessThan => "$lt",
            FilterOperator::GreaterThan => "$gt",
        }
    }
}

/// 游标值的语义类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorValueType {
    String,
    Number,
    Date,
    ObjectId,
}

/// 带类型标签的游标值
///
/// 序列化为 `{"type": "DATE", "value": "..."}`，类型标签保证跨文本边界后仍按原类型比较。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CursorValue {
    String(String),
    Number(serde_json::Number),
    Date(DateTime<Utc>),
    ObjectId(#[serde(with = "oid_hex")] ObjectId),
}

impl CursorValue {
    pub fn value_type(&self) -> CursorValueType {
        match self {
            CursorValue::String(_) => CursorValueType::String,
            CursorValue::Number(_) => CursorValueType::Number,
            CursorValue::Date(_) => CursorValueType::Date,
            CursorValue::ObjectId(_) => CursorValueType::ObjectId,
        }
    }

    /// 从结果文档中的原始值构造游标；不支持的类型返回 `None`
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::String(s) => Some(CursorValue::String(s.clone())),
            Bson::Int32(n) => Some(CursorValue::Number((*n).into())),
            Bson::Int64(n) => Some(CursorValue::Number((*n).into())),
            Bson::Double(n) => serde_json::Number::from_f64(*n).map(CursorValue::Number),
            Bson::DateTime(dt) => Some(CursorValue::Date(dt.to_chrono())),
            Bson::ObjectId(oid) => Some(CursorValue::ObjectId(*oid)),
            _ => None,
        }
    }

    /// 转换为查询比较用的 BSON 值
    pub fn to_bson(&self) -> Bson {
        match self {
            CursorValue::String(s) => Bson::String(s.clone()),
            CursorValue::Number(n) => match n.as_i64() {
                Some(i) => Bson::Int64(i),
                None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            CursorValue::Date(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
            CursorValue::ObjectId(oid) => Bson::ObjectId(*oid),
        }
    }
}

mod oid_hex {
    use mongodb::bson::oid::ObjectId;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(oid: &ObjectId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&oid.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ObjectId, D::Error> {
        let hex = String::deserialize(deserializer)?;
        ObjectId::parse_str(&hex).map_err(D::Error::custom)
    }
}

/// 排序字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortField {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// 过滤条件，所有条件之间为 AND 关系
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterField {
    pub field: String,
    pub value: Value,
    pub operator: FilterOperator,
}

impl FilterField {
    pub fn new(field: impl Into<String>, value: impl Into<Value>, operator: FilterOperator) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }
}

/// 令牌解码错误，仅在内部使用
#[derive(Debug, Error)]
pub(crate) enum TokenDecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid token payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("cursor field '{0}' is not an active sort field")]
    OrphanCursor(String),

    #[error("sort field '{0}' appears more than once")]
    DuplicateSortField(String),
}

/// 页面令牌
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageToken {
    #[serde(default)]
    pub cursors: HashMap<String, CursorValue>,
    #[serde(default)]
    pub sort_fields: Vec<SortField>,
    #[serde(default)]
    pub filter_fields: Vec<FilterField>,
}

/// 写出时附带版本号；读取时按普通未知字段忽略
#[derive(Serialize)]
struct TokenEnvelope<'a> {
    v: u8,
    #[serde(flatten)]
    token: &'a PageToken,
}

impl PageToken {
    pub fn new(
        cursors: HashMap<String, CursorValue>,
        sort_fields: Vec<SortField>,
        filter_fields: Vec<FilterField>,
    ) -> Self {
        Self {
            cursors,
            sort_fields,
            filter_fields,
        }
    }

    /// 首页令牌：没有游标、排序和过滤
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty() && self.sort_fields.is_empty() && self.filter_fields.is_empty()
    }

    /// 没有游标即为第一页
    pub fn is_first_page(&self) -> bool {
        self.cursors.is_empty()
    }

    /// 编码为 base64 字符串
    pub fn encode(&self) -> String {
        let envelope = TokenEnvelope {
            v: TOKEN_VERSION,
            token: self,
        };
        // 结构中只有字符串键和可序列化的值，序列化不会失败
        let json = serde_json::to_vec(&envelope).unwrap_or_default();
        STANDARD.encode(json)
    }

    /// 解码令牌，任何错误都降级为空令牌
    pub fn decode(raw: &str) -> Self {
        match Self::try_decode(raw) {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "Failed to decode page token, restarting from first page");
                Self::empty()
            }
        }
    }

    pub(crate) fn try_decode(raw: &str) -> Result<Self, TokenDecodeError> {
        let bytes = STANDARD.decode(raw.trim())?;
        let token: PageToken = serde_json::from_slice(&bytes)?;

        if let Some(duplicate) = duplicate_sort_field(&token.sort_fields) {
            return Err(TokenDecodeError::DuplicateSortField(duplicate));
        }

        if let Some(orphan) = token
            .cursors
            .keys()
            .filter(|field| field.as_str() != SEARCH_AFTER_CURSOR)
            .find(|field| !token.sort_fields.iter().any(|sort| &sort.field == *field))
        {
            return Err(TokenDecodeError::OrphanCursor(orphan.clone()));
        }

        Ok(token)
    }

    /// 只替换游标，排序和过滤条件保持不变
    pub fn with_cursors(&self, cursors: HashMap<String, CursorValue>) -> Self {
        Self {
            cursors,
            sort_fields: self.sort_fields.clone(),
            filter_fields: self.filter_fields.clone(),
        }
    }

    /// 追加排序字段；字段已存在时保持原方向
    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();
        if self.sort_fields.iter().any(|sort| sort.field == field) {
            warn!(field = %field, "Duplicate sort field, keeping first occurrence");
            return self;
        }
        self.sort_fields.push(SortField::new(field, direction));
        self
    }

    pub fn with_filter(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
        operator: FilterOperator,
    ) -> Self {
        self.filter_fields
            .push(FilterField::new(field, value, operator));
        self
    }

    pub fn cursor(&self, field: &str) -> Option<&CursorValue> {
        self.cursors.get(field)
    }
}

fn duplicate_sort_field(sort_fields: &[SortField]) -> Option<String> {
    let mut seen = HashSet::with_capacity(sort_fields.len());
    sort_fields
        .iter()
        .find(|sort| !seen.insert(sort.field.as_str()))
        .map(|sort| sort.field.clone())
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
