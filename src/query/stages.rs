//! 聚合阶段构建
//!
//! 每个函数只负责一种阶段，没有内容时返回 `None`，不生成恒真的空阶段。
//! 字段名在进入这里之前已经校验过，这里只做逻辑名到存储路径的映射。

use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document, doc, oid::ObjectId};
use serde_json::Value;

use crate::error::{PaginationError, PaginationResult};
use crate::pagination::{FilterField, FilterOperator, PageToken, SortDirection, SortField};
use crate::schema::{EntitySchema, FieldKind};

/// 过滤阶段：`{$match: {$and: [...]}}`
pub fn filter_stage(
    filters: &[FilterField],
    schema: &EntitySchema,
) -> PaginationResult<Option<Document>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let clauses = filters
        .iter()
        .map(|filter| filter_clause(filter, schema))
        .collect::<PaginationResult<Vec<Document>>>()?;

    Ok(Some(doc! { "$match": { "$and": clauses } }))
}

fn filter_clause(filter: &FilterField, schema: &EntitySchema) -> PaginationResult<Document> {
    let kind = schema.kind_of(&filter.field);
    let operand = match filter.operator {
        FilterOperator::In => {
            let values = match &filter.value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| filter_value(&filter.field, item, kind))
                    .collect::<PaginationResult<Vec<Bson>>>()?,
                single => vec![filter_value(&filter.field, single, kind)?],
            };
            Bson::Array(values)
        }
        FilterOperator::Equals | FilterOperator::LessThan | FilterOperator::GreaterThan => {
            filter_value(&filter.field, &filter.value, kind)?
        }
    };

    let mut comparison = Document::new();
    comparison.insert(filter.operator.as_mongo(), operand);

    let mut clause = Document::new();
    clause.insert(schema.storage_path(&filter.field), comparison);
    Ok(clause)
}

/// 把过滤值转换为 BSON
///
/// 字符串值按字段声明的类型转换（查询参数里的值都是字符串）；
/// 动态字段没有声明类型，原样使用。
pub fn filter_value(field: &str, value: &Value, kind: Option<FieldKind>) -> PaginationResult<Bson> {
    let invalid = |expected: FieldKind| PaginationError::InvalidFilterValue {
        field: field.to_string(),
        value: value.to_string(),
        expected,
    };

    match (kind, value) {
        (Some(FieldKind::Number), Value::String(raw)) => {
            let raw = raw.trim();
            if let Ok(integer) = raw.parse::<i64>() {
                return Ok(Bson::Int64(integer));
            }
            raw.parse::<f64>()
                .ok()
                .filter(|number| number.is_finite())
                .map(Bson::Double)
                .ok_or_else(|| invalid(FieldKind::Number))
        }
        (Some(FieldKind::Date), Value::String(raw)) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt.with_timezone(&Utc))))
            .map_err(|_| invalid(FieldKind::Date)),
        // 数字按毫秒时间戳处理
        (Some(FieldKind::Date), Value::Number(millis)) => millis
            .as_i64()
            .map(|millis| Bson::DateTime(bson::DateTime::from_millis(millis)))
            .ok_or_else(|| invalid(FieldKind::Date)),
        (Some(FieldKind::Bool), Value::String(raw)) => {
            match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Bson::Boolean(true)),
                "false" => Ok(Bson::Boolean(false)),
                _ => Err(invalid(FieldKind::Bool)),
            }
        }
        (Some(FieldKind::ObjectId), Value::String(raw)) => ObjectId::parse_str(raw.trim())
            .map(Bson::ObjectId)
            .map_err(|_| invalid(FieldKind::ObjectId)),
        (_, value) => Ok(json_to_bson(value)),
    }
}

pub(crate) fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(integer) => Bson::Int64(integer),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(key, value)| (key.clone(), json_to_bson(value)))
                .collect(),
        ),
    }
}

/// 游标阶段
///
/// 多字段排序按字典序续读：`(f1 ⋗ v1) OR (f1 = v1 AND f2 ⋗ v2) OR ...`，
/// 升序取 `$gt`，降序取 `$lt`。遇到第一个没有游标值的排序字段即停止。
/// 不在排序字段中的游标键被忽略。
pub fn cursor_stage(token: &PageToken, schema: &EntitySchema) -> Option<Document> {
    if token.cursors.is_empty() {
        return None;
    }

    let mut tiers: Vec<Document> = Vec::new();
    let mut equalities = Document::new();

    for sort in &token.sort_fields {
        let Some(cursor) = token.cursor(&sort.field) else {
            break;
        };
        let path = schema.storage_path(&sort.field);
        let value = cursor.to_bson();

        let operator = match sort.direction {
            SortDirection::Asc => "$gt",
            SortDirection::Desc => "$lt",
        };
        let mut comparison = Document::new();
        comparison.insert(operator, value.clone());

        let mut tier = equalities.clone();
        tier.insert(path, comparison);
        tiers.push(tier);

        equalities.insert(path, value);
    }

    match tiers.len() {
        0 => None,
        1 => tiers.pop().map(|tier| doc! { "$match": tier }),
        _ => Some(doc! { "$match": { "$or": tiers } }),
    }
}

/// 排序阶段：按声明顺序 `{$sort: {path: 1 | -1}}`
pub fn sort_stage(sort_fields: &[SortField], schema: &EntitySchema) -> Option<Document> {
    if sort_fields.is_empty() {
        return None;
    }

    let mut spec = Document::new();
    for sort in sort_fields {
        spec.insert(schema.storage_path(&sort.field), sort.direction.as_mongo());
    }
    Some(doc! { "$sort": spec })
}

/// 多取一条，用于判断是否还有下一页
pub fn limit_stage(limit: usize) -> Document {
    let lookahead = i64::try_from(limit.saturating_add(1)).unwrap_or(i64::MAX);
    doc! { "$limit": lookahead }
}
