//! 进程内聚合执行器
//!
//! 支持的阶段：`$match`、`$sort`、`$skip`、`$limit`。
//! 支持的匹配操作符：`$and`、`$or`、`$nor`、`$eq`、`$ne`、`$gt`、`$gte`、`$lt`、`$lte`、
//! `$in`、`$nin`、`$exists`。比较语义与 MongoDB 一致：不同类型之间的范围比较不匹配，
//! 排序时按 BSON 类型顺序排列。

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{AggregateStore, get_raw_field_value};

#[derive(Clone, Default)]
pub struct InMemoryAggregateStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, collection: &str, document: Document) {
        let mut map = self.collections.write().await;
        map.entry(collection.to_string()).or_default().push(document);
    }

    pub async fn insert_many<I>(&self, collection: &str, documents: I)
    where
        I: IntoIterator<Item = Document>,
    {
        let mut map = self.collections.write().await;
        map.entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    pub async fn clear(&self, collection: &str) {
        let mut map = self.collections.write().await;
        map.remove(collection);
    }

    pub async fn count(&self, collection: &str) -> usize {
        let map = self.collections.read().await;
        map.get(collection).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn execute_query(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StorageError> {
        // 与 MongoDB 一致：集合不存在时返回空结果
        let mut rows = {
            let map = self.collections.read().await;
            map.get(collection).cloned().unwrap_or_default()
        };

        for stage in &pipeline {
            rows = apply_stage(rows, stage)?;
        }

        debug!(collection = %collection, rows = rows.len(), "In-memory aggregation finished");
        Ok(rows)
    }
}

fn apply_stage(rows: Vec<Document>, stage: &Document) -> Result<Vec<Document>, StorageError> {
    let mut entries = stage.iter();
    let (name, spec) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(StorageError::Unsupported(format!(
                "stage must have exactly one operator: {stage}"
            )));
        }
    };

    match name.as_str() {
        "$match" => {
            let filter = as_document(name, spec)?;
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if matches_filter(&row, filter)? {
                    kept.push(row);
                }
            }
            Ok(kept)
        }
        "$sort" => {
            let keys = sort_keys(as_document(name, spec)?)?;
            let mut rows = rows;
            rows.sort_by(|a, b| {
                keys.iter()
                    .map(|(path, direction)| {
                        let ordering = sort_order(
                            get_raw_field_value(a, path),
                            get_raw_field_value(b, path),
                        );
                        if *direction < 0 { ordering.reverse() } else { ordering }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
            Ok(rows)
        }
        "$limit" => {
            let mut rows = rows;
            rows.truncate(as_count(name, spec)?);
            Ok(rows)
        }
        "$skip" => Ok(rows.into_iter().skip(as_count(name, spec)?).collect()),
        other => Err(StorageError::Unsupported(other.to_string())),
    }
}

fn as_document<'a>(stage: &str, spec: &'a Bson) -> Result<&'a Document, StorageError> {
    match spec {
        Bson::Document(document) => Ok(document),
        other => Err(StorageError::Unsupported(format!(
            "{stage} expects a document, got {other}"
        ))),
    }
}

fn as_count(stage: &str, spec: &Bson) -> Result<usize, StorageError> {
    let count = match spec {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(n) if n.fract() == 0.0 => *n as i64,
        other => {
            return Err(StorageError::Unsupported(format!(
                "{stage} expects an integer, got {other}"
            )));
        }
    };
    usize::try_from(count)
        .map_err(|_| StorageError::Unsupported(format!("{stage} must not be negative")))
}

fn sort_keys(spec: &Document) -> Result<Vec<(String, i64)>, StorageError> {
    spec.iter()
        .map(|(path, direction)| {
            let direction = match direction {
                Bson::Int32(n) => i64::from(*n),
                Bson::Int64(n) => *n,
                Bson::Double(n) => *n as i64,
                other => {
                    return Err(StorageError::Unsupported(format!(
                        "$sort direction for {path}: {other}"
                    )));
                }
            };
            Ok((path.clone(), direction))
        })
        .collect()
}

fn matches_filter(document: &Document, filter: &Document) -> Result<bool, StorageError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches_filter(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches_filter(document, clause)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" { any } else { !any }
            }
            operator if operator.starts_with('$') => {
                return Err(StorageError::Unsupported(operator.to_string()));
            }
            path => field_matches(get_raw_field_value(document, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, value: &'a Bson) -> Result<Vec<&'a Document>, StorageError> {
    let Bson::Array(items) = value else {
        return Err(StorageError::Unsupported(format!(
            "{operator} expects an array"
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            other => Err(StorageError::Unsupported(format!(
                "{operator} clause must be a document, got {other}"
            ))),
        })
        .collect()
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool, StorageError> {
    let operators = match condition {
        Bson::Document(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => ops,
        literal => return Ok(equals(value, literal)),
    };

    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
            "$in" | "$nin" => {
                let Bson::Array(candidates) = operand else {
                    return Err(StorageError::Unsupported(format!(
                        "{operator} expects an array"
                    )));
                };
                let found = candidates.iter().any(|candidate| equals(value, candidate));
                if operator == "$in" { found } else { !found }
            }
            "$exists" => {
                let wanted = !matches!(operand, Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0));
                value.is_some() == wanted
            }
            other => return Err(StorageError::Unsupported(other.to_string())),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// 字段为数组时，任一元素相等即匹配；缺失字段等于 null
fn equals(value: Option<&Bson>, operand: &Bson) -> bool {
    match value {
        None => matches!(operand, Bson::Null),
        Some(Bson::Array(items)) if !matches!(operand, Bson::Array(_)) => items
            .iter()
            .any(|item| compare(item, operand) == Some(Ordering::Equal)),
        Some(value) => compare(value, operand) == Some(Ordering::Equal),
    }
}

fn ordered(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        None => false,
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, operand).is_some_and(&accept)),
        Some(value) => compare(value, operand).is_some_and(accept),
    }
}

/// 同类值比较；不同类型之间不可比较
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.timestamp_millis().cmp(&y.timestamp_millis())),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        (Bson::Document(x), Bson::Document(y)) => (x == y).then_some(Ordering::Equal),
        (Bson::Array(x), Bson::Array(y)) => (x == y).then_some(Ordering::Equal),
        _ => match (integer(a), integer(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => number(a)?.partial_cmp(&number(b)?),
        },
    }
}

fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// BSON 排序时的类型顺序
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 1,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 2,
        Some(Bson::String(_) | Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        Some(Bson::RegularExpression(_)) => 11,
        Some(_) => 12,
    }
}

fn sort_order(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
