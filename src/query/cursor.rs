//! 下一页令牌生成

use std::collections::HashMap;

use mongodb::bson::Document;

use crate::error::{PaginationError, PaginationResult};
use crate::pagination::{CursorValue, PageToken};
use crate::schema::EntitySchema;
use crate::storage::get_raw_field_value;

/// 从本页最后一条结果读取所有排序字段的值，生成下一页令牌
///
/// 游标以逻辑字段名为键，值按存储路径读取；排序与过滤条件沿用当前令牌。
pub fn next_page_token(
    last_row: &Document,
    token: &PageToken,
    schema: &EntitySchema,
) -> PaginationResult<PageToken> {
    let mut cursors = HashMap::with_capacity(token.sort_fields.len());

    for sort in &token.sort_fields {
        let raw = get_raw_field_value(last_row, schema.storage_path(&sort.field)).ok_or_else(
            || PaginationError::MissingCursorField {
                field: sort.field.clone(),
            },
        )?;

        let value = CursorValue::from_bson(raw).ok_or_else(|| {
            PaginationError::UnsupportedCursorValue {
                field: sort.field.clone(),
                kind: format!("{:?}", raw.element_type()),
            }
        })?;

        cursors.insert(sort.field.clone(), value);
    }

    Ok(token.with_cursors(cursors))
}
