//! 实体字段描述与字段校验
//!
//! 每个可分页实体在注册时构建一次 `EntitySchema`（通常放在 `once_cell::sync::Lazy` 中），
//! 列出所有可用于排序、过滤、游标的字段及其类型。校验时只做名称查表，不做运行时反射。

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::{FieldUsage, PaginationError, PaginationResult};
use crate::pagination::PageToken;

/// 字段的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Number,
    Date,
    Bool,
    ObjectId,
    Document,
    Array,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Date => "date",
            FieldKind::Bool => "bool",
            FieldKind::ObjectId => "object id",
            FieldKind::Document => "document",
            FieldKind::Array => "array",
        };
        f.write_str(label)
    }
}

impl FieldKind {
    /// 该类型的值能否写入页面令牌的游标
    pub fn is_cursorable(self) -> bool {
        matches!(
            self,
            FieldKind::String | FieldKind::Number | FieldKind::Date | FieldKind::ObjectId
        )
    }
}

/// 单个字段描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// 实际存储路径，为空时与 `name` 相同（如 `createdAt` 存为 `created_at`）
    pub storage_path: Option<String>,
}

impl FieldDescriptor {
    pub fn storage_path(&self) -> &str {
        self.storage_path.as_deref().unwrap_or(&self.name)
    }
}

/// 实体字段表
#[derive(Debug, Clone)]
pub struct EntitySchema {
    entity_name: String,
    collection: String,
    fields: HashMap<String, FieldDescriptor>,
}

impl EntitySchema {
    pub fn builder(
        entity_name: impl Into<String>,
        collection: impl Into<String>,
    ) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            schema: EntitySchema {
                entity_name: entity_name.into(),
                collection: collection.into(),
                fields: HashMap::new(),
            },
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).map(|field| field.kind)
    }

    /// 逻辑字段名对应的存储路径；未声明的字段（如动态字段）原样返回
    pub fn storage_path<'a>(&'a self, name: &'a str) -> &'a str {
        self.fields
            .get(name)
            .map(FieldDescriptor::storage_path)
            .unwrap_or(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// `EntitySchema` 构建器
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        self.schema.fields.insert(
            name.clone(),
            FieldDescriptor {
                name,
                kind,
                storage_path: None,
            },
        );
        self
    }

    /// 声明一个存储路径与逻辑名不同的字段
    pub fn aliased(
        mut self,
        name: impl Into<String>,
        storage_path: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        let name = name.into();
        self.schema.fields.insert(
            name.clone(),
            FieldDescriptor {
                name,
                kind,
                storage_path: Some(storage_path.into()),
            },
        );
        self
    }

    pub fn build(self) -> EntitySchema {
        self.schema
    }
}

/// 可分页实体
///
/// 查询结果以原始文档返回，再通过 serde 映射为实体。
pub trait PageableEntity: DeserializeOwned + Send + Sync {
    fn schema() -> &'static EntitySchema;
}

/// 字段校验器
///
/// 每次调用都完整校验，不缓存上一次的结果。
pub struct FieldValidator<'a> {
    schema: &'a EntitySchema,
    dynamic_fields: &'a HashSet<String>,
    excluded_fields: &'a HashSet<String>,
}

impl<'a> FieldValidator<'a> {
    pub fn new(
        schema: &'a EntitySchema,
        dynamic_fields: &'a HashSet<String>,
        excluded_fields: &'a HashSet<String>,
    ) -> Self {
        Self {
            schema,
            dynamic_fields,
            excluded_fields,
        }
    }

    pub fn is_allowed(&self, field: &str) -> bool {
        if self.excluded_fields.contains(field) {
            return false;
        }
        self.schema.contains(field) || self.dynamic_fields.contains(field)
    }

    /// 校验一组字段，返回第一个非法字段的错误
    pub fn validate<'f, I>(&self, fields: I, usage: FieldUsage) -> PaginationResult<()>
    where
        I: IntoIterator<Item = &'f str>,
    {
        match fields.into_iter().find(|field| !self.is_allowed(field)) {
            Some(field) => Err(PaginationError::invalid_field(
                field,
                self.schema.entity_name(),
                usage,
            )),
            None => Ok(()),
        }
    }

    /// 依次校验令牌中的排序字段、过滤字段和游标字段
    ///
    /// 排序字段不能重复，且必须能生成游标：布尔、文档、数组类型的字段不能用于排序。
    /// 动态字段没有声明类型，不做类型检查。
    pub fn validate_token(&self, token: &PageToken) -> PaginationResult<()> {
        self.validate(
            token.sort_fields.iter().map(|sort| sort.field.as_str()),
            FieldUsage::Sorting,
        )?;
        let mut seen = HashSet::with_capacity(token.sort_fields.len());
        if let Some(sort) = token.sort_fields.iter().find(|sort| {
            !seen.insert(sort.field.as_str())
                || self
                    .schema
                    .kind_of(&sort.field)
                    .is_some_and(|kind| !kind.is_cursorable())
        }) {
            return Err(PaginationError::invalid_field(
                &sort.field,
                self.schema.entity_name(),
                FieldUsage::Sorting,
            ));
        }
        self.validate(
            token.filter_fields.iter().map(|filter| filter.field.as_str()),
            FieldUsage::Filtering,
        )?;

        // HashMap 迭代顺序不固定，排序后保证每次报告同一个字段
        let mut cursor_fields: Vec<&str> = token.cursors.keys().map(String::as_str).collect();
        cursor_fields.sort_unstable();
        self.validate(cursor_fields, FieldUsage::Cursor)
    }
}
