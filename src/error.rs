//! 分页查询错误类型定义
//!
//! - `PaginationError`：对外暴露的统一错误
//! - `StorageError`：存储引擎（MongoDB 等）错误的包装，不在本模块内重试
//!
//! 页面令牌解码错误不会出现在这里，解码失败总是降级为空令牌。

use std::fmt;

use thiserror::Error;

use crate::schema::FieldKind;

/// 字段的使用场景（用于错误提示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldUsage {
    /// 排序字段
    Sorting,
    /// 过滤字段
    Filtering,
    /// 游标字段
    Cursor,
}

impl fmt::Display for FieldUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldUsage::Sorting => "sorting",
            FieldUsage::Filtering => "filtering",
            FieldUsage::Cursor => "cursor pagination",
        };
        f.write_str(label)
    }
}

/// 存储层错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// MongoDB 驱动错误（连接、超时、命令失败等）
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// 存储实现不支持的聚合阶段或操作符
    #[error("unsupported pipeline stage: {0}")]
    Unsupported(String),

    /// 其他存储错误
    #[error("storage error: {0}")]
    Other(String),
}

/// 分页查询错误
#[derive(Debug, Error)]
pub enum PaginationError {
    /// 请求引用了实体上不存在（或被排除）的字段
    #[error("Invalid field '{field}' for {usage} in entity {entity}")]
    InvalidField {
        field: String,
        entity: String,
        usage: FieldUsage,
    },

    /// 过滤值无法转换为字段声明的类型
    #[error("Invalid value {value} for filter field '{field}', expected {expected}")]
    InvalidFilterValue {
        field: String,
        value: String,
        expected: FieldKind,
    },

    /// 结果行缺少排序字段，无法生成下一页游标
    #[error("Cursor field not found in result: {field}")]
    MissingCursorField { field: String },

    /// 排序字段的值类型不能作为游标
    #[error("Unsupported cursor value type {kind} for field {field}")]
    UnsupportedCursorValue { field: String, kind: String },

    /// 结果行无法映射为目标实体
    #[error("failed to decode result document: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    /// 存储层错误
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 分页查询结果类型
pub type PaginationResult<T> = Result<T, PaginationError>;

impl PaginationError {
    pub fn invalid_field(
        field: impl Into<String>,
        entity: impl Into<String>,
        usage: FieldUsage,
    ) -> Self {
        PaginationError::InvalidField {
            field: field.into(),
            entity: entity.into(),
            usage,
        }
    }

    /// 是否为调用方错误（对应 4xx），其余均为服务端错误（对应 5xx）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PaginationError::InvalidField { .. } | PaginationError::InvalidFilterValue { .. }
        )
    }
}

impl From<PaginationError> for tonic::Status {
    fn from(err: PaginationError) -> Self {
        if err.is_client_error() {
            tonic::Status::invalid_argument(err.to_string())
        } else {
            tonic::Status::internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_field_message() {
        let err = PaginationError::invalid_field("bogusField", "Post", FieldUsage::Sorting);
        assert_eq!(
            err.to_string(),
            "Invalid field 'bogusField' for sorting in entity Post"
        );
        assert!(err.is_client_error());

        let err = PaginationError::invalid_field("ghost", "Post", FieldUsage::Cursor);
        assert_eq!(
            err.to_string(),
            "Invalid field 'ghost' for cursor pagination in entity Post"
        );
    }

    #[test]
    fn test_status_mapping() {
        let status: tonic::Status =
            PaginationError::invalid_field("x", "Post", FieldUsage::Filtering).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status =
            PaginationError::Storage(StorageError::Other("connection reset".to_string())).into();
        assert_eq!(status.code(), tonic::Code::Internal);

        let status: tonic::Status = PaginationError::MissingCursorField {
            field: "score".to_string(),
        }
        .into();
        assert_eq!(status.code(), tonic::Code::Internal);
    }
}
