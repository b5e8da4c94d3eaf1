//! 分页结果

use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tracing::warn;

use crate::pagination::token::PageToken;

/// HTTP 头：下一页令牌
pub const HEADER_PAGE_TOKEN: &str = "X-Page-Token";
/// HTTP 头：本页条数
pub const HEADER_PAGE_SIZE: &str = "X-Page-Size";

/// gRPC metadata 键必须为小写
pub const METADATA_PAGE_TOKEN: &str = "x-page-token";
pub const METADATA_PAGE_SIZE: &str = "x-page-size";

/// 一页结果；`next_page_token` 为空表示已经是最后一页
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationSlice<T> {
    items: Vec<T>,
    next_page_token: Option<PageToken>,
}

impl<T> PaginationSlice<T> {
    pub fn new(items: Vec<T>, next_page_token: Option<PageToken>) -> Self {
        Self {
            items,
            next_page_token,
        }
    }

    pub fn last_page(items: Vec<T>) -> Self {
        Self::new(items, None)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn into_parts(self) -> (Vec<T>, Option<PageToken>) {
        (self.items, self.next_page_token)
    }

    pub fn next_page_token(&self) -> Option<&PageToken> {
        self.next_page_token.as_ref()
    }

    pub fn has_next(&self) -> bool {
        self.next_page_token.is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 逐条转换（实体 -> 接口 DTO），令牌保持不变
    pub fn map<U, F>(self, f: F) -> PaginationSlice<U>
    where
        F: FnMut(T) -> U,
    {
        PaginationSlice {
            items: self.items.into_iter().map(f).collect(),
            next_page_token: self.next_page_token,
        }
    }

    /// 编码后的下一页令牌
    pub fn encoded_next_page_token(&self) -> Option<String> {
        self.next_page_token.as_ref().map(PageToken::encode)
    }

    /// 生成 HTTP 响应头；没有下一页时不输出令牌头
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(2);
        if let Some(token) = self.encoded_next_page_token() {
            headers.push((HEADER_PAGE_TOKEN, token));
        }
        headers.push((HEADER_PAGE_SIZE, self.items.len().to_string()));
        headers
    }

    /// 生成 gRPC 响应 metadata
    pub fn to_metadata(&self) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        if let Some(token) = self.encoded_next_page_token() {
            match token.parse::<AsciiMetadataValue>() {
                Ok(value) => {
                    metadata.insert(METADATA_PAGE_TOKEN, value);
                }
                Err(err) => warn!(error = %err, "Page token is not valid metadata"),
            }
        }
        if let Ok(value) = self.items.len().to_string().parse::<AsciiMetadataValue>() {
            metadata.insert(METADATA_PAGE_SIZE, value);
        }
        metadata
    }
}
