//! 游标分页的值对象：页面令牌、分页请求与分页结果

pub mod request;
pub mod slice;
pub mod token;

pub use request::{
    DEFAULT_PAGE_SIZE, FILTER_PARAM, PAGE_SIZE_PARAM, PAGE_TOKEN_PARAM, PaginationRequest,
    SORT_PARAM, parse_filters, parse_sort,
};
pub use slice::{
    HEADER_PAGE_SIZE, HEADER_PAGE_TOKEN, METADATA_PAGE_SIZE, METADATA_PAGE_TOKEN, PaginationSlice,
};
pub use token::{
    CursorValue, CursorValueType, FilterField, FilterOperator, PageToken, SortDirection,
    SEARCH_AFTER_CURSOR, SortField, TOKEN_VERSION,
};
