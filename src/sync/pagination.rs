//! 分页模型（本地缓存与远端共用）

use crate::sync::error::{Result, SyncError};
use serde::{Deserialize, Serialize};

/// 分页请求，`page` 从 0 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub page: i64,
}

impl PageRequest {
    /// 创建分页请求；`page < 0` 或 `limit <= 0` 直接拒绝
    pub fn new(limit: i64, page: i64) -> Result<Self> {
        if limit <= 0 {
            return Err(SyncError::validation(format!(
                "limit 必须为正数，当前: {}",
                limit
            )));
        }
        if page < 0 {
            return Err(SyncError::validation(format!(
                "page 不能为负数，当前: {}",
                page
            )));
        }
        if page.checked_mul(limit).is_none() {
            return Err(SyncError::validation(format!(
                "page * limit 超出范围: {} * {}",
                page, limit
            )));
        }
        Ok(Self { limit, page })
    }

    /// 第一页
    pub fn first(limit: i64) -> Result<Self> {
        Self::new(limit, 0)
    }

    /// 下一页
    pub fn next(self) -> Self {
        Self {
            limit: self.limit,
            page: self.page.saturating_add(1),
        }
    }

    pub fn offset(&self) -> i64 {
        self.page.saturating_mul(self.limit)
    }
}

/// 分页元信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub total_count: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub has_next: bool,
}

impl PaginationInfo {
    /// 由总数和请求计算分页信息：`hasNext = currentPage < totalPages - 1`
    pub fn from_total(total_count: i64, request: PageRequest) -> Self {
        let total_pages = if total_count <= 0 {
            0
        } else {
            (total_count - 1) / request.limit + 1
        };
        Self {
            total_count,
            total_pages,
            current_page: request.page,
            has_next: request.page < total_pages - 1,
        }
    }
}

/// 一页数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PaginationInfo,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total_count: i64, request: PageRequest) -> Self {
        Self {
            data,
            pagination: PaginationInfo::from_total(total_count, request),
        }
    }

    pub fn has_next(&self) -> bool {
        self.pagination.has_next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_requests() {
        assert!(matches!(
            PageRequest::new(0, 0),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            PageRequest::new(10, -1),
            Err(SyncError::Validation(_))
        ));
        assert_eq!(PageRequest::new(10, 3).unwrap().offset(), 30);
        assert!(matches!(
            PageRequest::new(i64::MAX, 2),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn huge_limits_do_not_overflow() {
        let request = PageRequest::first(i64::MAX).unwrap();
        assert_eq!(request.offset(), 0);
        let info = PaginationInfo::from_total(2, request);
        assert_eq!(info.total_pages, 1);
        assert!(!info.has_next);

        let info = PaginationInfo::from_total(i64::MAX, PageRequest::first(2).unwrap());
        assert_eq!(info.total_pages, i64::MAX / 2 + 1);
        assert!(info.has_next);
    }

    #[test]
    fn has_next_follows_total_pages() {
        let info = |page| PaginationInfo::from_total(7, PageRequest::new(2, page).unwrap());
        assert_eq!(info(0).total_pages, 4);
        assert!(info(0).has_next);
        assert!(info(2).has_next);
        assert!(!info(3).has_next);

        let empty = PaginationInfo::from_total(0, PageRequest::first(200).unwrap());
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
    }

    #[test]
    fn pagination_uses_camel_case_on_the_wire() {
        let info = PaginationInfo::from_total(3, PageRequest::first(2).unwrap());
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "totalCount": 3,
                "totalPages": 2,
                "currentPage": 0,
                "hasNext": true
            })
        );
    }
}
