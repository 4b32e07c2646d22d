//! Profiler API 请求/响应类型

use serde::{Deserialize, Serialize};

use super::model::{Profile, ProfileSummary};

/// 查询过滤器
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub method: Option<String>,
    /// `success`（< 400）或 `error`（>= 400）
    pub status: Option<String>,
    /// 路径包含的子串
    pub path: Option<String>,
}

impl ProfileQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(50).clamp(1, 200)
    }

    /// 内存过滤（与 SQLite 查询条件一致）
    pub fn matches(&self, profile: &Profile) -> bool {
        if let Some(method) = &self.method {
            if !profile.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        match self.status.as_deref() {
            Some("success") if profile.status_code >= 400 => return false,
            Some("error") if profile.status_code < 400 => return false,
            _ => {}
        }
        if let Some(path) = &self.path {
            if !profile.path.contains(path.as_str()) {
                return false;
            }
        }
        true
    }
}

/// 分页响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileListResponse {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub records: Vec<ProfileSummary>,
}
