//! Profile 数据模型

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单个请求的完整采集结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub token: String,
    pub method: String,
    pub url: String,
    pub path: String,
    pub route: Option<String>,
    pub status_code: u16,
    pub ip: Option<String>,
    pub duration_ms: f64,
    /// RFC3339 UTC
    pub timestamp: String,
    pub panels: BTreeMap<String, serde_json::Value>,
}

impl Profile {
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            token: self.token.clone(),
            method: self.method.clone(),
            url: self.url.clone(),
            path: self.path.clone(),
            route: self.route.clone(),
            status_code: self.status_code,
            ip: self.ip.clone(),
            duration_ms: self.duration_ms,
            timestamp: self.timestamp.clone(),
            panels: self.panels.keys().cloned().collect(),
        }
    }
}

/// 列表中展示的摘要（不含面板数据）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub token: String,
    pub method: String,
    pub url: String,
    pub path: String,
    pub route: Option<String>,
    pub status_code: u16,
    pub ip: Option<String>,
    pub duration_ms: f64,
    pub timestamp: String,
    pub panels: Vec<String>,
}
