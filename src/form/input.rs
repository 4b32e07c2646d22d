//! 表单提交提取器

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::{Method, StatusCode, header},
};

use crate::common::parse_urlencoded;
use crate::error::FrameworkError;

/// 提交的表单键值对
///
/// GET/HEAD 读取查询字符串；其他方法要求 `application/x-www-form-urlencoded`，
/// 否则返回 415；超过 body 限制返回 413
#[derive(Debug, Clone, Default)]
pub struct FormInput(pub Vec<(String, String)>);

impl FormInput {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl IntoIterator for FormInput {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

pub(crate) fn is_form_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

impl<S: Send + Sync> FromRequest<S> for FormInput {
    type Rejection = FrameworkError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if matches!(*req.method(), Method::GET | Method::HEAD) {
            let query = req.uri().query().unwrap_or("");
            return Ok(Self(parse_urlencoded(query)));
        }

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !is_form_content_type(content_type.as_deref()) {
            return Err(FrameworkError::UnsupportedMediaType(
                content_type.unwrap_or_else(|| "missing content type".to_string()),
            ));
        }

        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                FrameworkError::PayloadTooLarge
            } else {
                FrameworkError::bad_request(rejection.body_text())
            }
        })?;
        let body = std::str::from_utf8(&bytes)
            .map_err(|_| FrameworkError::bad_request("Form body is not valid UTF-8"))?;
        Ok(Self(parse_urlencoded(body)))
    }
}
