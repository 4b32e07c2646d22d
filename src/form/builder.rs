//! 表单构建、绑定与校验

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::field::{Field, FieldKind};
use crate::common::auth::constant_time_eq;
use crate::error::FrameworkError;

/// CSRF 隐藏字段名
pub const CSRF_FIELD: &str = "csrf_token";

/// 表单级错误在错误表中的键
pub const FORM_ERROR_KEY: &str = "_form";

/// 表单错误
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("表单 {form} 不存在字段 {field}")]
    UnknownField { form: String, field: String },
    #[error("表单尚未提交")]
    NotSubmitted,
    #[error("表单校验失败")]
    Invalid(BTreeMap<String, Vec<String>>),
    #[error("表单数据转换失败: {0}")]
    Deserialize(#[from] serde_json::Error),
}

impl From<FormError> for FrameworkError {
    fn from(e: FormError) -> Self {
        match e {
            FormError::Invalid(fields) => FrameworkError::Validation(fields),
            FormError::NotSubmitted => FrameworkError::BadRequest(e.to_string()),
            FormError::Deserialize(inner) => FrameworkError::Validation(BTreeMap::from([(
                FORM_ERROR_KEY.to_string(),
                vec![inner.to_string()],
            )])),
            other => FrameworkError::Internal(other.into()),
        }
    }
}

/// 可复用的表单定义
pub trait FormType {
    /// 表单名（HTML `name` 与元素 id 前缀）
    fn name(&self) -> &str;

    fn build_form(&self, builder: FormBuilder) -> FormBuilder;

    fn create(&self) -> Form {
        self.build_form(FormBuilder::new(self.name())).build()
    }

    /// 创建带 CSRF token 的表单
    fn create_with_csrf(&self, token: impl Into<String>) -> Form
    where
        Self: Sized,
    {
        self.build_form(FormBuilder::new(self.name()).csrf_token(token))
            .build()
    }
}

/// 表单构建器
#[derive(Debug, Clone)]
pub struct FormBuilder {
    form: Form,
}

impl FormBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            form: Form {
                name: name.into(),
                action: String::new(),
                method: "post".to_string(),
                submit_label: "Submit".to_string(),
                fields: Vec::new(),
                values: BTreeMap::new(),
                errors: BTreeMap::new(),
                submitted: false,
                validated: false,
                csrf_enabled: true,
                csrf_token: None,
                submitted_csrf: None,
            },
        }
    }

    /// 添加字段（同名字段被替换）
    pub fn add(mut self, field: Field) -> Self {
        match self.form.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.form.fields.push(field),
        }
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.form.action = action.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.form.method = method.into().to_lowercase();
        self
    }

    pub fn submit_label(mut self, label: impl Into<String>) -> Self {
        self.form.submit_label = label.into();
        self
    }

    /// 期望的 CSRF token（通常来自会话）
    pub fn csrf_token(mut self, token: impl Into<String>) -> Self {
        self.form.csrf_token = Some(token.into());
        self
    }

    pub fn disable_csrf(mut self) -> Self {
        self.form.csrf_enabled = false;
        self
    }

    pub fn build(self) -> Form {
        self.form
    }
}

/// 表单实例
#[derive(Debug, Clone)]
pub struct Form {
    pub(super) name: String,
    pub(super) action: String,
    pub(super) method: String,
    pub(super) submit_label: String,
    pub(super) fields: Vec<Field>,
    pub(super) values: BTreeMap<String, Vec<String>>,
    pub(super) errors: BTreeMap<String, Vec<String>>,
    submitted: bool,
    validated: bool,
    pub(super) csrf_enabled: bool,
    pub(super) csrf_token: Option<String>,
    submitted_csrf: Option<String>,
}

impl Form {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 设置期望的 CSRF token
    pub fn set_csrf_token(&mut self, token: impl Into<String>) {
        self.csrf_token = Some(token.into());
    }

    /// 绑定提交的键值对（未知键忽略，同名键累积为多值）
    pub fn handle_request<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.values.clear();
        self.errors.clear();
        self.submitted_csrf = None;
        self.validated = false;

        for (key, value) in pairs {
            let key = key.as_ref();
            // `tags[]` 与 `tags` 等价
            let key = key.strip_suffix("[]").unwrap_or(key);
            if key == CSRF_FIELD {
                self.submitted_csrf = Some(value.into());
            } else if self.field(key).is_some() {
                self.values.entry(key.to_string()).or_default().push(value.into());
            }
        }
        self.submitted = true;
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// 运行全部约束；未提交的表单视为无效
    pub fn is_valid(&mut self) -> bool {
        if !self.submitted {
            return false;
        }
        if !self.validated {
            self.validate();
        }
        self.errors.is_empty()
    }

    fn validate(&mut self) {
        let mut errors = BTreeMap::new();
        for field in &self.fields {
            let raw = self.values.get(&field.name).map(Vec::as_slice).unwrap_or(&[]);
            let field_errors = field.validate(raw);
            if !field_errors.is_empty() {
                errors.insert(field.name.clone(), field_errors);
            }
        }

        if self.csrf_enabled {
            if let Some(expected) = &self.csrf_token {
                let valid = self
                    .submitted_csrf
                    .as_deref()
                    .is_some_and(|submitted| constant_time_eq(submitted, expected));
                if !valid {
                    errors.insert(
                        FORM_ERROR_KEY.to_string(),
                        vec!["The CSRF token is invalid. Please try to resubmit the form.".to_string()],
                    );
                }
            }
        }

        self.errors = errors;
        self.validated = true;
    }

    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    pub fn field_errors(&self, name: &str) -> &[String] {
        self.errors.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 添加自定义错误（例如唯一性检查失败）
    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_string()).or_default().push(message.into());
    }

    /// 原始提交值
    pub fn raw_value(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 类型化数据（整数为数字，复选框为布尔，多选为数组，无法转换的值为 null）
    pub fn data(&self) -> Value {
        let mut map = serde_json::Map::new();
        for field in &self.fields {
            let raw = self.raw_value(&field.name);
            map.insert(field.name.clone(), field.parse(raw).unwrap_or(Value::Null));
        }
        Value::Object(map)
    }

    /// 校验通过后反序列化为结构体
    pub fn into_data<T: DeserializeOwned>(mut self) -> Result<T, FormError> {
        if !self.submitted {
            return Err(FormError::NotSubmitted);
        }
        if !self.is_valid() {
            return Err(FormError::Invalid(self.errors));
        }
        Ok(serde_json::from_value(self.data())?)
    }

    /// 从 JSON 对象预填（通常是 `serde_json::to_value(&entity)`），未知键忽略
    pub fn set_data(&mut self, data: &Value) -> Result<(), FormError> {
        let Value::Object(map) = data else {
            return Err(FormError::Deserialize(serde::de::Error::custom(
                "表单数据必须是 JSON 对象",
            )));
        };
        for field in &self.fields {
            let Some(value) = map.get(&field.name) else {
                continue;
            };
            let raw = match value {
                Value::Null => Vec::new(),
                Value::Bool(true) => vec!["1".to_string()],
                Value::Bool(false) => Vec::new(),
                Value::String(s) => vec![s.clone()],
                Value::Number(n) => vec![n.to_string()],
                Value::Array(items) => items
                    .iter()
                    .map(|i| match i {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
                Value::Object(_) => vec![value.to_string()],
            };
            // 日期时间去掉秒，适配 datetime-local 输入框
            let raw = if field.kind == FieldKind::DateTime {
                raw.into_iter().map(|v| v.chars().take(16).collect()).collect()
            } else {
                raw
            };
            self.values.insert(field.name.clone(), raw);
        }
        Ok(())
    }

    /// 确保字段存在
    pub(super) fn require_field(&self, name: &str) -> Result<&Field, FormError> {
        self.field(name).ok_or_else(|| FormError::UnknownField {
            form: self.name.clone(),
            field: name.to_string(),
        })
    }
}
