//! 字段约束

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// 字段约束
///
/// 除 `Required` 外，空值跳过校验
#[derive(Debug, Clone)]
pub enum Constraint {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Min(f64),
    Max(f64),
    Pattern(Regex),
    Email,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

impl Constraint {
    /// 校验类型化后的值，失败时返回错误消息
    pub fn check(&self, value: &Value) -> Option<String> {
        if let Self::Required = self {
            return is_blank(value).then(|| "This value should not be blank.".to_string());
        }
        if matches!(value, Value::Null) {
            return None;
        }

        match self {
            Self::Required => None,
            Self::MinLength(min) => {
                let len = length(value)?;
                (len < *min).then(|| format!("This value is too short. It should have {} characters or more.", min))
            }
            Self::MaxLength(max) => {
                let len = length(value)?;
                (len > *max).then(|| format!("This value is too long. It should have {} characters or less.", max))
            }
            Self::Min(min) => {
                let n = value.as_f64()?;
                (n < *min).then(|| format!("This value should be {} or more.", format_number(*min)))
            }
            Self::Max(max) => {
                let n = value.as_f64()?;
                (n > *max).then(|| format!("This value should be {} or less.", format_number(*max)))
            }
            Self::Pattern(regex) => {
                let s = value.as_str()?;
                (!regex.is_match(s)).then(|| "This value is not valid.".to_string())
            }
            Self::Email => {
                let s = value.as_str()?;
                (!email_regex().is_match(s)).then(|| "This value is not a valid email address.".to_string())
            }
        }
    }
}

/// 字符串按字符计数，数组按元素计数
fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
