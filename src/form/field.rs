//! 表单字段

use serde_json::Value;

use super::constraint::Constraint;

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Email,
    Password,
    Textarea,
    Integer,
    Number,
    Checkbox,
    Choice,
    Date,
    DateTime,
    Hidden,
}

impl FieldKind {
    /// `<input type="...">` 的取值（textarea / choice 不使用 input）
    pub fn input_type(&self) -> &'static str {
        match self {
            Self::Text | Self::Textarea | Self::Choice => "text",
            Self::Email => "email",
            Self::Password => "password",
            Self::Integer | Self::Number => "number",
            Self::Checkbox => "checkbox",
            Self::Date => "date",
            Self::DateTime => "datetime-local",
            Self::Hidden => "hidden",
        }
    }

    /// 从生成器参数解析（`--field score:integer`）
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw.to_ascii_lowercase().as_str() {
            "text" | "string" | "str" => Self::Text,
            "email" => Self::Email,
            "password" => Self::Password,
            "textarea" => Self::Textarea,
            "integer" | "int" => Self::Integer,
            "number" | "float" | "real" => Self::Number,
            "checkbox" | "bool" | "boolean" => Self::Checkbox,
            "choice" | "select" => Self::Choice,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "hidden" => Self::Hidden,
            _ => return None,
        })
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// 表单字段定义
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub label: Option<String>,
    pub help: Option<String>,
    pub placeholder: Option<String>,
    /// `(value, label)`
    pub choices: Vec<(String, String)>,
    pub multiple: bool,
    pub constraints: Vec<Constraint>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            label: None,
            help: None,
            placeholder: None,
            choices: Vec::new(),
            multiple: false,
            constraints: Vec::new(),
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    /// 邮箱字段自带格式校验
    pub fn email(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Email).constraint(Constraint::Email)
    }

    pub fn password(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Password)
    }

    pub fn textarea(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Textarea)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn checkbox(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Checkbox)
    }

    pub fn choice<I, V, L>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = (V, L)>,
        V: Into<String>,
        L: Into<String>,
    {
        let mut field = Self::new(name, FieldKind::Choice);
        field.choices = choices.into_iter().map(|(v, l)| (v.into(), l.into())).collect();
        field
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn hidden(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Hidden)
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn required(self) -> Self {
        self.constraint(Constraint::Required)
    }

    pub fn min_length(self, min: usize) -> Self {
        self.constraint(Constraint::MinLength(min))
    }

    pub fn max_length(self, max: usize) -> Self {
        self.constraint(Constraint::MaxLength(max))
    }

    pub fn min(self, min: f64) -> Self {
        self.constraint(Constraint::Min(min))
    }

    pub fn max(self, max: f64) -> Self {
        self.constraint(Constraint::Max(max))
    }

    pub fn pattern(self, regex: regex::Regex) -> Self {
        self.constraint(Constraint::Pattern(regex))
    }

    pub fn is_required(&self) -> bool {
        self.constraints.iter().any(|c| matches!(c, Constraint::Required))
    }

    /// 展示用标签（未设置时由字段名推导：`first_name` -> `First name`）
    pub fn display_label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let words = self.name.replace('_', " ");
        let mut chars = words.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// 将提交的原始值转换为类型化 JSON 值
    ///
    /// 空值返回 `Value::Null`（多选返回空数组，复选框返回 false）
    pub fn parse(&self, raw: &[String]) -> Result<Value, String> {
        match self.kind {
            FieldKind::Checkbox => Ok(Value::Bool(
                raw.iter().any(|v| !matches!(v.as_str(), "" | "0" | "false" | "off")),
            )),
            FieldKind::Choice if self.multiple => Ok(Value::Array(
                raw.iter()
                    .filter(|v| !v.is_empty())
                    .map(|v| Value::String(v.clone()))
                    .collect(),
            )),
            _ => {
                let value = raw.first().map(|v| v.trim()).unwrap_or("");
                if value.is_empty() {
                    return Ok(Value::Null);
                }
                self.parse_scalar(value)
            }
        }
    }

    fn parse_scalar(&self, value: &str) -> Result<Value, String> {
        match self.kind {
            FieldKind::Integer => value
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| "This value should be a valid integer.".to_string()),
            FieldKind::Number => value
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::from)
                .ok_or_else(|| "This value should be a valid number.".to_string()),
            FieldKind::Date => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .map_err(|_| "This value is not a valid date.".to_string()),
            FieldKind::DateTime => DATETIME_FORMATS
                .iter()
                .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()))
                .ok_or_else(|| "This value is not a valid datetime.".to_string()),
            _ => Ok(Value::String(value.to_string())),
        }
    }

    /// 运行类型转换与约束，返回错误消息列表
    pub fn validate(&self, raw: &[String]) -> Vec<String> {
        let value = match self.parse(raw) {
            Ok(value) => value,
            Err(message) => return vec![message],
        };

        let mut errors = Vec::new();
        if self.kind == FieldKind::Choice && !self.choices.is_empty() {
            let allowed = |v: &str| self.choices.iter().any(|(c, _)| c == v);
            let invalid = match &value {
                Value::String(s) => !allowed(s),
                Value::Array(items) => items.iter().any(|i| !i.as_str().is_some_and(allowed)),
                _ => false,
            };
            if invalid {
                errors.push("The selected choice is invalid.".to_string());
            }
        }

        for constraint in &self.constraints {
            if let Some(message) = constraint.check(&value) {
                errors.push(message);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_typed_parsing() {
        assert_eq!(Field::integer("n").parse(&raw(&["42"])), Ok(Value::from(42)));
        assert!(Field::integer("n").parse(&raw(&["4.2"])).is_err());
        assert_eq!(Field::number("n").parse(&raw(&["4.5"])), Ok(Value::from(4.5)));
        assert_eq!(Field::checkbox("c").parse(&raw(&["1"])), Ok(Value::Bool(true)));
        assert_eq!(Field::checkbox("c").parse(&[]), Ok(Value::Bool(false)));
        assert_eq!(Field::text("t").parse(&raw(&["  "])), Ok(Value::Null));
        assert_eq!(
            Field::datetime("d").parse(&raw(&["2026-10-19T08:30"])),
            Ok(Value::from("2026-10-19T08:30:00"))
        );
        assert!(Field::date("d").parse(&raw(&["2026-13-01"])).is_err());
        let tags = Field::choice("tags", [("a", "A"), ("b", "B")]).multiple();
        assert_eq!(tags.parse(&raw(&["a", "b"])), Ok(serde_json::json!(["a", "b"])));
    }

    #[test]
    fn test_choice_must_be_allowed() {
        let field = Field::choice("genre", [("rpg", "RPG"), ("fps", "FPS")]);
        assert!(field.validate(&raw(&["rpg"])).is_empty());
        assert_eq!(field.validate(&raw(&["mmo"])), vec!["The selected choice is invalid."]);
        assert!(field.validate(&[]).is_empty());
    }

    #[test]
    fn test_display_label() {
        assert_eq!(Field::text("first_name").display_label(), "First name");
        assert_eq!(Field::text("x").label("Custom").display_label(), "Custom");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(FieldKind::parse("int"), Some(FieldKind::Integer));
        assert_eq!(FieldKind::parse("DateTime"), Some(FieldKind::DateTime));
        assert_eq!(FieldKind::parse("blob"), None);
    }
}
