//! 表单 HTML 渲染
//!
//! 所有值与标签都经过 HTML 转义

use std::fmt::Write as _;

use super::builder::{CSRF_FIELD, FORM_ERROR_KEY, Form, FormError};
use super::constraint::Constraint;
use super::field::{Field, FieldKind};
use crate::common::escape_html;

impl Form {
    fn element_id(&self, field: &str) -> String {
        format!("{}_{}", self.name, field)
    }

    /// 渲染完整表单（含 CSRF 隐藏字段与提交按钮）
    pub fn render(&self) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            r#"<form name="{}" method="{}""#,
            escape_html(&self.name),
            escape_html(&self.method)
        );
        if !self.action.is_empty() {
            let _ = write!(html, r#" action="{}""#, escape_html(&self.action));
        }
        html.push_str(" novalidate>\n");

        html.push_str(&self.render_errors(FORM_ERROR_KEY));
        if let Some(hidden) = self.render_csrf() {
            html.push_str(&hidden);
        }
        for field in &self.fields {
            html.push_str(&self.render_row(field));
        }
        let _ = writeln!(
            html,
            r#"<button type="submit">{}</button>"#,
            escape_html(&self.submit_label)
        );
        html.push_str("</form>\n");
        html
    }

    /// 渲染单个字段（标签、输入框、帮助与错误）
    pub fn render_field(&self, name: &str) -> Result<String, FormError> {
        let field = self.require_field(name)?;
        Ok(self.render_row(field))
    }

    /// CSRF 隐藏字段（未启用或未配置 token 时为空）
    pub fn render_csrf(&self) -> Option<String> {
        if !self.csrf_enabled {
            return None;
        }
        self.csrf_token.as_ref().map(|token| {
            format!(
                "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                CSRF_FIELD,
                escape_html(token)
            )
        })
    }

    /// 渲染某个字段（或 `_form`）的错误列表
    pub fn render_errors(&self, name: &str) -> String {
        let errors = self.field_errors(name);
        if errors.is_empty() {
            return String::new();
        }
        let mut html = String::from("<ul class=\"form-errors\">");
        for error in errors {
            let _ = write!(html, "<li>{}</li>", escape_html(error));
        }
        html.push_str("</ul>\n");
        html
    }

    fn render_row(&self, field: &Field) -> String {
        if field.kind == FieldKind::Hidden {
            return self.render_widget(field);
        }
        let id = self.element_id(&field.name);
        let has_errors = !self.field_errors(&field.name).is_empty();
        let mut html = format!(
            "<div class=\"form-group{}\">\n",
            if has_errors { " has-error" } else { "" }
        );

        if field.kind == FieldKind::Checkbox {
            let _ = writeln!(
                html,
                "<label for=\"{}\">{} {}</label>",
                id,
                self.render_widget(field).trim_end(),
                escape_html(&field.display_label())
            );
        } else {
            let _ = writeln!(
                html,
                "<label for=\"{}\"{}>{}</label>",
                id,
                if field.is_required() { " class=\"required\"" } else { "" },
                escape_html(&field.display_label())
            );
            html.push_str(&self.render_widget(field));
        }

        if let Some(help) = &field.help {
            let _ = writeln!(html, "<small class=\"form-help\">{}</small>", escape_html(help));
        }
        html.push_str(&self.render_errors(&field.name));
        html.push_str("</div>\n");
        html
    }

    fn render_widget(&self, field: &Field) -> String {
        let id = self.element_id(&field.name);
        let name = escape_html(&field.name);
        let values = self.raw_value(&field.name);
        let first = values.first().map(String::as_str).unwrap_or("");
        let attrs = constraint_attributes(field);

        match field.kind {
            FieldKind::Textarea => format!(
                "<textarea id=\"{}\" name=\"{}\"{}>{}</textarea>\n",
                id,
                name,
                attrs,
                escape_html(first)
            ),
            FieldKind::Choice => {
                let mut html = format!(
                    "<select id=\"{}\" name=\"{}\"{}{}>\n",
                    id,
                    name,
                    if field.multiple { " multiple" } else { "" },
                    attrs
                );
                if !field.multiple && !field.is_required() {
                    html.push_str("<option value=\"\"></option>\n");
                }
                for (value, label) in &field.choices {
                    let selected = values.iter().any(|v| v == value);
                    let _ = writeln!(
                        html,
                        "<option value=\"{}\"{}>{}</option>",
                        escape_html(value),
                        if selected { " selected" } else { "" },
                        escape_html(label)
                    );
                }
                html.push_str("</select>\n");
                html
            }
            FieldKind::Checkbox => {
                let checked = matches!(field.parse(values), Ok(serde_json::Value::Bool(true)));
                format!(
                    "<input type=\"checkbox\" id=\"{}\" name=\"{}\" value=\"1\"{}{}>\n",
                    id,
                    name,
                    if checked { " checked" } else { "" },
                    attrs
                )
            }
            kind => {
                // 密码不回显
                let value = if kind == FieldKind::Password { "" } else { first };
                let mut html = format!(
                    "<input type=\"{}\" id=\"{}\" name=\"{}\" value=\"{}\"",
                    kind.input_type(),
                    id,
                    name,
                    escape_html(value)
                );
                if kind == FieldKind::Number {
                    html.push_str(" step=\"any\"");
                }
                if let Some(placeholder) = &field.placeholder {
                    let _ = write!(html, " placeholder=\"{}\"", escape_html(placeholder));
                }
                html.push_str(&attrs);
                html.push_str(">\n");
                html
            }
        }
    }
}

/// 约束对应的 HTML5 属性
fn constraint_attributes(field: &Field) -> String {
    let mut attrs = String::new();
    for constraint in &field.constraints {
        match constraint {
            Constraint::Required => attrs.push_str(" required"),
            Constraint::MinLength(n) if field.kind != FieldKind::Choice => {
                let _ = write!(attrs, " minlength=\"{}\"", n);
            }
            Constraint::MaxLength(n) if field.kind != FieldKind::Choice => {
                let _ = write!(attrs, " maxlength=\"{}\"", n);
            }
            Constraint::Min(n) => {
                let _ = write!(attrs, " min=\"{}\"", n);
            }
            Constraint::Max(n) => {
                let _ = write!(attrs, " max=\"{}\"", n);
            }
            _ => {}
        }
    }
    attrs
}
