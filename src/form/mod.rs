//! 表单：字段定义、约束、请求绑定、校验与 HTML 渲染

mod builder;
mod constraint;
mod field;
mod input;
mod render;

pub use builder::{CSRF_FIELD, FORM_ERROR_KEY, Form, FormBuilder, FormError, FormType};
pub use constraint::Constraint;
pub use field::{Field, FieldKind};
pub use input::FormInput;
pub(crate) use input::is_form_content_type;
