//! 代码生成器
//!
//! 内嵌模板由模板引擎渲染后写入项目目录，已存在的文件只有 `--force` 时才覆盖

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, bail};
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::common::{to_pascal_case, to_snake_case};
use crate::orm::ColumnType;
use crate::routing::RouteTable;
use crate::templating::TemplateRenderer;

const CONTROLLER: &str = include_str!("../../assets/scaffold/controller.rs");
const CONTROLLER_INDEX: &str = include_str!("../../assets/scaffold/controller_index.html");
const CONTROLLER_SHOW: &str = include_str!("../../assets/scaffold/controller_show.html");
const ENTITY: &str = include_str!("../../assets/scaffold/entity.rs");
const FORM: &str = include_str!("../../assets/scaffold/form.rs");
const CRUD_CONTROLLER: &str = include_str!("../../assets/scaffold/crud_controller.rs");
const CRUD_INDEX: &str = include_str!("../../assets/scaffold/crud_index.html");
const CRUD_FORM: &str = include_str!("../../assets/scaffold/crud_form.html");
const CRUD_SHOW: &str = include_str!("../../assets/scaffold/crud_show.html");
const AUTH_FORM_CONTROLLER: &str = include_str!("../../assets/scaffold/auth_form_controller.rs");
const AUTH_JWT_CONTROLLER: &str = include_str!("../../assets/scaffold/auth_jwt_controller.rs");
const AUTH_LOGIN: &str = include_str!("../../assets/scaffold/auth_login.html");
const SECURITY_FORM: &str = include_str!("../../assets/scaffold/security_form.yaml");
const SECURITY_JWT: &str = include_str!("../../assets/scaffold/security_jwt.yaml");

/// 认证脚手架类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AuthKind {
    Form,
    Jwt,
}

/// `--field name:type[:nullable]` 参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid identifier pattern"))
}

const RESERVED: &[&str] = &["id", "type", "struct", "fn", "mod", "self", "crate", "super", "match", "use"];

impl FieldSpec {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut parts = raw.split(':');
        let name = to_snake_case(parts.next().unwrap_or(""));
        if !identifier_regex().is_match(&name) || RESERVED.contains(&name.as_str()) {
            bail!("字段名无效: {}", raw);
        }
        let type_name = parts.next().unwrap_or("string");
        let column_type =
            ColumnType::parse(type_name).with_context(|| format!("未知字段类型: {}", type_name))?;

        let mut spec = Self {
            name,
            column_type,
            nullable: false,
            unique: false,
        };
        for flag in parts {
            match flag.to_ascii_lowercase().as_str() {
                "nullable" | "null" | "optional" => spec.nullable = true,
                "unique" => spec.unique = true,
                other => bail!("未知字段选项: {}", other),
            }
        }
        Ok(spec)
    }

    fn rust_type(&self) -> String {
        if self.nullable {
            format!("Option<{}>", self.column_type.rust_type())
        } else {
            self.column_type.rust_type().to_string()
        }
    }

    /// 对应的表单字段构造函数（二进制列不进入表单）
    fn form_field(&self) -> Option<&'static str> {
        Some(match self.column_type {
            ColumnType::Integer => "integer",
            ColumnType::Real => "number",
            ColumnType::Boolean => "checkbox",
            ColumnType::DateTime => "datetime",
            ColumnType::Text if self.name.contains("email") => "email",
            ColumnType::Text => "text",
            ColumnType::Blob => return None,
        })
    }

    fn context(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "rust_type": self.rust_type(),
            "column_type": format!("{:?}", self.column_type),
            "nullable": self.nullable,
            "unique": self.unique,
            "form_field": self.form_field(),
            // 复选框未勾选即为 false，不加必填
            "required": !self.nullable && self.column_type != ColumnType::Boolean,
        })
    }
}

/// 规范化后的名称
#[derive(Debug, Clone, Serialize)]
struct Names {
    snake: String,
    pascal: String,
    /// 表名
    table: String,
    /// URL 段（复数，连字符分隔）
    url: String,
}

impl Names {
    fn new(raw: &str) -> anyhow::Result<Self> {
        let snake = to_snake_case(raw);
        if !identifier_regex().is_match(&snake) {
            bail!("名称无效: {:?}", raw);
        }
        let snake = snake
            .strip_suffix("_controller")
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or(snake);
        Ok(Self {
            pascal: to_pascal_case(&snake),
            table: snake.clone(),
            url: pluralize(&snake).replace('_', "-"),
            snake,
        })
    }
}

/// 英文复数（常见规则）
fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

/// 代码生成器
pub struct Generator {
    root: PathBuf,
    force: bool,
    renderer: TemplateRenderer,
}

impl Generator {
    pub fn new(root: impl Into<PathBuf>, force: bool) -> Self {
        let root = root.into();
        // 脚手架模板全部内嵌，不使用模板目录
        let renderer = TemplateRenderer::new(root.join(".scaffold"), Arc::new(RouteTable::default()));
        Self { root, force, renderer }
    }

    fn render(&self, key: &str, source: &str, context: &serde_json::Value) -> anyhow::Result<String> {
        // `.tpl` 后缀关闭 HTML 自动转义
        self.renderer
            .render_named_str(&format!("{}.tpl", key), source, context)
            .with_context(|| format!("渲染脚手架 {} 失败", key))
    }

    /// 写入一批文件
    ///
    /// 未指定 `--force` 时先检查全部目标，有任何冲突则一个都不写
    fn write_all(&self, files: Vec<(String, String)>) -> anyhow::Result<Vec<PathBuf>> {
        if !self.force {
            let conflicts: Vec<String> = files
                .iter()
                .map(|(relative, _)| self.root.join(relative))
                .filter(|path| path.exists())
                .map(|path| path.display().to_string())
                .collect();
            if !conflicts.is_empty() {
                bail!("文件已存在: {}（使用 --force 覆盖）", conflicts.join(", "));
            }
        }

        let mut written = Vec::with_capacity(files.len());
        for (relative, contents) in files {
            let path = self.root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| format!("创建目录失败: {}", parent.display()))?;
            }
            fs::write(&path, contents).with_context(|| format!("写入文件失败: {}", path.display()))?;
            tracing::debug!("已生成 {}", path.display());
            written.push(path);
        }
        Ok(written)
    }

    /// 在 `src/<dir>/mod.rs` 中声明模块（已声明则跳过）
    fn register_module(&self, dir: &str, module: &str) -> anyhow::Result<()> {
        let path = self.root.join("src").join(dir).join("mod.rs");
        let declaration = format!("pub mod {};", module);
        let existing = if path.exists() {
            fs::read_to_string(&path).with_context(|| format!("读取文件失败: {}", path.display()))?
        } else {
            String::new()
        };
        if existing.lines().any(|line| line.trim() == declaration) {
            return Ok(());
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&declaration);
        updated.push('\n');
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, updated).with_context(|| format!("写入文件失败: {}", path.display()))
    }

    fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    fn context(names: &Names, fields: &[FieldSpec]) -> serde_json::Value {
        json!({
            "snake": names.snake,
            "pascal": names.pascal,
            "table": names.table,
            "url": names.url,
            "fields": fields.iter().map(FieldSpec::context).collect::<Vec<_>>(),
        })
    }

    /// 控制器 + index/show 模板
    pub fn controller(&self, name: &str) -> anyhow::Result<Vec<PathBuf>> {
        let names = Names::new(name)?;
        let ctx = Self::context(&names, &[]);
        let module = format!("{}_controller", names.snake);
        let written = self.write_all(vec![
            (
                format!("src/controllers/{}.rs", module),
                self.render("controller.rs", CONTROLLER, &ctx)?,
            ),
            (
                format!("templates/{}/index.html", names.snake),
                self.render("controller_index.html", CONTROLLER_INDEX, &ctx)?,
            ),
            (
                format!("templates/{}/show.html", names.snake),
                self.render("controller_show.html", CONTROLLER_SHOW, &ctx)?,
            ),
        ])?;
        self.register_module("controllers", &module)?;
        Ok(written)
    }

    fn entity_file(&self, names: &Names, fields: &[FieldSpec]) -> anyhow::Result<(String, String)> {
        Ok((
            format!("src/entities/{}.rs", names.snake),
            self.render("entity.rs", ENTITY, &Self::context(names, fields))?,
        ))
    }

    fn form_file(&self, names: &Names, fields: &[FieldSpec]) -> anyhow::Result<(String, String)> {
        Ok((
            format!("src/forms/{}_form.rs", names.snake),
            self.render("form.rs", FORM, &Self::context(names, fields))?,
        ))
    }

    /// 实体源文件（含仓库辅助函数）
    pub fn entity(&self, name: &str, fields: &[FieldSpec]) -> anyhow::Result<Vec<PathBuf>> {
        let names = Names::new(name)?;
        let written = self.write_all(vec![self.entity_file(&names, fields)?])?;
        self.register_module("entities", &names.snake)?;
        Ok(written)
    }

    pub fn form(&self, name: &str, fields: &[FieldSpec]) -> anyhow::Result<Vec<PathBuf>> {
        let names = Names::new(name)?;
        let written = self.write_all(vec![self.form_file(&names, fields)?])?;
        self.register_module("forms", &format!("{}_form", names.snake))?;
        Ok(written)
    }

    /// CRUD 控制器与模板；实体和表单不存在时一并生成
    pub fn crud(&self, name: &str, fields: &[FieldSpec]) -> anyhow::Result<Vec<PathBuf>> {
        let names = Names::new(name)?;
        let mut files = Vec::new();
        let mut modules = Vec::new();
        if !self.exists(&format!("src/entities/{}.rs", names.snake)) {
            files.push(self.entity_file(&names, fields)?);
            modules.push(("entities", names.snake.clone()));
        }
        if !self.exists(&format!("src/forms/{}_form.rs", names.snake)) {
            files.push(self.form_file(&names, fields)?);
            modules.push(("forms", format!("{}_form", names.snake)));
        }

        let ctx = Self::context(&names, fields);
        let module = format!("{}_controller", names.snake);
        files.push((
            format!("src/controllers/{}.rs", module),
            self.render("crud_controller.rs", CRUD_CONTROLLER, &ctx)?,
        ));
        files.push((
            format!("templates/{}/index.html", names.snake),
            self.render("crud_index.html", CRUD_INDEX, &ctx)?,
        ));
        files.push((
            format!("templates/{}/show.html", names.snake),
            self.render("crud_show.html", CRUD_SHOW, &ctx)?,
        ));
        for (file, heading) in [("new", format!("New {}", names.pascal)), ("edit", format!("Edit {}", names.pascal))] {
            let mut ctx = ctx.clone();
            ctx["heading"] = json!(heading);
            files.push((
                format!("templates/{}/{}.html", names.snake, file),
                self.render("crud_form.html", CRUD_FORM, &ctx)?,
            ));
        }

        let written = self.write_all(files)?;
        modules.push(("controllers", module));
        for (dir, module) in modules {
            self.register_module(dir, &module)?;
        }
        Ok(written)
    }

    /// `User` 实体：email（唯一）、password（bcrypt 哈希）、roles（JSON 数组）
    pub fn user(&self) -> anyhow::Result<Vec<PathBuf>> {
        let fields = [
            FieldSpec::parse("email:string:unique")?,
            FieldSpec::parse("password:string")?,
            FieldSpec::parse("roles:string")?,
        ];
        self.entity("user", &fields)
    }

    /// 登录控制器、登录模板与 `config/security.yaml`
    pub fn auth(&self, kind: AuthKind) -> anyhow::Result<Vec<PathBuf>> {
        let ctx = match kind {
            AuthKind::Form => json!({ "provider": "app_users", "table": "user", "login_path": "/login" }),
            AuthKind::Jwt => json!({
                "provider": "app_users",
                "table": "user",
                "login_path": "/api/login",
                "prefix": "/api",
            }),
        };

        let files = match kind {
            AuthKind::Form => vec![
                (
                    "src/controllers/security_controller.rs".to_string(),
                    self.render("auth_form_controller.rs", AUTH_FORM_CONTROLLER, &ctx)?,
                ),
                (
                    "templates/security/login.html".to_string(),
                    self.render("auth_login.html", AUTH_LOGIN, &ctx)?,
                ),
                (
                    "config/security.yaml".to_string(),
                    self.render("security_form.yaml", SECURITY_FORM, &ctx)?,
                ),
            ],
            AuthKind::Jwt => vec![
                (
                    "src/controllers/security_controller.rs".to_string(),
                    self.render("auth_jwt_controller.rs", AUTH_JWT_CONTROLLER, &ctx)?,
                ),
                (
                    "config/security.yaml".to_string(),
                    self.render("security_jwt.yaml", SECURITY_JWT, &ctx)?,
                ),
            ],
        };
        let written = self.write_all(files)?;
        self.register_module("controllers", "security_controller")?;
        Ok(written)
    }
}
