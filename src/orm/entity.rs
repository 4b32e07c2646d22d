//! 实体与表结构定义

use serde::{Deserialize, Serialize};

pub use rusqlite::types::Value as SqlValue;

/// 列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    /// 以 RFC3339 文本存储
    DateTime,
    Blob,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::DateTime => "TEXT",
            Self::Blob => "BLOB",
        }
    }

    /// 解析命令行/配置中的类型名
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "int" | "integer" | "i32" | "i64" => Self::Integer,
            "float" | "real" | "f64" | "decimal" => Self::Real,
            "str" | "string" | "text" => Self::Text,
            "bool" | "boolean" => Self::Boolean,
            "datetime" | "date" | "timestamp" => Self::DateTime,
            "bytes" | "blob" => Self::Blob,
            _ => return None,
        })
    }

    /// 对应的 Rust 类型（代码生成使用，日期时间按 RFC3339 字符串映射）
    pub fn rust_type(&self) -> &'static str {
        match self {
            Self::Integer => "i64",
            Self::Real => "f64",
            Self::Text | Self::DateTime => "String",
            Self::Boolean => "bool",
            Self::Blob => "Vec<u8>",
        }
    }

    /// 按 SQLite 类型亲和性映射已有列的声明类型
    pub fn from_sql_type(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else if upper.contains("BLOB") {
            Self::Blob
        } else {
            Self::Text
        }
    }

    /// `ADD COLUMN ... NOT NULL` 时需要的默认值
    pub(crate) fn zero_default(&self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "0",
            Self::Real => "0.0",
            Self::Text | Self::DateTime => "''",
            Self::Blob => "X''",
        }
    }
}

/// 列定义（不含隐式主键 `id`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    /// SQL 字面量形式的默认值
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            unique: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }

    /// 建表语句中的列定义
    pub fn definition(&self) -> String {
        let mut def = format!("\"{}\" {}", self.name, self.column_type.sql_type());
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if self.unique {
            def.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }

    /// `ALTER TABLE ADD COLUMN` 用的定义
    ///
    /// SQLite 不允许给已有行添加无默认值的 NOT NULL 列，也不支持 ADD COLUMN UNIQUE，
    /// 唯一约束改由 [`Column::unique_index_sql`] 补上
    pub fn add_column_definition(&self) -> String {
        let mut column = self.clone();
        column.unique = false;
        if !column.nullable && column.default.is_none() {
            column.default = Some(self.column_type.zero_default().to_string());
        }
        column.definition()
    }

    /// 迁移补建唯一约束时使用的索引名
    pub fn unique_index_name(&self, table: &str) -> String {
        format!("uniq_{}_{}", table, self.name)
    }

    /// 唯一列的 `CREATE UNIQUE INDEX` 语句
    pub fn unique_index_sql(&self, table: &str) -> Option<String> {
        self.unique.then(|| {
            format!(
                "CREATE UNIQUE INDEX \"{}\" ON \"{}\" (\"{}\");",
                self.unique_index_name(table),
                table,
                self.name
            )
        })
    }

    /// 重建表时为旧行填充该列的表达式
    pub fn fill_expr(&self) -> String {
        match &self.default {
            Some(default) => default.clone(),
            None if self.nullable => "NULL".to_string(),
            None => self.column_type.zero_default().to_string(),
        }
    }
}

/// 表结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        name == "id" || self.columns.iter().any(|c| c.name == name)
    }

    /// `id` 加所有列名，按 SELECT 顺序
    pub fn select_list(&self) -> String {
        std::iter::once("\"id\"".to_string())
            .chain(self.columns.iter().map(|c| format!("\"{}\"", c.name)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_table_sql(&self, if_not_exists: bool) -> String {
        let columns = std::iter::once("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string())
            .chain(self.columns.iter().map(Column::definition))
            .collect::<Vec<_>>()
            .join(",\n    ");
        format!(
            "CREATE TABLE {}\"{}\" (\n    {}\n);",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            self.name,
            columns
        )
    }
}

/// ORM 实体
///
/// 每个实体映射一张表，主键固定为自增 `id`
pub trait Entity: Sized + Send + 'static {
    fn table_name() -> &'static str;

    /// 除 `id` 以外的列
    fn columns() -> Vec<Column>;

    fn schema() -> TableSchema {
        TableSchema::new(Self::table_name(), Self::columns())
    }

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// 除 `id` 以外的列值
    fn to_values(&self) -> Vec<(&'static str, SqlValue)>;

    /// 从查询行构造实体（行中包含 `id` 与全部列）
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql() {
        let schema = TableSchema::new(
            "game",
            vec![
                Column::new("title", ColumnType::Text).unique(),
                Column::new("score", ColumnType::Integer).default_value("0"),
                Column::new("notes", ColumnType::Text).nullable(),
            ],
        );
        let sql = schema.create_table_sql(true);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"game\""));
        assert!(sql.contains("\"title\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("\"score\" INTEGER NOT NULL DEFAULT 0"));
        assert!(sql.contains("\"notes\" TEXT,") || sql.contains("\"notes\" TEXT\n"));
        assert_eq!(schema.select_list(), "\"id\", \"title\", \"score\", \"notes\"");
    }

    #[test]
    fn test_add_column_definition_gets_default() {
        let column = Column::new("level", ColumnType::Integer).unique();
        assert_eq!(column.add_column_definition(), "\"level\" INTEGER NOT NULL DEFAULT 0");
        let nullable = Column::new("bio", ColumnType::Text).nullable();
        assert_eq!(nullable.add_column_definition(), "\"bio\" TEXT");
    }

    #[test]
    fn test_unique_index_and_fill_expr() {
        let slug = Column::new("slug", ColumnType::Text).unique();
        assert_eq!(
            slug.unique_index_sql("post").as_deref(),
            Some("CREATE UNIQUE INDEX \"uniq_post_slug\" ON \"post\" (\"slug\");")
        );
        assert_eq!(slug.fill_expr(), "''");
        assert!(Column::new("body", ColumnType::Text).unique_index_sql("post").is_none());
        assert_eq!(Column::new("n", ColumnType::Integer).nullable().fill_expr(), "NULL");
        assert_eq!(Column::new("n", ColumnType::Integer).default_value("7").fill_expr(), "7");
    }

    #[test]
    fn test_column_type_from_sql_type() {
        assert_eq!(ColumnType::from_sql_type("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql_type("double precision"), ColumnType::Real);
        assert_eq!(ColumnType::from_sql_type("VARCHAR(20)"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql_type("BLOB"), ColumnType::Blob);
    }

    #[test]
    fn test_parse_column_type() {
        assert_eq!(ColumnType::parse("String"), Some(ColumnType::Text));
        assert_eq!(ColumnType::parse("bool"), Some(ColumnType::Boolean));
        assert_eq!(ColumnType::parse("uuid"), None);
    }
}
