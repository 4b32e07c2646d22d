//! SQLite 连接与 EntityManager

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::Connection;

use super::entity::{ColumnType, Entity, SqlValue, TableSchema};
use super::repository::Repository;
use crate::error::FrameworkError;
use crate::profiler::context as profile_context;

/// ORM 错误
#[derive(Debug, thiserror::Error)]
pub enum OrmError {
    #[error("数据库错误: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("表 {table} 不存在列 {column}")]
    UnknownColumn { table: String, column: String },
    #[error("{table} #{id} 不存在")]
    NotFound { table: String, id: i64 },
    #[error("实体尚未持久化，缺少 id")]
    MissingId,
    #[error("{0}")]
    Migration(String),
}

impl From<OrmError> for FrameworkError {
    fn from(e: OrmError) -> Self {
        match e {
            OrmError::NotFound { .. } => FrameworkError::NotFound(e.to_string()),
            other => FrameworkError::Internal(other.into()),
        }
    }
}

/// 数据库句柄（可克隆，内部共享同一连接）
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    echo: bool,
}

impl Database {
    /// 打开数据库
    ///
    /// 支持 `sqlite:path`、`sqlite://path`、`sqlite::memory:` 与直接的文件路径
    pub fn open(url: &str, echo: bool) -> anyhow::Result<Self> {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("创建数据库目录失败: {}", parent.display()))?;
                }
            }
            Connection::open(path).with_context(|| format!("打开数据库失败: {}", path))?
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        tracing::debug!("数据库已打开: {}", url);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            echo,
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::open("sqlite::memory:", false)
    }

    fn observe(&self, sql: &str, params: &[SqlValue], started: Instant) {
        let elapsed = started.elapsed();
        if self.echo {
            tracing::debug!(target: "framefox::sql", elapsed_ms = elapsed.as_secs_f64() * 1000.0, "{}", sql);
        }
        profile_context::record_query(sql, params, elapsed);
    }

    /// 执行写语句，返回受影响行数
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, OrmError> {
        let started = Instant::now();
        let result = {
            let conn = self.conn.lock();
            conn.execute(sql, rusqlite::params_from_iter(params.iter()))
        };
        self.observe(sql, params, started);
        Ok(result?)
    }

    /// 执行 INSERT，返回新行 id
    pub fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<i64, OrmError> {
        let started = Instant::now();
        let result = {
            let conn = self.conn.lock();
            conn.execute(sql, rusqlite::params_from_iter(params.iter()))
                .map(|_| conn.last_insert_rowid())
        };
        self.observe(sql, params, started);
        Ok(result?)
    }

    /// 执行查询并映射每一行
    pub fn query<T, F>(&self, sql: &str, params: &[SqlValue], mut map: F) -> Result<Vec<T>, OrmError>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let started = Instant::now();
        let result = {
            let conn = self.conn.lock();
            conn.prepare(sql).and_then(|mut stmt| {
                stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| map(row))?
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
        };
        self.observe(sql, params, started);
        Ok(result?)
    }

    /// 执行多条语句（建表、迁移脚本）
    pub fn execute_batch(&self, sql: &str) -> Result<(), OrmError> {
        let started = Instant::now();
        let result = self.conn.lock().execute_batch(sql);
        self.observe(sql, &[], started);
        Ok(result?)
    }

    /// 在事务中执行闭包，闭包返回错误时回滚
    pub fn transaction<R, F>(&self, f: F) -> Result<R, OrmError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<R, OrmError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// 查询现有表的列（表不存在时返回空）
    pub fn table_columns(&self, table: &str) -> Result<Vec<ExistingColumn>, OrmError> {
        let conn = self.conn.lock();
        let mut index_stmt = conn.prepare(
            "SELECT ii.name FROM pragma_index_list(?1) AS il, pragma_index_info(il.name) AS ii \
             WHERE il.\"unique\" = 1 AND il.origin != 'pk'",
        )?;
        let unique_columns = index_stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT name, type, \"notnull\", dflt_value FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([table], |row| {
                let name: String = row.get(0)?;
                Ok(ExistingColumn {
                    unique: unique_columns.contains(&name),
                    name,
                    sql_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }
}

/// 数据库中已存在的列
#[derive(Debug, Clone)]
pub struct ExistingColumn {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    /// 带唯一约束或唯一索引
    pub unique: bool,
    pub default: Option<String>,
}

impl ExistingColumn {
    /// 建表语句中的列定义
    pub fn definition(&self) -> String {
        let mut def = format!("\"{}\" {}", self.name, self.sql_type);
        if self.not_null {
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

    /// 把列加回已有数据的表时使用的定义
    ///
    /// 与 [`Column::add_column_definition`](super::entity::Column::add_column_definition) 一致，
    /// 无默认值的 NOT NULL 列补上类型零值
    pub fn add_column_definition(&self) -> String {
        let mut column = self.clone();
        column.unique = false;
        if column.not_null && column.default.is_none() {
            column.default = Some(self.column_type().zero_default().to_string());
        }
        column.definition()
    }

    /// 重建表恢复该列时的填充表达式
    ///
    /// 唯一且非空的列以 `id` 填充，避免多行取同一零值而冲突
    pub fn restore_expr(&self) -> String {
        if let Some(default) = &self.default {
            return default.clone();
        }
        if !self.not_null {
            return "NULL".to_string();
        }
        match (self.unique, self.column_type()) {
            (true, ColumnType::Integer | ColumnType::Boolean | ColumnType::Real) => "\"id\"".to_string(),
            (true, _) => "CAST(\"id\" AS TEXT)".to_string(),
            (false, column_type) => column_type.zero_default().to_string(),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        ColumnType::from_sql_type(&self.sql_type)
    }
}

/// 实体管理器
#[derive(Clone)]
pub struct EntityManager {
    db: Database,
}

impl EntityManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn repository<T: Entity>(&self) -> Repository<T> {
        Repository::new(self.db.clone())
    }

    /// 为所有实体建表（已存在的表跳过）
    pub fn create_schema(&self, schemas: &[TableSchema]) -> Result<(), OrmError> {
        for schema in schemas {
            self.db.execute_batch(&schema.create_table_sql(true))?;
            tracing::info!("数据表已就绪: {}", schema.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var/nested/app.db");
        let url = format!("sqlite:{}", path.display());
        let db = Database::open(&url, true).unwrap();
        db.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_insert_and_query() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);")
            .unwrap();
        let id = db.insert("INSERT INTO t (name) VALUES (?1)", &[SqlValue::Text("a".into())]).unwrap();
        assert_eq!(id, 1);
        let names = db
            .query("SELECT name FROM t WHERE id = ?1", &[SqlValue::Integer(id)], |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();
        let result: Result<(), OrmError> = db.transaction(|tx| {
            tx.execute("INSERT INTO t (x) VALUES (1)", [])?;
            Err(OrmError::Migration("abort".into()))
        });
        assert!(result.is_err());
        let count = db.query("SELECT COUNT(*) FROM t", &[], |row| row.get::<_, i64>(0)).unwrap();
        assert_eq!(count, vec![0]);
    }

    #[test]
    fn test_table_columns() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.table_columns("missing").unwrap().is_empty());
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT 'x');")
            .unwrap();
        let columns = db.table_columns("t").unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].definition(), "\"name\" TEXT NOT NULL DEFAULT 'x'");

        db.execute_batch(
            "CREATE TABLE u (id INTEGER PRIMARY KEY, slug TEXT NOT NULL UNIQUE, body TEXT NOT NULL, n INTEGER);
             CREATE UNIQUE INDEX uniq_u_n ON u (n);",
        )
        .unwrap();
        let columns = db.table_columns("u").unwrap();
        let flags: Vec<(&str, bool)> = columns.iter().map(|c| (c.name.as_str(), c.unique)).collect();
        assert_eq!(flags, vec![("id", false), ("slug", true), ("body", false), ("n", true)]);
        assert_eq!(columns[1].definition(), "\"slug\" TEXT NOT NULL UNIQUE");
        assert_eq!(columns[2].add_column_definition(), "\"body\" TEXT NOT NULL DEFAULT ''");
        assert_eq!(columns[1].restore_expr(), "CAST(\"id\" AS TEXT)");
        assert_eq!(columns[3].restore_expr(), "NULL");
    }
}
