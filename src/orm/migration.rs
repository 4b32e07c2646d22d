//! 数据库迁移
//!
//! 迁移文件命名为 `V<版本>__<名称>.sql`，内容分为 `-- migrate:up` 与
//! `-- migrate:down` 两段；已执行的版本记录在 `_migrations` 表中。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use super::database::{Database, ExistingColumn, OrmError};
use super::entity::TableSchema;

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";
const MIGRATIONS_TABLE: &str = "_migrations";

/// 迁移文件
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u64,
    pub name: String,
    pub path: PathBuf,
    pub up: String,
    pub down: String,
}

/// 迁移状态（`database status` 输出）
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: u64,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<String>,
}

/// 迁移管理器
pub struct MigrationManager {
    db: Database,
    dir: PathBuf,
}

impl MigrationManager {
    pub fn new(db: Database, dir: impl Into<PathBuf>) -> Result<Self, OrmError> {
        db.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );",
            MIGRATIONS_TABLE
        ))?;
        Ok(Self {
            db,
            dir: dir.into(),
        })
    }

    /// 读取迁移目录中的所有迁移（按版本排序）
    pub fn load_migrations(&self) -> anyhow::Result<Vec<Migration>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut migrations = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("读取迁移目录失败: {}", self.dir.display()))?
        {
            let path = entry?.path();
            let Some((version, name)) = parse_file_name(&path) else {
                continue;
            };
            let content = fs::read_to_string(&path)
                .with_context(|| format!("读取迁移文件失败: {}", path.display()))?;
            let (up, down) = split_sections(&content);
            migrations.push(Migration {
                version,
                name,
                path,
                up,
                down,
            });
        }
        migrations.sort_by_key(|m| m.version);
        Ok(migrations)
    }

    /// 已执行的版本 -> 执行时间
    fn applied(&self) -> Result<Vec<(u64, String, String)>, OrmError> {
        self.db.query(
            &format!(
                "SELECT version, name, applied_at FROM \"{}\" ORDER BY version",
                MIGRATIONS_TABLE
            ),
            &[],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get(1)?, row.get(2)?)),
        )
    }

    pub fn status(&self) -> anyhow::Result<Vec<MigrationStatus>> {
        let applied = self.applied()?;
        let mut statuses: Vec<MigrationStatus> = self
            .load_migrations()?
            .into_iter()
            .map(|m| {
                let record = applied.iter().find(|(v, _, _)| *v == m.version);
                MigrationStatus {
                    version: m.version,
                    name: m.name,
                    applied: record.is_some(),
                    applied_at: record.map(|(_, _, at)| at.clone()),
                }
            })
            .collect();

        // 已执行但文件已删除的迁移也要列出
        for (version, name, at) in &applied {
            if !statuses.iter().any(|s| s.version == *version) {
                statuses.push(MigrationStatus {
                    version: *version,
                    name: name.clone(),
                    applied: true,
                    applied_at: Some(at.clone()),
                });
            }
        }
        statuses.sort_by_key(|s| s.version);
        Ok(statuses)
    }

    pub fn pending(&self) -> anyhow::Result<Vec<Migration>> {
        let applied = self.applied()?;
        Ok(self
            .load_migrations()?
            .into_iter()
            .filter(|m| !applied.iter().any(|(v, _, _)| *v == m.version))
            .collect())
    }

    /// 对比实体结构与数据库，生成迁移文件
    ///
    /// 没有差异时返回 `None`
    pub fn generate(&self, schemas: &[TableSchema], name: &str) -> anyhow::Result<Option<PathBuf>> {
        if !self.pending()?.is_empty() {
            anyhow::bail!("存在未执行的迁移，请先运行 database upgrade");
        }

        let mut up = Vec::new();
        let mut down = Vec::new();

        for schema in schemas {
            let existing = self.db.table_columns(&schema.name)?;
            if existing.is_empty() {
                up.push(schema.create_table_sql(false));
                down.push(format!("DROP TABLE \"{}\";", schema.name));
                continue;
            }
            let (table_up, table_down) = diff_table(schema, &existing);
            up.extend(table_up);
            down.extend(table_down);
        }

        if up.is_empty() {
            return Ok(None);
        }

        // down 以相反顺序撤销
        down.reverse();

        let version = self.next_version()?;
        let file_name = format!("V{}__{}.sql", version, crate::common::to_snake_case(name));
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("创建迁移目录失败: {}", self.dir.display()))?;
        let path = self.dir.join(file_name);
        let content = format!(
            "{}\n{}\n\n{}\n{}\n",
            UP_MARKER,
            up.join("\n"),
            DOWN_MARKER,
            down.join("\n")
        );
        fs::write(&path, content).with_context(|| format!("写入迁移文件失败: {}", path.display()))?;
        tracing::info!("已生成迁移: {}", path.display());
        Ok(Some(path))
    }

    /// 基于当前时间的版本号，保证严格递增
    fn next_version(&self) -> anyhow::Result<u64> {
        let now: u64 = Utc::now().format("%Y%m%d%H%M%S").to_string().parse()?;
        let last = self.load_migrations()?.last().map(|m| m.version).unwrap_or(0);
        Ok(now.max(last + 1))
    }

    /// 按版本顺序执行所有未执行的迁移（每个迁移一个事务）
    pub fn upgrade(&self) -> anyhow::Result<Vec<Migration>> {
        let pending = self.pending()?;
        for migration in &pending {
            self.db
                .transaction(|tx| {
                    tx.execute_batch(&migration.up)?;
                    tx.execute(
                        &format!(
                            "INSERT INTO \"{}\" (version, name, applied_at) VALUES (?1, ?2, ?3)",
                            MIGRATIONS_TABLE
                        ),
                        rusqlite::params![migration.version as i64, migration.name, Utc::now().to_rfc3339()],
                    )?;
                    Ok(())
                })
                .with_context(|| format!("执行迁移失败: V{}__{}", migration.version, migration.name))?;
            tracing::info!("已执行迁移 V{}__{}", migration.version, migration.name);
        }
        Ok(pending)
    }

    /// 回滚最近执行的 `steps` 个迁移
    pub fn downgrade(&self, steps: usize) -> anyhow::Result<Vec<Migration>> {
        let applied = self.applied()?;
        let files = self.load_migrations()?;
        let mut reverted = Vec::new();

        for (version, name, _) in applied.iter().rev().take(steps) {
            let migration = files
                .iter()
                .find(|m| m.version == *version)
                .ok_or_else(|| anyhow::anyhow!("找不到迁移文件: V{}__{}", version, name))?;
            self.db
                .transaction(|tx| {
                    if !migration.down.trim().is_empty() {
                        tx.execute_batch(&migration.down)?;
                    }
                    tx.execute(
                        &format!("DELETE FROM \"{}\" WHERE version = ?1", MIGRATIONS_TABLE),
                        [*version as i64],
                    )?;
                    Ok(())
                })
                .with_context(|| format!("回滚迁移失败: V{}__{}", version, name))?;
            tracing::info!("已回滚迁移 V{}__{}", version, name);
            reverted.push(migration.clone());
        }
        Ok(reverted)
    }
}

/// 单张已存在表的 up / down 语句（down 按正序排列，由调用方整体反转）
fn diff_table(schema: &TableSchema, existing: &[ExistingColumn]) -> (Vec<String>, Vec<String>) {
    let table = &schema.name;
    let existing: Vec<&ExistingColumn> = existing.iter().filter(|c| c.name != "id").collect();
    let added: Vec<_> = schema
        .columns
        .iter()
        .filter(|c| !existing.iter().any(|e| e.name == c.name))
        .collect();
    let removed: Vec<&ExistingColumn> = existing
        .iter()
        .copied()
        .filter(|e| !schema.columns.iter().any(|c| c.name == e.name))
        .collect();

    // SQLite 不能 DROP 带唯一约束或索引的列，只能重建表
    if removed.iter().any(|c| c.unique) {
        let up_defs: Vec<String> = schema
            .columns
            .iter()
            .map(|c| {
                let mut column = c.clone();
                column.unique = false;
                column.definition()
            })
            .collect();
        let up_unique: Vec<&str> = schema
            .columns
            .iter()
            .filter(|c| c.unique)
            .map(|c| c.name.as_str())
            .collect();
        let up_fill: Vec<(String, String)> = schema
            .columns
            .iter()
            .map(|c| {
                let source = if existing.iter().any(|e| e.name == c.name) {
                    format!("\"{}\"", c.name)
                } else {
                    c.fill_expr()
                };
                (c.name.clone(), source)
            })
            .collect();

        let down_defs: Vec<String> = existing
            .iter()
            .map(|c| {
                let mut column = (*c).clone();
                column.unique = false;
                column.definition()
            })
            .collect();
        let down_unique: Vec<&str> = existing
            .iter()
            .filter(|c| c.unique)
            .map(|c| c.name.as_str())
            .collect();
        let down_fill: Vec<(String, String)> = existing
            .iter()
            .map(|c| {
                let source = if removed.iter().any(|r| r.name == c.name) {
                    c.restore_expr()
                } else {
                    format!("\"{}\"", c.name)
                };
                (c.name.clone(), source)
            })
            .collect();

        return (
            vec![rebuild_table_sql(table, &up_defs, &up_unique, &up_fill)],
            vec![rebuild_table_sql(table, &down_defs, &down_unique, &down_fill)],
        );
    }

    let mut up = Vec::new();
    let mut down = Vec::new();
    for column in added {
        up.push(format!(
            "ALTER TABLE \"{}\" ADD COLUMN {};",
            table,
            column.add_column_definition()
        ));
        down.push(format!("ALTER TABLE \"{}\" DROP COLUMN \"{}\";", table, column.name));
        if let Some(index) = column.unique_index_sql(table) {
            up.push(index);
            down.push(format!("DROP INDEX IF EXISTS \"{}\";", column.unique_index_name(table)));
        }
    }
    for column in removed {
        up.push(format!("ALTER TABLE \"{}\" DROP COLUMN \"{}\";", table, column.name));
        down.push(format!(
            "ALTER TABLE \"{}\" ADD COLUMN {};",
            table,
            column.add_column_definition()
        ));
    }
    (up, down)
}

/// 新建临时表、复制数据、删除旧表再改名，最后补建唯一索引
///
/// `fill` 为 `(目标列, 来源表达式)`，表达式在旧表上求值。唯一约束统一以
/// `uniq_<表>_<列>` 索引表示，与 ADD COLUMN 生成的索引同名
fn rebuild_table_sql(
    table: &str,
    definitions: &[String],
    unique: &[&str],
    fill: &[(String, String)],
) -> String {
    let temp = format!("_{}_rebuild", table);
    let columns = std::iter::once("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string())
        .chain(definitions.iter().cloned())
        .collect::<Vec<_>>()
        .join(",\n    ");
    let targets = std::iter::once("\"id\"".to_string())
        .chain(fill.iter().map(|(name, _)| format!("\"{}\"", name)))
        .collect::<Vec<_>>()
        .join(", ");
    let sources = std::iter::once("\"id\"".to_string())
        .chain(fill.iter().map(|(_, source)| source.clone()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "CREATE TABLE \"{temp}\" (\n    {columns}\n);\n\
         INSERT INTO \"{temp}\" ({targets}) SELECT {sources} FROM \"{table}\";\n\
         DROP TABLE \"{table}\";\n\
         ALTER TABLE \"{temp}\" RENAME TO \"{table}\";"
    );
    for column in unique {
        sql.push_str(&format!(
            "\nCREATE UNIQUE INDEX \"uniq_{table}_{column}\" ON \"{table}\" (\"{column}\");"
        ));
    }
    sql
}

fn parse_file_name(path: &Path) -> Option<(u64, String)> {
    if path.extension().and_then(|e| e.to_str()) != Some("sql") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let rest = stem.strip_prefix('V')?;
    let (version, name) = rest.split_once("__")?;
    Some((version.parse().ok()?, name.to_string()))
}

fn split_sections(content: &str) -> (String, String) {
    let mut up = String::new();
    let mut down = String::new();
    // None: 标记之前的内容（忽略）
    let mut in_up: Option<bool> = None;
    for line in content.lines() {
        match line.trim() {
            UP_MARKER => in_up = Some(true),
            DOWN_MARKER => in_up = Some(false),
            _ => {
                let buf = match in_up {
                    Some(true) => &mut up,
                    Some(false) => &mut down,
                    None => continue,
                };
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }
    (up.trim().to_string(), down.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::entity::{Column, ColumnType, Entity};
    use crate::orm::repository::tests::Game;

    fn manager(dir: &Path) -> (Database, MigrationManager) {
        let db = Database::open_in_memory().unwrap();
        let mm = MigrationManager::new(db.clone(), dir.join("migrations")).unwrap();
        (db, mm)
    }

    #[test]
    fn test_split_sections() {
        let (up, down) = split_sections("-- migrate:up\nCREATE TABLE a (x);\n\n-- migrate:down\nDROP TABLE a;\n");
        assert_eq!(up, "CREATE TABLE a (x);");
        assert_eq!(down, "DROP TABLE a;");
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name(Path::new("m/V20260101000000__create_game.sql")),
            Some((20260101000000, "create_game".to_string()))
        );
        assert_eq!(parse_file_name(Path::new("m/readme.md")), None);
        assert_eq!(parse_file_name(Path::new("m/Vabc__x.sql")), None);
    }

    #[test]
    fn test_generate_upgrade_downgrade_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (db, mm) = manager(dir.path());

        let path = mm.generate(&[Game::schema()], "create game").unwrap().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("CREATE TABLE \"game\""));
        assert!(content.contains("DROP TABLE \"game\";"));
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("__create_game.sql"));

        // 未执行前不能再次生成
        assert!(mm.generate(&[Game::schema()], "again").is_err());

        let applied = mm.upgrade().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(db.table_columns("game").unwrap().len(), 4);
        assert!(mm.status().unwrap().iter().all(|s| s.applied));

        // 结构一致时不生成
        assert!(mm.generate(&[Game::schema()], "noop").unwrap().is_none());

        // 新增一列
        let mut schema = Game::schema();
        schema.columns.push(Column::new("rating", ColumnType::Real));
        let path = mm.generate(&[schema], "add rating").unwrap().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("ADD COLUMN \"rating\" REAL NOT NULL DEFAULT 0.0"));
        assert!(content.contains("DROP COLUMN \"rating\""));
        mm.upgrade().unwrap();
        assert_eq!(db.table_columns("game").unwrap().len(), 5);

        let reverted = mm.downgrade(1).unwrap();
        assert_eq!(reverted[0].name, "add_rating");
        assert_eq!(db.table_columns("game").unwrap().len(), 4);
        assert_eq!(mm.pending().unwrap().len(), 1);

        mm.downgrade(5).unwrap();
        assert!(db.table_columns("game").unwrap().is_empty());
    }

    fn post(columns: Vec<Column>) -> TableSchema {
        TableSchema::new("post", columns)
    }

    fn column_names(db: &Database, table: &str) -> Vec<String> {
        db.table_columns(table).unwrap().into_iter().map(|c| c.name).collect()
    }

    #[test]
    fn test_drop_column_downgrade_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (db, mm) = manager(dir.path());

        let title = Column::new("title", ColumnType::Text);
        let body = Column::new("body", ColumnType::Text);
        mm.generate(&[post(vec![title.clone(), body])], "create post").unwrap();
        mm.upgrade().unwrap();
        db.execute("INSERT INTO post (title, body) VALUES ('hello', 'world')", &[])
            .unwrap();

        let path = mm.generate(&[post(vec![title])], "drop body").unwrap().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("ALTER TABLE \"post\" DROP COLUMN \"body\";"));
        assert!(content.contains("ALTER TABLE \"post\" ADD COLUMN \"body\" TEXT NOT NULL DEFAULT '';"));

        mm.upgrade().unwrap();
        assert_eq!(column_names(&db, "post"), vec!["id", "title"]);

        mm.downgrade(1).unwrap();
        assert_eq!(column_names(&db, "post"), vec!["id", "title", "body"]);
        let rows = db
            .query("SELECT title, body FROM post", &[], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .unwrap();
        assert_eq!(rows, vec![("hello".to_string(), String::new())]);
    }

    #[test]
    fn test_drop_unique_column_rebuilds_table() {
        let dir = tempfile::tempdir().unwrap();
        let (db, mm) = manager(dir.path());

        let slug = Column::new("slug", ColumnType::Text).unique();
        let body = Column::new("body", ColumnType::Text);
        mm.generate(&[post(vec![slug, body.clone()])], "create post").unwrap();
        mm.upgrade().unwrap();
        db.execute("INSERT INTO post (slug, body) VALUES ('a', 'first'), ('b', 'second')", &[])
            .unwrap();

        let path = mm.generate(&[post(vec![body])], "drop slug").unwrap().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.contains("DROP COLUMN"));
        assert!(content.contains("ALTER TABLE \"_post_rebuild\" RENAME TO \"post\";"));

        mm.upgrade().unwrap();
        assert_eq!(column_names(&db, "post"), vec!["id", "body"]);
        let bodies = db
            .query("SELECT body FROM post ORDER BY id", &[], |r| r.get::<_, String>(0))
            .unwrap();
        assert_eq!(bodies, vec!["first", "second"]);

        // 回滚后唯一约束恢复，两行各自得到不同的填充值
        mm.downgrade(1).unwrap();
        let columns = db.table_columns("post").unwrap();
        assert!(columns.iter().any(|c| c.name == "slug" && c.unique));
        let slugs = db
            .query("SELECT slug FROM post ORDER BY id", &[], |r| r.get::<_, String>(0))
            .unwrap();
        assert_eq!(slugs, vec!["1", "2"]);
        assert!(mm.generate(&[post(vec![
            Column::new("slug", ColumnType::Text).unique(),
            Column::new("body", ColumnType::Text),
        ])], "noop")
        .unwrap()
        .is_none());
    }

    #[test]
    fn test_added_unique_column_gets_index() {
        let dir = tempfile::tempdir().unwrap();
        let (db, mm) = manager(dir.path());

        let title = Column::new("title", ColumnType::Text);
        mm.generate(&[post(vec![title.clone()])], "create post").unwrap();
        mm.upgrade().unwrap();
        db.execute("INSERT INTO post (title) VALUES ('a'), ('b')", &[]).unwrap();

        let code = Column::new("code", ColumnType::Text).nullable().unique();
        let path = mm
            .generate(&[post(vec![title.clone(), code])], "add code")
            .unwrap()
            .unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("CREATE UNIQUE INDEX \"uniq_post_code\" ON \"post\" (\"code\");"));
        assert!(content.contains("DROP INDEX IF EXISTS \"uniq_post_code\";"));

        mm.upgrade().unwrap();
        db.execute("UPDATE post SET code = 'x' WHERE title = 'a'", &[]).unwrap();
        assert!(db.execute("UPDATE post SET code = 'x' WHERE title = 'b'", &[]).is_err());

        // 唯一索引列同样走重建
        mm.generate(&[post(vec![title])], "drop code").unwrap();
        mm.upgrade().unwrap();
        assert_eq!(column_names(&db, "post"), vec!["id", "title"]);

        mm.downgrade(2).unwrap();
        assert_eq!(column_names(&db, "post"), vec!["id", "title"]);
        assert_eq!(mm.pending().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, mm) = manager(dir.path());
        let migrations = dir.path().join("migrations");
        fs::create_dir_all(&migrations).unwrap();
        fs::write(
            migrations.join("V1__broken.sql"),
            "-- migrate:up\nCREATE TABLE ok (x INTEGER);\nNOT SQL;\n-- migrate:down\n",
        )
        .unwrap();
        assert!(mm.upgrade().is_err());
        assert_eq!(mm.pending().unwrap().len(), 1);
    }
}
