//! 数据库命令

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;

use crate::orm::{Database, EntityManager, MigrationManager, TableSchema};

/// 为已注册实体建表
pub fn create(db: &Database, schemas: &[TableSchema]) -> anyhow::Result<String> {
    if schemas.is_empty() {
        return Ok("没有已注册的实体".to_string());
    }
    EntityManager::new(db.clone())
        .create_schema(schemas)
        .context("建表失败")?;
    Ok(format!("已创建 {} 张数据表", schemas.len()))
}

pub fn create_migration(
    db: &Database,
    dir: &Path,
    schemas: &[TableSchema],
    name: &str,
) -> anyhow::Result<String> {
    let manager = MigrationManager::new(db.clone(), dir)?;
    Ok(match manager.generate(schemas, name)? {
        Some(path) => format!("已生成迁移: {}", path.display()),
        None => "实体结构与数据库一致，无需迁移".to_string(),
    })
}

pub fn upgrade(db: &Database, dir: &Path) -> anyhow::Result<String> {
    let applied = MigrationManager::new(db.clone(), dir)?.upgrade()?;
    if applied.is_empty() {
        return Ok("没有待执行的迁移".to_string());
    }
    let mut out = String::new();
    for migration in &applied {
        let _ = writeln!(out, "已执行 V{} {}", migration.version, migration.name);
    }
    Ok(out.trim_end().to_string())
}

pub fn downgrade(db: &Database, dir: &Path, steps: usize) -> anyhow::Result<String> {
    let reverted = MigrationManager::new(db.clone(), dir)?.downgrade(steps)?;
    if reverted.is_empty() {
        return Ok("没有可回滚的迁移".to_string());
    }
    let mut out = String::new();
    for migration in &reverted {
        let _ = writeln!(out, "已回滚 V{} {}", migration.version, migration.name);
    }
    Ok(out.trim_end().to_string())
}

pub fn status(db: &Database, dir: &Path) -> anyhow::Result<String> {
    let statuses = MigrationManager::new(db.clone(), dir)?.status()?;
    if statuses.is_empty() {
        return Ok(format!("迁移目录为空: {}", dir.display()));
    }
    let mut out = format!("{:<16} {:<10} {:<26} {}\n", "VERSION", "STATE", "APPLIED AT", "NAME");
    for status in &statuses {
        let _ = writeln!(
            out,
            "{:<16} {:<10} {:<26} {}",
            status.version,
            if status.applied { "applied" } else { "pending" },
            status.applied_at.as_deref().unwrap_or("-"),
            status.name
        );
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::{Column, ColumnType};

    fn schemas() -> Vec<TableSchema> {
        vec![TableSchema::new(
            "game",
            vec![Column::new("title", ColumnType::Text)],
        )]
    }

    #[test]
    fn test_create_tables() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(create(&db, &[]).unwrap(), "没有已注册的实体");
        assert_eq!(create(&db, &schemas()).unwrap(), "已创建 1 张数据表");
        assert_eq!(db.table_columns("game").unwrap().len(), 2);
    }

    #[test]
    fn test_migration_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();

        assert!(status(&db, dir.path()).unwrap().starts_with("迁移目录为空"));
        let generated = create_migration(&db, dir.path(), &schemas(), "add game").unwrap();
        assert!(generated.starts_with("已生成迁移"));

        let report = status(&db, dir.path()).unwrap();
        assert!(report.contains("pending"));
        assert!(upgrade(&db, dir.path()).unwrap().starts_with("已执行 V"));
        assert_eq!(upgrade(&db, dir.path()).unwrap(), "没有待执行的迁移");
        assert_eq!(
            create_migration(&db, dir.path(), &schemas(), "noop").unwrap(),
            "实体结构与数据库一致，无需迁移"
        );

        assert!(downgrade(&db, dir.path(), 1).unwrap().starts_with("已回滚 V"));
        assert!(db.table_columns("game").unwrap().is_empty());
        assert_eq!(downgrade(&db, dir.path(), 1).unwrap(), "没有可回滚的迁移");
    }
}
