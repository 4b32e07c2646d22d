//! 实体仓库

use std::marker::PhantomData;

use super::criteria::Criteria;
use super::database::{Database, OrmError};
use super::entity::{Entity, SqlValue, TableSchema};

/// 单个实体类型的仓库
pub struct Repository<T: Entity> {
    db: Database,
    schema: TableSchema,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            schema: T::schema(),
            _entity: PhantomData,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT {} FROM \"{}\"",
            self.schema.select_list(),
            self.schema.name
        )
    }

    /// 按主键查找
    pub fn find(&self, id: i64) -> Result<Option<T>, OrmError> {
        let sql = format!("{} WHERE \"id\" = ?1", self.select_sql());
        let mut rows = self.db.query(&sql, &[SqlValue::Integer(id)], T::from_row)?;
        Ok(rows.pop())
    }

    /// 按主键查找，不存在时返回 `OrmError::NotFound`（处理器中映射为 404）
    pub fn find_or_fail(&self, id: i64) -> Result<T, OrmError> {
        self.find(id)?.ok_or_else(|| OrmError::NotFound {
            table: self.schema.name.clone(),
            id,
        })
    }

    pub fn find_all(&self) -> Result<Vec<T>, OrmError> {
        self.find_by(Criteria::new())
    }

    pub fn find_by(&self, criteria: Criteria) -> Result<Vec<T>, OrmError> {
        let (suffix, params) = criteria.to_sql(&self.schema)?;
        let sql = format!("{}{}", self.select_sql(), suffix);
        self.db.query(&sql, &params, T::from_row)
    }

    pub fn find_one_by(&self, criteria: Criteria) -> Result<Option<T>, OrmError> {
        Ok(self.find_by(criteria.limit(1))?.into_iter().next())
    }

    pub fn count(&self, criteria: Criteria) -> Result<u64, OrmError> {
        let (where_sql, params) = criteria.where_clause(&self.schema)?;
        let sql = format!("SELECT COUNT(*) FROM \"{}\"{}", self.schema.name, where_sql);
        let counts = self.db.query(&sql, &params, |row| row.get::<_, i64>(0))?;
        Ok(counts.first().copied().unwrap_or(0) as u64)
    }

    /// 保存实体：无 id 时插入并回填 id，否则更新
    pub fn persist(&self, entity: &mut T) -> Result<(), OrmError> {
        let values = entity.to_values();
        for (column, _) in &values {
            if !self.schema.has_column(column) {
                return Err(OrmError::UnknownColumn {
                    table: self.schema.name.clone(),
                    column: column.to_string(),
                });
            }
        }

        match entity.id() {
            None => {
                let columns: Vec<String> = values.iter().map(|(c, _)| format!("\"{}\"", c)).collect();
                let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{}", i)).collect();
                let sql = if values.is_empty() {
                    format!("INSERT INTO \"{}\" DEFAULT VALUES", self.schema.name)
                } else {
                    format!(
                        "INSERT INTO \"{}\" ({}) VALUES ({})",
                        self.schema.name,
                        columns.join(", "),
                        placeholders.join(", ")
                    )
                };
                let params: Vec<SqlValue> = values.into_iter().map(|(_, v)| v).collect();
                let id = self.db.insert(&sql, &params)?;
                entity.set_id(id);
                tracing::debug!("{} #{} 已创建", self.schema.name, id);
            }
            Some(id) => {
                if values.is_empty() {
                    return Ok(());
                }
                let assignments: Vec<String> = values
                    .iter()
                    .enumerate()
                    .map(|(i, (c, _))| format!("\"{}\" = ?{}", c, i + 1))
                    .collect();
                let sql = format!(
                    "UPDATE \"{}\" SET {} WHERE \"id\" = ?{}",
                    self.schema.name,
                    assignments.join(", "),
                    values.len() + 1
                );
                let mut params: Vec<SqlValue> = values.into_iter().map(|(_, v)| v).collect();
                params.push(SqlValue::Integer(id));
                let affected = self.db.execute(&sql, &params)?;
                if affected == 0 {
                    return Err(OrmError::NotFound {
                        table: self.schema.name.clone(),
                        id,
                    });
                }
            }
        }
        Ok(())
    }

    /// 删除实体，返回是否确实删除了一行
    pub fn remove(&self, entity: &T) -> Result<bool, OrmError> {
        let id = entity.id().ok_or(OrmError::MissingId)?;
        let sql = format!("DELETE FROM \"{}\" WHERE \"id\" = ?1", self.schema.name);
        let affected = self.db.execute(&sql, &[SqlValue::Integer(id)])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::orm::criteria::Direction;
    use crate::orm::database::EntityManager;
    use crate::orm::entity::{Column, ColumnType};

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Game {
        pub id: Option<i64>,
        pub title: String,
        pub score: i64,
        pub notes: Option<String>,
    }

    impl Entity for Game {
        fn table_name() -> &'static str {
            "game"
        }

        fn columns() -> Vec<Column> {
            vec![
                Column::new("title", ColumnType::Text).unique(),
                Column::new("score", ColumnType::Integer).default_value("0"),
                Column::new("notes", ColumnType::Text).nullable(),
            ]
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn to_values(&self) -> Vec<(&'static str, SqlValue)> {
            vec![
                ("title", SqlValue::Text(self.title.clone())),
                ("score", SqlValue::Integer(self.score)),
                ("notes", self.notes.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null)),
            ]
        }

        fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                title: row.get("title")?,
                score: row.get("score")?,
                notes: row.get("notes")?,
            })
        }
    }

    pub(crate) fn game(title: &str, score: i64) -> Game {
        Game {
            id: None,
            title: title.to_string(),
            score,
            notes: None,
        }
    }

    fn manager() -> EntityManager {
        let em = EntityManager::new(Database::open_in_memory().unwrap());
        em.create_schema(&[Game::schema()]).unwrap();
        em
    }

    #[test]
    fn test_persist_find_update_remove() {
        let em = manager();
        let repo = em.repository::<Game>();

        let mut g = game("Zelda", 10);
        repo.persist(&mut g).unwrap();
        assert_eq!(g.id, Some(1));

        let loaded = repo.find(1).unwrap().unwrap();
        assert_eq!(loaded, g);

        g.score = 99;
        g.notes = Some("classic".to_string());
        repo.persist(&mut g).unwrap();
        assert_eq!(repo.find_or_fail(1).unwrap().score, 99);

        assert!(repo.remove(&g).unwrap());
        assert!(repo.find(1).unwrap().is_none());
        assert!(matches!(repo.find_or_fail(1), Err(OrmError::NotFound { id: 1, .. })));
    }

    #[test]
    fn test_find_by_and_count() {
        let em = manager();
        let repo = em.repository::<Game>();
        for (title, score) in [("A", 1), ("B", 5), ("C", 9)] {
            repo.persist(&mut game(title, score)).unwrap();
        }

        let top = repo
            .find_by(
                Criteria::new()
                    .filter("score", crate::orm::criteria::Operator::Gt, 2)
                    .order_by("score", Direction::Desc),
            )
            .unwrap();
        assert_eq!(top.iter().map(|g| g.title.as_str()).collect::<Vec<_>>(), vec!["C", "B"]);

        assert_eq!(repo.count(Criteria::new()).unwrap(), 3);
        assert_eq!(repo.count(Criteria::new().like("title", "A%")).unwrap(), 1);
        let first = repo.find_one_by(Criteria::new().eq("title", "B".to_string())).unwrap();
        assert_eq!(first.unwrap().score, 5);
    }

    #[test]
    fn test_update_missing_row_is_not_found() {
        let em = manager();
        let repo = em.repository::<Game>();
        let mut ghost = game("ghost", 0);
        ghost.id = Some(42);
        assert!(matches!(repo.persist(&mut ghost), Err(OrmError::NotFound { id: 42, .. })));
        assert!(matches!(repo.remove(&game("x", 0)), Err(OrmError::MissingId)));
    }

    #[test]
    fn test_unique_violation_surfaces_as_error() {
        let em = manager();
        let repo = em.repository::<Game>();
        repo.persist(&mut game("dup", 1)).unwrap();
        assert!(matches!(repo.persist(&mut game("dup", 2)), Err(OrmError::Sqlite(_))));
    }
}
