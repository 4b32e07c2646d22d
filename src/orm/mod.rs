//! ORM 层
//!
//! 基于 rusqlite 的实体映射、仓库、查询条件与迁移

mod criteria;
mod database;
mod entity;
mod migration;
mod repository;

pub use criteria::{Criteria, Direction, Operator};
pub use database::{Database, EntityManager, ExistingColumn, OrmError};
pub use entity::{Column, ColumnType, Entity, SqlValue, TableSchema};
pub use migration::{Migration, MigrationManager, MigrationStatus};
pub use repository::Repository;
/// 实体 `from_row` 需要的 rusqlite 类型
pub use rusqlite;
