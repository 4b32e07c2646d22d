//! 查询条件构造
//!
//! 列名只能来自实体表结构，值全部走参数绑定

use super::database::OrmError;
use super::entity::{SqlValue, TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
struct Filter {
    column: String,
    operator: Operator,
    value: Option<SqlValue>,
}

/// 查询条件
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    filters: Vec<Filter>,
    order: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: &str, operator: Operator, value: impl Into<SqlValue>) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            operator,
            value: Some(value.into()),
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.filter(column, Operator::Eq, value)
    }

    pub fn like(self, column: &str, pattern: impl Into<String>) -> Self {
        self.filter(column, Operator::Like, pattern.into())
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            operator: Operator::IsNull,
            value: None,
        });
        self
    }

    pub fn is_not_null(mut self, column: &str) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            operator: Operator::IsNotNull,
            value: None,
        });
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn check_column(schema: &TableSchema, column: &str) -> Result<(), OrmError> {
        if schema.has_column(column) {
            Ok(())
        } else {
            Err(OrmError::UnknownColumn {
                table: schema.name.clone(),
                column: column.to_string(),
            })
        }
    }

    /// 生成 WHERE 子句与参数
    pub(crate) fn where_clause(&self, schema: &TableSchema) -> Result<(String, Vec<SqlValue>), OrmError> {
        let mut clauses = Vec::with_capacity(self.filters.len());
        let mut params = Vec::new();
        for filter in &self.filters {
            Self::check_column(schema, &filter.column)?;
            match &filter.value {
                Some(value) if !matches!(filter.operator, Operator::IsNull | Operator::IsNotNull) => {
                    params.push(value.clone());
                    clauses.push(format!(
                        "\"{}\" {} ?{}",
                        filter.column,
                        filter.operator.sql(),
                        params.len()
                    ));
                }
                _ => clauses.push(format!("\"{}\" {}", filter.column, filter.operator.sql())),
            }
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, params))
    }

    /// 生成完整的 WHERE/ORDER BY/LIMIT 后缀
    pub(crate) fn to_sql(&self, schema: &TableSchema) -> Result<(String, Vec<SqlValue>), OrmError> {
        let (mut sql, params) = self.where_clause(schema)?;

        if !self.order.is_empty() {
            let mut parts = Vec::with_capacity(self.order.len());
            for (column, direction) in &self.order {
                Self::check_column(schema, column)?;
                let dir = match direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                parts.push(format!("\"{}\" {}", column, dir));
            }
            sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        Ok((sql, params))
    }
}
