use framefox::orm::rusqlite::{self, Row};
use framefox::orm::{Column, ColumnType, Entity, EntityManager, Repository, SqlValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct {{ pascal }} {
    pub id: Option<i64>,
{%- for field in fields %}
    pub {{ field.name }}: {{ field.rust_type }},
{%- endfor %}
}

impl {{ pascal }} {
    pub fn repository(em: &EntityManager) -> Repository<Self> {
        em.repository()
    }
}

impl Entity for {{ pascal }} {
    fn table_name() -> &'static str {
        "{{ table }}"
    }

    fn columns() -> Vec<Column> {
        vec![
{%- for field in fields %}
            Column::new("{{ field.name }}", ColumnType::{{ field.column_type }}){% if field.nullable %}.nullable(){% endif %}{% if field.unique %}.unique(){% endif %},
{%- endfor %}
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
{%- for field in fields %}
            ("{{ field.name }}", SqlValue::from(self.{{ field.name }}.clone())),
{%- endfor %}
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
{%- for field in fields %}
            {{ field.name }}: row.get("{{ field.name }}")?,
{%- endfor %}
        })
    }
}
