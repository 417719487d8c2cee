use std::fmt;

use crate::queries::{
    error::{QueryError, QueryResult},
    executor::SqlExecutor,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Serial,
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Real,
    DoublePrecision,
    Varchar,
    Text,
    Boolean,
    Date,
    Timestamp,
    TimestampTz,
    Jsonb,
    Geometry,
    Other(String),
}

impl ColumnKind {
    pub fn from_sql(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "serial" | "serial4" | "bigserial" | "serial8" => Self::Serial,
            "smallint" | "int2" => Self::SmallInt,
            "integer" | "int" | "int4" => Self::Integer,
            "bigint" | "int8" => Self::BigInt,
            "numeric" | "decimal" => Self::Numeric,
            "real" | "float4" => Self::Real,
            "double precision" | "float8" => Self::DoublePrecision,
            "varchar" | "character varying" | "char" | "character" | "bpchar" => Self::Varchar,
            "text" => Self::Text,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "timestamp" | "timestamp without time zone" => Self::Timestamp,
            "timestamptz" | "timestamp with time zone" => Self::TimestampTz,
            "jsonb" | "json" => Self::Jsonb,
            "geometry" => Self::Geometry,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Serial => "serial",
            Self::SmallInt => "smallint",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Numeric => "numeric",
            Self::Real => "real",
            Self::DoublePrecision => "double precision",
            Self::Varchar => "varchar",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamp with time zone",
            Self::Jsonb => "jsonb",
            Self::Geometry => "geometry",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    /// Name of the table this column references, when it is a foreign key.
    pub references: Option<String>,
}

impl Column {
    pub fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }

    pub fn is_foreign_key_to(&self, table: &Table) -> bool {
        self.references.as_deref() == Some(table.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    primary_key: String,
}

impl Table {
    /// Starts a table with a serial `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: vec![Column {
                name: "id".to_string(),
                kind: ColumnKind::Serial,
                references: None,
            }],
            primary_key: "id".to_string(),
        }
    }

    pub fn from_columns(
        name: impl Into<String>,
        columns: Vec<Column>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: primary_key.into(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(Column {
            name: name.into(),
            kind,
            references: None,
        });
        self
    }

    pub fn foreign_key(mut self, name: impl Into<String>, references: impl Into<String>) -> Self {
        self.columns.push(Column {
            name: name.into(),
            kind: ColumnKind::Integer,
            references: Some(references.into()),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn field_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn field_kinds(&self) -> Vec<ColumnKind> {
        self.columns.iter().map(|c| c.kind.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn get_kind(&self, name: &str) -> QueryResult<ColumnKind> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.kind.clone())
            .ok_or_else(|| QueryError::UnknownField {
                relation: self.name.clone(),
                field: name.to_string(),
            })
    }

    pub fn find_foreign_key_to(&self, relation: &Table) -> QueryResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.is_foreign_key_to(relation))
            .ok_or_else(|| {
                QueryError::ForeignKeyNotFound(format!(
                    "Cannot find foreign key field from {} to {}.",
                    self.name, relation.name
                ))
            })
    }

    pub fn find_foreign_key_with_name(&self, name: &str) -> QueryResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.is_foreign_key() && c.name == name)
            .ok_or_else(|| {
                QueryError::ForeignKeyNotFound(format!(
                    "Cannot find foreign key with name {name}."
                ))
            })
    }

    /// Renders the join of this table (as `alias`) onto `table` (as `table_alias`),
    /// using whichever side holds the foreign key.
    pub fn join_table(&self, alias: &str, table: &Table, table_alias: &str) -> QueryResult<String> {
        if let Ok(field) = table.find_foreign_key_to(self) {
            return Ok(join_expression(
                &self.name,
                alias,
                &self.primary_key,
                table_alias,
                &field.name,
            ));
        }

        let field = self.find_foreign_key_to(table)?;
        Ok(join_expression(
            &self.name,
            alias,
            &field.name,
            table_alias,
            &table.primary_key,
        ))
    }

    pub async fn introspect(executor: &dyn SqlExecutor, table_name: &str) -> QueryResult<Self> {
        let escaped = table_name.replace('\'', "''");
        let column_sql = format!(
            "SELECT c.column_name, c.data_type, c.udt_name, c.column_default, fk.foreign_table_name \
             FROM information_schema.columns c \
             LEFT JOIN ( \
                SELECT kcu.column_name, ccu.table_name AS foreign_table_name \
                FROM information_schema.table_constraints tc \
                JOIN information_schema.key_column_usage kcu \
                  ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                JOIN information_schema.constraint_column_usage ccu \
                  ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
                WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name = '{escaped}' \
             ) fk ON fk.column_name = c.column_name \
             WHERE c.table_name = '{escaped}' AND c.table_schema = current_schema() \
             ORDER BY c.ordinal_position"
        );
        let pk_sql = format!(
            "SELECT kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_name = '{escaped}' \
             ORDER BY kcu.ordinal_position"
        );

        let mut columns = Vec::new();
        for row in executor.fetch_text_rows(&column_sql).await? {
            let Some(Some(name)) = row.first().cloned() else {
                continue;
            };
            let data_type = row.get(1).cloned().flatten().unwrap_or_default();
            let udt_name = row.get(2).cloned().flatten().unwrap_or_default();
            let default = row.get(3).cloned().flatten().unwrap_or_default();
            let references = row.get(4).cloned().flatten();

            let kind = if data_type == "USER-DEFINED" {
                ColumnKind::from_sql(&udt_name)
            } else if default.starts_with("nextval(") {
                ColumnKind::Serial
            } else {
                ColumnKind::from_sql(&data_type)
            };
            columns.push(Column {
                name,
                kind,
                references,
            });
        }

        if columns.is_empty() {
            return Err(QueryError::UnknownRelation(table_name.to_string()));
        }

        let primary_key = executor
            .fetch_text_rows(&pk_sql)
            .await?
            .into_iter()
            .find_map(|row| row.into_iter().next().flatten())
            .unwrap_or_else(|| "id".to_string());

        Ok(Self::from_columns(table_name, columns, primary_key))
    }
}

pub fn join_expression(
    table_name: &str,
    alias: &str,
    alias_column: &str,
    table_alias: &str,
    table_column: &str,
) -> String {
    format!("LEFT JOIN {table_name} {alias} ON {alias}.{alias_column} = {table_alias}.{table_column}")
}
