use crate::queries::{
    error::{QueryError, QueryResult},
    fields::QueryField,
    query::Query,
    table::{ColumnKind, Table},
};

#[derive(Debug, Clone)]
enum Source {
    Query(Box<Query>),
    Table(Table),
}

/// A join target that is itself a query (or a bare table), matched on `on` against the
/// outer table's `left_on` column. `left_on` defaults to the outer primary key.
#[derive(Debug, Clone)]
pub struct Subquery {
    source: Source,
    on: String,
    left_on: Option<String>,
}

impl Subquery {
    /// The inner query gets a leading `on` column when it does not declare one.
    pub fn new(mut query: Query, on: impl Into<String>) -> Self {
        let on = on.into();
        if !query.spec.has_field(&on) {
            query
                .spec
                .fields
                .insert(0, (on.clone(), QueryField::column(&on)));
        }
        Self {
            source: Source::Query(Box::new(query)),
            on,
            left_on: None,
        }
    }

    pub fn table(table: Table, on: impl Into<String>) -> Self {
        Self {
            source: Source::Table(table),
            on: on.into(),
            left_on: None,
        }
    }

    pub fn left_on(mut self, column: impl Into<String>) -> Self {
        self.left_on = Some(column.into());
        self
    }

    pub fn on(&self) -> &str {
        &self.on
    }

    pub(crate) fn source_table(&self) -> Option<&Table> {
        match &self.source {
            Source::Table(table) => Some(table),
            Source::Query(_) => None,
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        match &self.source {
            Source::Query(query) => query.spec.field_names(),
            Source::Table(table) => table.field_names(),
        }
    }

    pub fn field_kinds(&self) -> QueryResult<Vec<(String, Option<ColumnKind>)>> {
        match &self.source {
            Source::Query(query) => Ok(query
                .compile()?
                .fields
                .into_iter()
                .map(|field| {
                    let kind = field.kind();
                    (field.alias, kind)
                })
                .collect()),
            Source::Table(table) => Ok(table
                .columns()
                .iter()
                .map(|c| (c.name.clone(), Some(c.kind.clone())))
                .collect()),
        }
    }

    pub fn get_kind(&self, field: &str) -> QueryResult<Option<ColumnKind>> {
        self.field_kinds()?
            .into_iter()
            .find(|(name, _)| name == field)
            .map(|(_, kind)| kind)
            .ok_or_else(|| QueryError::UnknownField {
                relation: self.describe(),
                field: field.to_string(),
            })
    }

    pub fn query_body(&self) -> QueryResult<String> {
        match &self.source {
            Source::Query(query) => query.raw_query(),
            Source::Table(table) => Ok(table.name().to_string()),
        }
    }

    pub fn join_table(&self, alias: &str, table: &Table, table_alias: &str) -> QueryResult<String> {
        let left_on = self.left_on.as_deref().unwrap_or(table.primary_key());
        let target = match &self.source {
            Source::Query(_) => format!("( {} )", self.query_body()?),
            Source::Table(_) => self.query_body()?,
        };
        Ok(format!(
            "LEFT JOIN {target} {alias} ON {alias}.{} = {table_alias}.{left_on}",
            self.on
        ))
    }

    fn describe(&self) -> String {
        match &self.source {
            Source::Query(query) => format!("subquery on {}", query.spec.base_table.name()),
            Source::Table(table) => table.name().to_string(),
        }
    }
}
