use serde_json::{Map, Value};

use crate::queries::{
    array_parser::parse_postgres_row_array,
    decode::decode_text,
    error::{QueryError, QueryResult},
    query::Scope,
    range::num_range_case,
    table::{ColumnKind, Table},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub relation: Option<String>,
    pub column: String,
}

impl ColumnRef {
    /// `crid` refers to the base table, `officer.first_name` to the `officer` join.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((relation, column)) => Self {
                relation: Some(relation.to_string()),
                column: column.to_string(),
            },
            None => Self {
                relation: None,
                column: raw.to_string(),
            },
        }
    }

    pub(crate) fn source<'a>(&'a self, base_alias: &'a str) -> &'a str {
        self.relation.as_deref().unwrap_or(base_alias)
    }
}

#[derive(Debug, Clone)]
pub enum QueryField {
    Column(ColumnRef),
    Count {
        from_table: Table,
        related_to: String,
        filters: Vec<(String, String)>,
    },
    Geometry(ColumnRef),
    ForeignKey {
        relation: String,
        related_table: Table,
        field_name: String,
    },
    RowArray {
        relation: String,
    },
    NumRange {
        column: ColumnRef,
        ranges: Vec<i64>,
    },
}

impl QueryField {
    pub fn column(raw: &str) -> Self {
        Self::Column(ColumnRef::parse(raw))
    }

    pub fn count(from_table: Table, related_to: impl Into<String>) -> Self {
        Self::Count {
            from_table,
            related_to: related_to.into(),
            filters: Vec::new(),
        }
    }

    pub fn count_where(
        from_table: Table,
        related_to: impl Into<String>,
        filters: &[(&str, &str)],
    ) -> Self {
        Self::Count {
            from_table,
            related_to: related_to.into(),
            filters: filters
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn geometry(raw: &str) -> Self {
        Self::Geometry(ColumnRef::parse(raw))
    }

    pub fn foreign_key(
        relation: impl Into<String>,
        related_table: Table,
        field_name: impl Into<String>,
    ) -> Self {
        Self::ForeignKey {
            relation: relation.into(),
            related_table,
            field_name: field_name.into(),
        }
    }

    pub fn row_array(relation: impl Into<String>) -> Self {
        Self::RowArray {
            relation: relation.into(),
        }
    }

    pub fn num_range(raw: &str, ranges: Vec<i64>) -> Self {
        Self::NumRange {
            column: ColumnRef::parse(raw),
            ranges,
        }
    }

    pub(crate) fn bind(&self, alias: &str, scope: &Scope<'_>) -> QueryResult<BoundField> {
        let base_alias = scope.base_alias();
        match self {
            Self::Column(column) => {
                let source = column.source(base_alias);
                let kind = scope.kind_of(source, &column.column)?;
                Ok(BoundField {
                    alias: alias.to_string(),
                    select: format!("{source}.{} AS {alias}", column.column),
                    group_by: Some(format!("{source}.{}", column.column)),
                    decoder: FieldDecoder::Scalar(kind),
                })
            }
            Self::Count {
                from_table,
                related_to,
                filters,
            } => {
                let join_table = scope.table(related_to)?;
                let foreign_key = from_table.find_foreign_key_to(join_table)?;
                let mut conditions = vec![format!(
                    "{} = {related_to}.{}",
                    foreign_key.name,
                    join_table.primary_key()
                )];
                conditions.extend(
                    filters
                        .iter()
                        .map(|(k, v)| format!("{k} = '{}'", v.replace('\'', "''"))),
                );
                Ok(BoundField {
                    alias: alias.to_string(),
                    select: format!(
                        "( SELECT COUNT(*) FROM {} WHERE {} ) AS {alias}",
                        from_table.name(),
                        conditions.join(" AND ")
                    ),
                    group_by: Some(format!("{related_to}.{}", join_table.primary_key())),
                    decoder: FieldDecoder::Scalar(Some(ColumnKind::Integer)),
                })
            }
            Self::Geometry(column) => {
                let source = column.source(base_alias);
                scope.kind_of(source, &column.column)?;
                Ok(BoundField {
                    alias: alias.to_string(),
                    select: format!("ST_AsGML({source}.{}) AS {alias}", column.column),
                    group_by: Some(format!("{source}.{}", column.column)),
                    decoder: FieldDecoder::Scalar(Some(ColumnKind::Geometry)),
                })
            }
            Self::ForeignKey {
                relation,
                related_table,
                field_name,
            } => {
                let base_table = scope.table(base_alias)?;
                let foreign_key = base_table.find_foreign_key_with_name(relation)?;
                if !foreign_key.is_foreign_key_to(related_table) {
                    return Err(QueryError::ForeignKeyNotFound(format!(
                        "Cannot find foreign key field from {} to {}.",
                        base_table.name(),
                        related_table.name()
                    )));
                }
                let kind = related_table.get_kind(field_name)?;
                Ok(BoundField {
                    alias: alias.to_string(),
                    select: format!(
                        "( SELECT {field_name} FROM {} WHERE {} = {base_alias}.{relation} ) AS {alias}",
                        related_table.name(),
                        related_table.primary_key()
                    ),
                    group_by: Some(format!("{base_alias}.{relation}")),
                    decoder: FieldDecoder::Scalar(Some(kind)),
                })
            }
            Self::RowArray { relation } => {
                let subfields = scope.columns_of(relation)?;
                let row = subfields
                    .iter()
                    .map(|(name, _)| format!("{relation}.{name}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(BoundField {
                    alias: alias.to_string(),
                    select: format!("array_agg(DISTINCT ROW( {row} )) AS {alias}"),
                    group_by: None,
                    decoder: FieldDecoder::RowArray(subfields),
                })
            }
            Self::NumRange { column, ranges } => {
                let source = column.source(base_alias);
                scope.kind_of(source, &column.column)?;
                let qualified = format!("{source}.{}", column.column);
                Ok(BoundField {
                    alias: alias.to_string(),
                    select: format!("{} AS {alias}", num_range_case(&qualified, ranges)),
                    group_by: Some(qualified),
                    decoder: FieldDecoder::Scalar(Some(ColumnKind::Text)),
                })
            }
        }
    }
}

impl From<&str> for QueryField {
    fn from(raw: &str) -> Self {
        Self::column(raw)
    }
}

#[derive(Debug, Clone)]
pub enum FieldDecoder {
    Scalar(Option<ColumnKind>),
    RowArray(Vec<(String, Option<ColumnKind>)>),
}

/// A field resolved against its query: the SELECT fragment plus how to read it back.
#[derive(Debug, Clone)]
pub struct BoundField {
    pub alias: String,
    pub select: String,
    pub group_by: Option<String>,
    pub decoder: FieldDecoder,
}

impl BoundField {
    pub fn kind(&self) -> Option<ColumnKind> {
        match &self.decoder {
            FieldDecoder::Scalar(kind) => kind.clone(),
            FieldDecoder::RowArray(_) => None,
        }
    }

    pub fn decode(&self, text: Option<&str>) -> QueryResult<Value> {
        match &self.decoder {
            FieldDecoder::Scalar(kind) => decode_text(kind.as_ref(), text),
            FieldDecoder::RowArray(subfields) => {
                let Some(text) = text else {
                    return Ok(Value::Array(Vec::new()));
                };
                let mut items = Vec::new();
                for row in parse_postgres_row_array(text)? {
                    if row.len() != subfields.len() {
                        return Err(QueryError::ColumnCountMismatch {
                            expected: subfields.len(),
                            actual: row.len(),
                        });
                    }
                    let mut item = Map::new();
                    for ((name, kind), value) in subfields.iter().zip(row.iter()) {
                        item.insert(name.clone(), decode_text(kind.as_ref(), value.as_deref())?);
                    }
                    items.push(Value::Object(item));
                }
                Ok(Value::Array(items))
            }
        }
    }
}
