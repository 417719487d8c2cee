use serde_json::{Map, Value};
use tracing::debug;

use crate::queries::{
    error::{QueryError, QueryResult},
    executor::{SqlExecutor, TextRow},
    fields::{BoundField, QueryField},
    subquery::Subquery,
    table::{ColumnKind, Table},
};

pub const BASE_TABLE_ALIAS: &str = "base_table";

pub type Document = Map<String, Value>;

#[derive(Debug, Clone)]
pub enum Join {
    Table(Table),
    Subquery(Subquery),
}

impl Join {
    fn render(&self, alias: &str, base_table: &Table) -> QueryResult<String> {
        match self {
            Self::Table(table) => table.join_table(alias, base_table, BASE_TABLE_ALIAS),
            Self::Subquery(subquery) => subquery.join_table(alias, base_table, BASE_TABLE_ALIAS),
        }
    }
}

impl From<Table> for Join {
    fn from(table: Table) -> Self {
        Self::Table(table)
    }
}

impl From<Subquery> for Join {
    fn from(subquery: Subquery) -> Self {
        Self::Subquery(subquery)
    }
}

/// Declarative description of a query: base table, aliased joins and aliased fields,
/// all in declaration order.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub base_table: Table,
    pub joins: Vec<(String, Join)>,
    pub fields: Vec<(String, QueryField)>,
}

impl QuerySpec {
    pub fn new(base_table: Table) -> Self {
        Self {
            base_table,
            joins: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn join(mut self, alias: impl Into<String>, join: impl Into<Join>) -> Self {
        self.joins.push((alias.into(), join.into()));
        self
    }

    pub fn field(mut self, alias: impl Into<String>, field: impl Into<QueryField>) -> Self {
        self.fields.push((alias.into(), field.into()));
        self
    }

    pub fn has_field(&self, alias: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == alias)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Dotted names pass through. A declared column field resolves to its source
    /// column; any other name must be a column of the base table.
    pub(crate) fn lookup_column(&self, field: &str) -> QueryResult<String> {
        if field.contains('.') {
            return Ok(field.to_string());
        }
        let declared = self.fields.iter().find_map(|(name, query_field)| match query_field {
            QueryField::Column(column) if name == field => Some(column),
            _ => None,
        });
        if let Some(column) = declared {
            return Ok(format!("{}.{}", column.source(BASE_TABLE_ALIAS), column.column));
        }
        if self.base_table.has_column(field) {
            return Ok(format!("{BASE_TABLE_ALIAS}.{field}"));
        }
        Err(QueryError::UnknownField {
            relation: self.base_table.name().to_string(),
            field: field.to_string(),
        })
    }

    pub(crate) fn scope(&self) -> Scope<'_> {
        Scope {
            base_table: &self.base_table,
            joins: &self.joins,
        }
    }
}

/// Name resolution for fields: `base_table` plus every join alias.
pub(crate) struct Scope<'a> {
    base_table: &'a Table,
    joins: &'a [(String, Join)],
}

enum Relation<'a> {
    Table(&'a Table),
    Subquery(&'a Subquery),
}

impl<'a> Scope<'a> {
    pub(crate) fn base_alias(&self) -> &'static str {
        BASE_TABLE_ALIAS
    }

    fn relation(&self, alias: &str) -> QueryResult<Relation<'a>> {
        if alias == BASE_TABLE_ALIAS {
            return Ok(Relation::Table(self.base_table));
        }
        match self.joins.iter().find(|(name, _)| name == alias) {
            Some((_, Join::Table(table))) => Ok(Relation::Table(table)),
            Some((_, Join::Subquery(subquery))) => Ok(Relation::Subquery(subquery)),
            None => Err(QueryError::UnknownRelation(alias.to_string())),
        }
    }

    pub(crate) fn table(&self, alias: &str) -> QueryResult<&'a Table> {
        match self.relation(alias)? {
            Relation::Table(table) => Ok(table),
            Relation::Subquery(subquery) => subquery
                .source_table()
                .ok_or_else(|| QueryError::UnknownRelation(format!("{alias} is not a table"))),
        }
    }

    pub(crate) fn kind_of(&self, alias: &str, column: &str) -> QueryResult<Option<ColumnKind>> {
        match self.relation(alias)? {
            Relation::Table(table) => table.get_kind(column).map(Some),
            Relation::Subquery(subquery) => subquery.get_kind(column),
        }
    }

    pub(crate) fn columns_of(&self, alias: &str) -> QueryResult<Vec<(String, Option<ColumnKind>)>> {
        match self.relation(alias)? {
            Relation::Table(table) => Ok(table
                .columns()
                .iter()
                .map(|c| (c.name.clone(), Some(c.kind.clone())))
                .collect()),
            Relation::Subquery(subquery) => subquery.field_kinds(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// One row per base-table primary key.
    Distinct,
    /// Rows grouped by every non-aggregate field.
    Aggregate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub key: String,
    pub value: Value,
}

impl Lookup {
    fn render(&self, spec: &QuerySpec) -> QueryResult<String> {
        let (field, operator) = self
            .key
            .split_once("__")
            .unwrap_or((self.key.as_str(), "equal"));
        let column = spec.lookup_column(field)?;

        let predicate = match operator {
            "equal" | "exact" => format!("= {}", sql_literal(&self.value)?),
            "in" => {
                let values = match &self.value {
                    Value::Array(values) if !values.is_empty() => values,
                    Value::Array(_) | Value::Null => return Err(QueryError::EmptyInLookup),
                    other => return Err(QueryError::UnsupportedValue(type_name(other).to_string())),
                };
                let literals = values
                    .iter()
                    .map(sql_literal)
                    .collect::<QueryResult<Vec<_>>>()?;
                format!("= ANY(ARRAY[{}])", literals.join(","))
            }
            "isnull" => match &self.value {
                Value::Bool(true) => "IS NULL".to_string(),
                Value::Bool(false) => "IS NOT NULL".to_string(),
                other => return Err(QueryError::UnsupportedValue(type_name(other).to_string())),
            },
            other => return Err(QueryError::UnsupportedLookup(other.to_string())),
        };

        Ok(format!("{column} {predicate}"))
    }
}

fn sql_literal(value: &Value) -> QueryResult<String> {
    match value {
        Value::String(text) => Ok(format!("'{}'", text.replace('\'', "''"))),
        Value::Number(number) if number.is_i64() || number.is_u64() => Ok(number.to_string()),
        other => Err(QueryError::UnsupportedValue(type_name(other).to_string())),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub fields: Vec<BoundField>,
}

pub fn compile(spec: &QuerySpec, mode: QueryMode, lookups: &[Lookup]) -> QueryResult<CompiledQuery> {
    let scope = spec.scope();
    let fields = spec
        .fields
        .iter()
        .map(|(alias, field)| field.bind(alias, &scope))
        .collect::<QueryResult<Vec<_>>>()?;
    let joins = spec
        .joins
        .iter()
        .map(|(alias, join)| join.render(alias, &spec.base_table))
        .collect::<QueryResult<Vec<_>>>()?;
    let predicates = lookups
        .iter()
        .map(|lookup| lookup.render(spec))
        .collect::<QueryResult<Vec<_>>>()?;

    let mut parts = vec![match mode {
        QueryMode::Distinct => format!(
            "SELECT DISTINCT ON ({BASE_TABLE_ALIAS}.{})",
            spec.base_table.primary_key()
        ),
        QueryMode::Aggregate => "SELECT".to_string(),
    }];
    parts.push(
        fields
            .iter()
            .map(|f| f.select.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    parts.push(format!("FROM {} {BASE_TABLE_ALIAS}", spec.base_table.name()));
    parts.extend(joins);
    if !predicates.is_empty() {
        parts.push(format!("WHERE {}", predicates.join(" AND ")));
    }
    if mode == QueryMode::Aggregate {
        let groups = fields
            .iter()
            .filter_map(|f| f.group_by.as_deref())
            .collect::<Vec<_>>();
        if !groups.is_empty() {
            parts.push(format!("GROUP BY {}", groups.join(", ")));
        }
    }

    Ok(CompiledQuery {
        sql: parts.join(" "),
        fields,
    })
}

/// A query spec in a given mode plus the lookups accumulated by `where_`.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) spec: QuerySpec,
    mode: QueryMode,
    lookups: Vec<Lookup>,
}

impl Query {
    pub fn distinct(spec: QuerySpec) -> Self {
        Self {
            spec,
            mode: QueryMode::Distinct,
            lookups: Vec::new(),
        }
    }

    pub fn aggregate(spec: QuerySpec) -> Self {
        Self {
            spec,
            mode: QueryMode::Aggregate,
            lookups: Vec::new(),
        }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn lookups(&self) -> &[Lookup] {
        &self.lookups
    }

    /// Adds a `field[__operator]` lookup. Validation happens when the query is compiled.
    pub fn where_(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.lookups.push(Lookup {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn clear(mut self) -> Self {
        self.lookups.clear();
        self
    }

    pub fn compile(&self) -> QueryResult<CompiledQuery> {
        compile(&self.spec, self.mode, &self.lookups)
    }

    pub fn raw_query(&self) -> QueryResult<String> {
        self.compile().map(|compiled| compiled.sql)
    }

    pub async fn execute(&self, executor: &dyn SqlExecutor) -> QueryResult<QueryRows> {
        let compiled = self.compile()?;
        debug!(table = %self.spec.base_table.name(), "Executing query");
        let rows = executor.fetch_text_rows(&format!("{};", compiled.sql)).await?;
        Ok(QueryRows {
            fields: compiled.fields,
            rows: rows.into_iter(),
        })
    }
}

/// Decodes fetched rows one at a time.
pub struct QueryRows {
    fields: Vec<BoundField>,
    rows: std::vec::IntoIter<TextRow>,
}

impl QueryRows {
    fn decode(&self, row: TextRow) -> QueryResult<Document> {
        if row.len() != self.fields.len() {
            return Err(QueryError::ColumnCountMismatch {
                expected: self.fields.len(),
                actual: row.len(),
            });
        }
        let mut document = Document::new();
        for (field, value) in self.fields.iter().zip(row.iter()) {
            document.insert(field.alias.clone(), field.decode(value.as_deref())?);
        }
        Ok(document)
    }
}

impl Iterator for QueryRows {
    type Item = QueryResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(self.decode(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        queries::executor::{text_row, FakeExecutor},
        schema,
    };

    fn officer_allegation_query() -> Query {
        Query::distinct(
            QuerySpec::new(schema::officer_allegation())
                .join("allegation", schema::allegation())
                .join("officer", schema::officer())
                .field("crid", "allegation.crid")
                .field("final_finding", "final_finding")
                .field(
                    "allegation_count",
                    QueryField::count(schema::officer_allegation(), "officer"),
                )
                .field(
                    "sustained_count",
                    QueryField::count_where(
                        schema::officer_allegation(),
                        "officer",
                        &[("final_finding", "SU")],
                    ),
                ),
        )
    }

    #[test]
    fn distinct_query_sql() {
        assert_eq!(
            officer_allegation_query().raw_query().unwrap(),
            "SELECT DISTINCT ON (base_table.id) allegation.crid AS crid, \
             base_table.final_finding AS final_finding, \
             ( SELECT COUNT(*) FROM data_officerallegation WHERE officer_id = officer.id ) AS allegation_count, \
             ( SELECT COUNT(*) FROM data_officerallegation WHERE officer_id = officer.id AND final_finding = 'SU' ) AS sustained_count \
             FROM data_officerallegation base_table \
             LEFT JOIN data_allegation allegation ON allegation.id = base_table.allegation_id \
             LEFT JOIN data_officer officer ON officer.id = base_table.officer_id"
        );
    }

    #[test]
    fn lookups_render_and_combine() {
        let query = officer_allegation_query()
            .where_("crid", "123'4")
            .where_("id__in", json!([1, 2]))
            .where_("officer.id", 7)
            .where_("final_finding__isnull", false);
        let sql = query.raw_query().unwrap();
        assert!(sql.ends_with(
            "WHERE allegation.crid = '123''4' AND base_table.id = ANY(ARRAY[1,2]) \
             AND officer.id = 7 AND base_table.final_finding IS NOT NULL"
        ));

        let cleared = query.clear();
        assert!(!cleared.raw_query().unwrap().contains("WHERE"));
    }

    #[test]
    fn lookup_errors_surface_at_compile() {
        let query = officer_allegation_query().where_("crid__foobar", "1");
        assert_eq!(
            query.raw_query().unwrap_err().to_string(),
            "foobar lookup is not supported yet."
        );

        let query = officer_allegation_query().where_("crid", 1.5);
        assert_eq!(
            query.raw_query().unwrap_err().to_string(),
            "lookup value of type float is not supported yet."
        );

        let query = officer_allegation_query().where_("id__in", json!([]));
        assert_eq!(
            query.raw_query().unwrap_err().to_string(),
            "Cant do \"in\" lookup for empty list."
        );
    }

    #[test]
    fn lookup_on_joined_field_uses_its_source_column() {
        let sql = officer_allegation_query()
            .where_("crid", "123456")
            .raw_query()
            .unwrap();
        assert!(sql.ends_with("WHERE allegation.crid = '123456'"));
        assert!(!sql.contains("base_table.crid"));

        let sql = officer_allegation_query()
            .where_("start_date__isnull", true)
            .raw_query()
            .unwrap();
        assert!(sql.ends_with("WHERE base_table.start_date IS NULL"));
    }

    #[tokio::test]
    async fn lookup_on_unknown_field_is_rejected() {
        let executor = FakeExecutor::new();
        let query = officer_allegation_query().where_("summary", "x");
        assert!(matches!(
            query.raw_query(),
            Err(QueryError::UnknownField { ref relation, ref field })
                if relation == "data_officerallegation" && field == "summary"
        ));
        assert!(query.execute(&executor).await.is_err());
        assert!(executor.issued().is_empty());
    }

    #[tokio::test]
    async fn execute_decodes_rows_by_kind() {
        let executor = FakeExecutor::new().respond(
            "FROM data_officerallegation base_table",
            vec![
                text_row(&[Some("123456"), Some("SU"), Some("3"), Some("1")]),
                text_row(&[Some("654321"), None, Some("0"), Some("0")]),
            ],
        );
        let docs = officer_allegation_query()
            .execute(&executor)
            .await
            .unwrap()
            .collect::<QueryResult<Vec<_>>>()
            .unwrap();

        assert_eq!(
            Value::Array(docs.into_iter().map(Value::Object).collect()),
            json!([
                {"crid": "123456", "final_finding": "SU", "allegation_count": 3, "sustained_count": 1},
                {"crid": "654321", "final_finding": null, "allegation_count": 0, "sustained_count": 0},
            ])
        );
        assert!(executor.issued()[0].ends_with(';'));
    }

    #[tokio::test]
    async fn execute_with_bad_lookup_issues_nothing() {
        let executor = FakeExecutor::new();
        let result = officer_allegation_query()
            .where_("crid__foobar", "1")
            .execute(&executor)
            .await;
        assert!(matches!(result, Err(QueryError::UnsupportedLookup(_))));
        assert!(executor.issued().is_empty());
    }

    #[tokio::test]
    async fn short_row_is_reported() {
        let executor = FakeExecutor::new().respond("SELECT", vec![text_row(&[Some("1")])]);
        let mut rows = officer_allegation_query().execute(&executor).await.unwrap();
        assert!(matches!(
            rows.next(),
            Some(Err(QueryError::ColumnCountMismatch { expected: 4, actual: 1 }))
        ));
    }

    fn police_witness_query() -> Query {
        Query::distinct(
            QuerySpec::new(schema::police_witness())
                .join("officer", schema::officer())
                .field("officer_id", "officer_id")
                .field("allegation_id", "allegation_id")
                .field(
                    "summary",
                    QueryField::foreign_key("allegation_id", schema::allegation(), "summary"),
                )
                .field("first_name", "officer.first_name"),
        )
    }

    fn allegation_query() -> Query {
        Query::aggregate(
            QuerySpec::new(schema::allegation())
                .join("witnesses", Subquery::new(police_witness_query(), "allegation_id"))
                .field("id", "id")
                .field("crid", "crid")
                .field("witnesses", QueryField::row_array("witnesses")),
        )
    }

    #[test]
    fn aggregate_query_sql() {
        assert_eq!(
            allegation_query().raw_query().unwrap(),
            "SELECT base_table.id AS id, base_table.crid AS crid, \
             array_agg(DISTINCT ROW( witnesses.officer_id, witnesses.allegation_id, witnesses.summary, witnesses.first_name )) AS witnesses \
             FROM data_allegation base_table \
             LEFT JOIN ( SELECT DISTINCT ON (base_table.id) base_table.officer_id AS officer_id, \
             base_table.allegation_id AS allegation_id, \
             ( SELECT summary FROM data_allegation WHERE id = base_table.allegation_id ) AS summary, \
             officer.first_name AS first_name \
             FROM data_policewitness base_table \
             LEFT JOIN data_officer officer ON officer.id = base_table.officer_id ) witnesses \
             ON witnesses.allegation_id = base_table.id \
             GROUP BY base_table.id, base_table.crid"
        );
    }

    #[tokio::test]
    async fn aggregate_query_decodes_row_arrays() {
        let executor = FakeExecutor::new().respond(
            "FROM data_allegation base_table",
            vec![text_row(&[
                Some("334455"),
                Some("123456"),
                Some(r#"{"(554433,334455,summary,James)"}"#),
            ])],
        );
        let docs = allegation_query()
            .execute(&executor)
            .await
            .unwrap()
            .collect::<QueryResult<Vec<_>>>()
            .unwrap();
        assert_eq!(
            Value::Object(docs[0].clone()),
            json!({
                "id": 334455,
                "crid": "123456",
                "witnesses": [{
                    "officer_id": 554433,
                    "allegation_id": 334455,
                    "summary": "summary",
                    "first_name": "James",
                }],
            })
        );
    }

    #[test]
    fn field_kinds_through_subqueries() {
        let complaint = Query::distinct(
            QuerySpec::new(schema::officer_allegation())
                .join(
                    "allegation",
                    Subquery::new(allegation_query(), "id").left_on("allegation_id"),
                )
                .join(
                    "complainant",
                    Subquery::table(schema::complainant(), "allegation_id").left_on("allegation_id"),
                )
                .field("crid", "allegation.crid")
                .field("race", "complainant.race"),
        );
        let compiled = complaint.compile().unwrap();
        assert_eq!(compiled.fields[0].kind(), Some(ColumnKind::Varchar));
        assert_eq!(compiled.fields[1].kind(), Some(ColumnKind::Varchar));
        assert!(compiled.sql.contains(
            ") allegation ON allegation.id = base_table.allegation_id \
             LEFT JOIN data_complainant complainant ON complainant.allegation_id = base_table.allegation_id"
        ));
    }

    #[test]
    fn aggregate_without_groupable_fields_has_no_group_by() {
        let query = Query::aggregate(
            QuerySpec::new(schema::allegation())
                .join("witnesses", Subquery::new(police_witness_query(), "allegation_id"))
                .field("witnesses", QueryField::row_array("witnesses")),
        );
        assert!(!query.raw_query().unwrap().contains("GROUP BY"));
    }
}
