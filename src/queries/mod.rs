pub mod array_parser;
pub mod decode;
pub mod error;
pub mod executor;
pub mod fields;
pub mod query;
pub mod range;
pub mod subquery;
pub mod table;

pub use error::{QueryError, QueryResult};
pub use executor::{connect, SqlExecutor, TextRow};
pub use fields::{BoundField, ColumnRef, QueryField};
pub use query::{compile, CompiledQuery, Document, Join, Lookup, Query, QueryMode, QueryRows, QuerySpec};
pub use subquery::Subquery;
pub use table::{Column, ColumnKind, Table};
