//! Statement builder for the generic record store.
//!
//! Values are always bound as numbered parameters; identifiers only ever reach
//! SQL text through [`escape_name`].

use rusqlite::types::Value as SqlValue;

use super::Page;
use super::codec::{encode_fields, encode_for_update, to_sql};
use super::document::{Document, Value};
use crate::error::{Error, Result};

const MAX_IDENTIFIER_LEN: usize = 64;

/// SQLite keywords. Any of these used as an identifier must be quoted.
const RESERVED_WORDS: &[&str] = &[
    "abort", "action", "add", "after", "all", "alter", "always", "analyze", "and", "as", "asc",
    "attach", "autoincrement", "before", "begin", "between", "by", "cascade", "case", "cast",
    "check", "collate", "column", "commit", "conflict", "constraint", "create", "cross",
    "current", "current_date", "current_time", "current_timestamp", "database", "default",
    "deferrable", "deferred", "delete", "desc", "detach", "distinct", "do", "drop", "each",
    "else", "end", "escape", "except", "exclude", "exclusive", "exists", "explain", "fail",
    "filter", "first", "following", "for", "foreign", "from", "full", "generated", "glob",
    "group", "groups", "having", "if", "ignore", "immediate", "in", "index", "indexed",
    "initially", "inner", "insert", "instead", "intersect", "into", "is", "isnull", "join",
    "key", "last", "left", "like", "limit", "match", "materialized", "natural", "no", "not",
    "nothing", "notnull", "null", "nulls", "of", "offset", "on", "or", "order", "others",
    "outer", "over", "partition", "plan", "pragma", "preceding", "primary", "query", "raise",
    "range", "recursive", "references", "regexp", "reindex", "release", "rename", "replace",
    "restrict", "returning", "right", "rollback", "row", "rows", "savepoint", "select", "set",
    "table", "temp", "temporary", "then", "ties", "to", "transaction", "trigger", "unbounded",
    "union", "unique", "update", "using", "vacuum", "values", "view", "virtual", "when",
    "where", "window", "with", "without",
];

pub(crate) fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(&name.to_ascii_lowercase().as_str())
}

/// Checks that `name` is an ASCII identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validates an identifier and quotes it if it is a reserved word.
pub fn escape_name(name: &str) -> Result<String> {
    validate_identifier(name)?;
    if is_reserved_word(name) {
        Ok(format!("\"{name}\""))
    } else {
        Ok(name.to_string())
    }
}

#[derive(Debug)]
pub(crate) struct Query {
    sql: String,
    params: Vec<SqlValue>,
    has_where: bool,
}

impl Query {
    fn new(sql: String) -> Self {
        Self {
            sql,
            params: Vec::new(),
            has_where: false,
        }
    }

    pub fn insert(table: &str, doc: &Document) -> Result<Self> {
        let (columns, values) = encode_fields(doc)?;
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let mut query = Self::new(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            escape_name(table)?,
            columns.join(", "),
            placeholders.join(", ")
        ));
        query.params = values;
        Ok(query)
    }

    pub fn select(table: &str) -> Result<Self> {
        Ok(Self::new(format!("SELECT * FROM {}", escape_name(table)?)))
    }

    pub fn count(table: &str) -> Result<Self> {
        Ok(Self::new(format!(
            "SELECT COUNT(*) FROM {}",
            escape_name(table)?
        )))
    }

    /// Distinct non-null values of `column`, ascending.
    pub fn distinct(table: &str, column: &str) -> Result<Self> {
        let column = escape_name(column)?;
        let mut query = Self::new(format!(
            "SELECT DISTINCT {column} FROM {}",
            escape_name(table)?
        ));
        query.push_condition(&format!("{column} IS NOT NULL"));
        query.sql.push_str(&format!(" ORDER BY {column}"));
        Ok(query)
    }

    pub fn delete(table: &str) -> Result<Self> {
        Ok(Self::new(format!("DELETE FROM {}", escape_name(table)?)))
    }

    pub fn update(table: &str, set: &Document, unset: &[&str]) -> Result<Self> {
        let (assignments, values) = encode_for_update(set, unset)?;
        let mut query = Self::new(format!(
            "UPDATE {} SET {}",
            escape_name(table)?,
            assignments
        ));
        query.params = values;
        Ok(query)
    }

    fn push_condition(&mut self, condition: &str) {
        self.sql
            .push_str(if self.has_where { " AND " } else { " WHERE " });
        self.sql.push_str(condition);
        self.has_where = true;
    }

    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    /// Adds a conjunctive equality filter; a `Null` value matches `IS NULL`.
    pub fn filter(mut self, filter: &Document) -> Result<Self> {
        for (field, value) in filter {
            let column = escape_name(field)?;
            if matches!(value, Value::Null) {
                self.push_condition(&format!("{column} IS NULL"));
            } else {
                let placeholder = self.bind(to_sql(value));
                self.push_condition(&format!("{column} = {placeholder}"));
            }
        }
        Ok(self)
    }

    pub fn filter_eq(self, key: &str, value: &str) -> Result<Self> {
        self.filter(&Document::new().with(key, value))
    }

    /// Matches rows whose `field` is set (> 0) and strictly before `cutoff`.
    pub fn set_and_before(mut self, field: &str, cutoff: i32) -> Result<Self> {
        let column = escape_name(field)?;
        let placeholder = self.bind(SqlValue::Integer(i64::from(cutoff)));
        self.push_condition(&format!("{column} > 0 AND {column} < {placeholder}"));
        Ok(self)
    }

    pub fn order_desc(mut self, field: Option<&str>) -> Result<Self> {
        if let Some(field) = field.filter(|f| !f.is_empty()) {
            self.sql
                .push_str(&format!(" ORDER BY {} DESC", escape_name(field)?));
        }
        Ok(self)
    }

    pub fn page(mut self, page: Page) -> Self {
        let limit = self.bind(SqlValue::Integer(i64::from(page.clamped_limit())));
        let offset = self.bind(SqlValue::Integer(i64::from(page.offset)));
        self.sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}
