//! Conversion between [`Document`]s and SQLite rows.
//!
//! Values are always bound as statement parameters. Field names pass through
//! [`escape_name`], the single place identifiers are checked and quoted.

use rusqlite::types::{Value as SqlValue, ValueRef};

use super::document::{Document, Value};
use super::query::escape_name;
use crate::error::{Error, Result};

/// One column of a fetched row, as the engine reports it.
pub struct RawColumn<'a> {
    pub name: &'a str,
    pub decl_type: Option<&'a str>,
    pub value: ValueRef<'a>,
}

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Int(i) => SqlValue::Integer(i64::from(*i)),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Null => SqlValue::Null,
    }
}

/// Returns the escaped column list and the matching values for an insert.
pub fn encode_fields(doc: &Document) -> Result<(Vec<String>, Vec<SqlValue>)> {
    if doc.is_empty() {
        return Err(Error::EmptyDocument);
    }

    let mut columns = Vec::with_capacity(doc.len());
    let mut values = Vec::with_capacity(doc.len());
    for (field, value) in doc {
        columns.push(escape_name(field)?);
        values.push(to_sql(value));
    }
    Ok((columns, values))
}

/// Builds `a = ?1, b = ?2, c = NULL` from the fields to set and the fields to
/// clear. Placeholders are numbered from 1, so the clause must lead the
/// statement's parameters.
pub fn encode_for_update(set: &Document, unset: &[&str]) -> Result<(String, Vec<SqlValue>)> {
    if set.is_empty() && unset.is_empty() {
        return Err(Error::EmptyDocument);
    }

    let mut assignments = Vec::with_capacity(set.len() + unset.len());
    let mut values = Vec::with_capacity(set.len());

    for (field, value) in set {
        values.push(to_sql(value));
        assignments.push(format!("{} = ?{}", escape_name(field)?, values.len()));
    }

    for field in unset {
        if set.contains(field) {
            return Err(Error::BadRequest(format!(
                "field '{field}' cannot be both set and unset"
            )));
        }
        assignments.push(format!("{} = NULL", escape_name(field)?));
    }

    Ok((assignments.join(", "), values))
}

fn is_boolean_decl(decl_type: Option<&str>) -> bool {
    decl_type.is_some_and(|t| t.eq_ignore_ascii_case("BOOLEAN") || t.eq_ignore_ascii_case("BOOL"))
}

fn decode_error(column: &str, kind: impl Into<String>) -> Error {
    Error::Decode {
        column: column.to_string(),
        kind: kind.into(),
    }
}

/// Converts a fetched row back into a document. NULL columns are omitted;
/// any value the document model cannot carry is an error.
pub fn decode_row<'a>(columns: impl IntoIterator<Item = RawColumn<'a>>) -> Result<Document> {
    let mut doc = Document::new();

    for column in columns {
        let value = match column.value {
            ValueRef::Null => continue,
            ValueRef::Integer(i) if is_boolean_decl(column.decl_type) => Value::Bool(i != 0),
            ValueRef::Integer(i) => Value::Int(
                i32::try_from(i)
                    .map_err(|_| decode_error(column.name, format!("integer {i} exceeds 32 bits")))?,
            ),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Value::Text(
                std::str::from_utf8(bytes)
                    .map_err(|_| decode_error(column.name, "invalid UTF-8"))?
                    .to_string(),
            ),
            ValueRef::Real(_) => return Err(decode_error(column.name, "unsupported type REAL")),
        };
        doc.insert(column.name, value);
    }

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw<'a>(name: &'a str, decl_type: Option<&'a str>, value: ValueRef<'a>) -> RawColumn<'a> {
        RawColumn {
            name,
            decl_type,
            value,
        }
    }

    fn from_sql(value: &SqlValue) -> ValueRef<'_> {
        ValueRef::from(value)
    }

    #[test]
    fn test_encode_fields_escapes_reserved_names() {
        let doc = Document::new()
            .with("token", "t1")
            .with("when", 10)
            .with("endtime", 0);
        let (columns, values) = encode_fields(&doc).unwrap();

        assert_eq!(columns, vec!["endtime", "token", "\"when\""]);
        assert_eq!(
            values,
            vec![
                SqlValue::Integer(0),
                SqlValue::Text("t1".to_string()),
                SqlValue::Integer(10)
            ]
        );
    }

    #[test]
    fn test_encode_fields_rejects_empty_document() {
        assert!(matches!(
            encode_fields(&Document::new()),
            Err(Error::EmptyDocument)
        ));
    }

    #[test]
    fn test_encode_fields_rejects_unsafe_names() {
        let doc = Document::new().with("data; DROP TABLE users", "x");
        assert!(matches!(
            encode_fields(&doc),
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_encode_for_update_sets_and_unsets() {
        let set = Document::new().with("status", "active").with("when", 5);
        let (clause, values) = encode_for_update(&set, &["fields", "endtime"]).unwrap();

        assert_eq!(
            clause,
            "status = ?1, \"when\" = ?2, fields = NULL, endtime = NULL"
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_encode_for_update_rejects_conflicts_and_empty() {
        let set = Document::new().with("status", "x");
        assert!(matches!(
            encode_for_update(&set, &["status"]),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            encode_for_update(&Document::new(), &[]),
            Err(Error::EmptyDocument)
        ));
    }

    #[test]
    fn test_encode_for_update_unset_only() {
        let (clause, values) = encode_for_update(&Document::new(), &["data", "when"]).unwrap();
        assert_eq!(clause, "data = NULL, \"when\" = NULL");
        assert!(values.is_empty());
    }

    #[test]
    fn test_decode_row_type_switch() {
        let blob = b"blob-text".to_vec();
        let doc = decode_row([
            raw("token", Some("TEXT"), ValueRef::Text(b"abc")),
            raw("data", Some("BLOB"), ValueRef::Blob(&blob)),
            raw("endtime", Some("INTEGER"), ValueRef::Integer(99)),
            raw("usercontrol", Some("BOOLEAN"), ValueRef::Integer(1)),
            raw("fields", Some("TEXT"), ValueRef::Null),
        ])
        .unwrap();

        assert_eq!(doc.get_str("token"), Some("abc"));
        assert_eq!(doc.get_str("data"), Some("blob-text"));
        assert_eq!(doc.get_int("endtime"), Some(99));
        assert_eq!(doc.get_bool("usercontrol"), Some(true));
        assert!(!doc.contains("fields"));
    }

    #[test]
    fn test_decode_row_rejects_unrepresentable_values() {
        let real = decode_row([raw("score", Some("REAL"), ValueRef::Real(1.5))]);
        assert!(matches!(real, Err(Error::Decode { column, .. }) if column == "score"));

        let wide = decode_row([raw("n", None, ValueRef::Integer(i64::from(i32::MAX) + 1))]);
        assert!(matches!(wide, Err(Error::Decode { .. })));

        let bad_utf8 = decode_row([raw("s", None, ValueRef::Blob(&[0xff, 0xfe]))]);
        assert!(matches!(bad_utf8, Err(Error::Decode { .. })));
    }

    #[test]
    fn test_encode_then_decode_preserves_document() {
        let doc = Document::new()
            .with("token", "t")
            .with("when", 1_700_000_000)
            .with("requiredflag", false);
        let (columns, values) = encode_fields(&doc).unwrap();
        let decl = |c: &str| if c == "requiredflag" { Some("BOOLEAN") } else { None };

        let names: Vec<String> = columns.iter().map(|c| c.trim_matches('"').to_string()).collect();
        let decoded = decode_row(names.iter().zip(values.iter()).map(|(name, value)| {
            raw(name, decl(name), from_sql(value))
        }))
        .unwrap();

        assert_eq!(decoded, doc);
    }
}
