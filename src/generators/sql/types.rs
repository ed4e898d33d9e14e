//! Schema scalar type to SQL column type mapping.

use super::Dialect;
use crate::ast::ScalarKind;

/// Map a scalar kind to a column type.
pub fn column_type(kind: ScalarKind, dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => sqlite_type(kind),
        Dialect::PostgreSQL => postgres_type(kind),
        Dialect::MySQL => mysql_type(kind),
    }
}

/// Column type for an array of scalars or enums, stored as an encoded list.
pub fn list_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "TEXT",
        Dialect::PostgreSQL => "JSONB",
        Dialect::MySQL => "JSON",
    }
}

/// Column type of a key pointing at another table's `id`.
pub fn key_type(dialect: Dialect) -> &'static str {
    column_type(ScalarKind::Int64, dialect)
}

/// Whether default values of this kind are written as quoted literals.
pub fn is_textual(kind: ScalarKind) -> bool {
    matches!(kind, ScalarKind::String | ScalarKind::Char)
}

fn sqlite_type(kind: ScalarKind) -> &'static str {
    match kind {
        // SQLite has one integer storage class
        k if k.is_integer() => "INTEGER",
        ScalarKind::Bool => "INTEGER",
        ScalarKind::Float | ScalarKind::Double => "REAL",
        _ => "TEXT",
    }
}

fn postgres_type(kind: ScalarKind) -> &'static str {
    match kind {
        // No single-byte or unsigned integers; widen to the next type up
        ScalarKind::Int8 | ScalarKind::Int16 | ScalarKind::Uint8 => "SMALLINT",
        ScalarKind::Int32 | ScalarKind::Uint16 => "INTEGER",
        ScalarKind::Int64 | ScalarKind::Uint32 => "BIGINT",
        ScalarKind::Uint64 => "NUMERIC(20)",
        ScalarKind::Float => "REAL",
        ScalarKind::Double => "DOUBLE PRECISION",
        ScalarKind::Bool => "BOOLEAN",
        ScalarKind::String => "TEXT",
        ScalarKind::Char => "CHAR(1)",
    }
}

fn mysql_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int8 => "TINYINT",
        ScalarKind::Int16 => "SMALLINT",
        ScalarKind::Int32 => "INT",
        ScalarKind::Int64 => "BIGINT",
        ScalarKind::Uint8 => "TINYINT UNSIGNED",
        ScalarKind::Uint16 => "SMALLINT UNSIGNED",
        ScalarKind::Uint32 => "INT UNSIGNED",
        ScalarKind::Uint64 => "BIGINT UNSIGNED",
        ScalarKind::Float => "FLOAT",
        ScalarKind::Double => "DOUBLE",
        // TINYINT(1) is MySQL's boolean
        ScalarKind::Bool => "TINYINT(1)",
        ScalarKind::String => "TEXT",
        ScalarKind::Char => "CHAR(1)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_types() {
        assert_eq!(column_type(ScalarKind::Uint64, Dialect::Sqlite), "INTEGER");
        assert_eq!(column_type(ScalarKind::Bool, Dialect::Sqlite), "INTEGER");
        assert_eq!(column_type(ScalarKind::Double, Dialect::Sqlite), "REAL");
        assert_eq!(column_type(ScalarKind::Char, Dialect::Sqlite), "TEXT");
    }

    #[test]
    fn test_postgres_types() {
        assert_eq!(column_type(ScalarKind::Int8, Dialect::PostgreSQL), "SMALLINT");
        assert_eq!(column_type(ScalarKind::Uint32, Dialect::PostgreSQL), "BIGINT");
        assert_eq!(column_type(ScalarKind::Bool, Dialect::PostgreSQL), "BOOLEAN");
        assert_eq!(list_type(Dialect::PostgreSQL), "JSONB");
    }

    #[test]
    fn test_mysql_types() {
        assert_eq!(column_type(ScalarKind::Uint8, Dialect::MySQL), "TINYINT UNSIGNED");
        assert_eq!(column_type(ScalarKind::Bool, Dialect::MySQL), "TINYINT(1)");
        assert_eq!(key_type(Dialect::MySQL), "BIGINT");
    }
}
