//! SQL dialect selection and dialect-specific syntax.

/// SQL dialect variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Sqlite,
    PostgreSQL,
    MySQL,
}

impl Dialect {
    /// Parse dialect from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::PostgreSQL => "postgres",
            Self::MySQL => "mysql",
        }
    }

    /// Quote an identifier.
    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::MySQL => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Bind parameter for the `n`th (1-based) value of a statement.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${n}"),
            _ => "?".to_string(),
        }
    }

    /// Full column definition tail for the synthesized primary key.
    pub fn primary_key_column(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::PostgreSQL => "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
            Self::MySQL => "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
        }
    }

    /// Clause for a non-key `auto_increment` column, where the dialect
    /// allows one.
    pub fn auto_increment(self) -> Option<&'static str> {
        match self {
            Self::PostgreSQL => Some("GENERATED BY DEFAULT AS IDENTITY"),
            // SQLite only auto-increments the rowid alias and MySQL only
            // a key column.
            Self::Sqlite | Self::MySQL => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        assert_eq!(Dialect::from_str("SQLite"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_str("postgresql"), Some(Dialect::PostgreSQL));
        assert_eq!(Dialect::from_str("pg"), Some(Dialect::PostgreSQL));
        assert_eq!(Dialect::from_str("mysql"), Some(Dialect::MySQL));
        assert_eq!(Dialect::from_str("oracle"), None);
        assert_eq!(Dialect::default(), Dialect::Sqlite);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::Sqlite.quote("order"), "\"order\"");
        assert_eq!(Dialect::PostgreSQL.quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(Dialect::MySQL.quote("order"), "`order`");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::PostgreSQL.placeholder(2), "$2");
        assert_eq!(Dialect::MySQL.placeholder(2), "?");
    }
}
