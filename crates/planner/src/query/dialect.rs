//! Defines the `Dialect` trait for database-specific SQL syntax.

pub trait Dialect: Send + Sync {
    /// Wraps an identifier (like a table or column name) in the correct
    /// quotation marks for the dialect, escaping embedded quote characters.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Returns the placeholder for a parameterized query.
    fn get_placeholder(&self, index: usize) -> String;

    /// Returns the name of the dialect (e.g., "MySQL").
    fn name(&self) -> String;
}

/// MySQL / MariaDB, the engine behind the Wiser schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn get_placeholder(&self, _index: usize) -> String {
        // MySQL uses ?
        "?".into()
    }

    fn name(&self) -> String {
        "MySQL".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_quotes_and_escapes_backticks() {
        assert_eq!(MySql.quote_identifier("wiser_item"), "`wiser_item`");
        assert_eq!(MySql.quote_identifier("odd`name"), "`odd``name`");
        assert_eq!(MySql.get_placeholder(3), "?");
    }
}
