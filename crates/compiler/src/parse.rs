use crate::error::CompileError;
use model::selector::Selector;
use tracing::debug;

/// Parses selector JSON. Structural problems (unknown operators, wrong
/// types, trailing garbage) are reported with serde's line and column.
pub fn parse_selector(source: &str) -> Result<Selector, CompileError> {
    let selector: Selector = serde_json::from_str(source)?;
    debug!(
        "Parsed selector with {} connection(s)",
        selector.connection_count()
    );
    Ok(selector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reports_position() {
        let err = parse_selector(r#"{ "main": { "entity": "product" "#).unwrap_err();
        match err {
            CompileError::Parse(message) => assert!(message.contains("line 1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_main_is_a_parse_error() {
        assert!(matches!(
            parse_selector(r#"{ "sort": [] }"#),
            Err(CompileError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_minimal() {
        let selector = parse_selector(r#"{ "main": { "entity": "product" } }"#).unwrap();
        assert_eq!(selector.main.entity, "product");
    }
}
