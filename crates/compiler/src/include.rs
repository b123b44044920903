//! Grafting of stored selectors into a connection tree.

use crate::error::CompileError;
use model::selector::{Selector, connection::Connection};
use std::collections::HashMap;
use tracing::debug;

/// Stored selector ids referenced anywhere in the tree, in pre-order,
/// without duplicates.
pub fn include_ids(selector: &Selector) -> Vec<i64> {
    let mut ids = Vec::new();
    selector.main.walk(&mut |connection| {
        if let Some(id) = connection.include {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    });
    ids
}

/// Replaces every `include` with the main connection of the referenced
/// selector from `library`, recursively.
///
/// `root_id` is the stored id of `selector` itself, if it has one, so a
/// selector including itself is reported as a cycle.
pub fn resolve_includes(
    selector: &mut Selector,
    library: &HashMap<i64, Selector>,
    root_id: Option<i64>,
) -> Result<(), CompileError> {
    let mut stack: Vec<i64> = root_id.into_iter().collect();
    resolve_connection(&mut selector.main, library, &mut stack)
}

fn resolve_connection(
    connection: &mut Connection,
    library: &HashMap<i64, Selector>,
    stack: &mut Vec<i64>,
) -> Result<(), CompileError> {
    for child in &mut connection.connections {
        resolve_connection(child, library, stack)?;
    }

    let Some(id) = connection.include.take() else {
        return Ok(());
    };

    if let Some(start) = stack.iter().position(|seen| *seen == id) {
        let mut chain = stack[start..].to_vec();
        chain.push(id);
        return Err(CompileError::CircularInclude(chain));
    }

    let included = library.get(&id).ok_or(CompileError::MissingInclude(id))?;
    let mut grafted = included.main.clone();

    stack.push(id);
    let resolved = resolve_connection(&mut grafted, library, stack);
    stack.pop();
    resolved?;

    debug!(
        "Grafted selector {} into connection `{}`",
        id,
        connection.output_name()
    );
    merge(connection, grafted);
    Ok(())
}

fn merge(target: &mut Connection, source: Connection) {
    if target.entity.trim().is_empty() {
        target.entity = source.entity;
    }
    target.fields.extend(source.fields);
    target.scopes.extend(source.scopes);
    target.connections.extend(source.connections);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_selector;
    use model::selector::field::Field;

    fn library(entries: &[(i64, &str)]) -> HashMap<i64, Selector> {
        entries
            .iter()
            .map(|(id, json)| (*id, parse_selector(json).unwrap()))
            .collect()
    }

    #[test]
    fn test_include_ids_are_unique_and_ordered() {
        let selector = parse_selector(
            r#"{ "main": { "entity": "p", "connections": [
                { "include": 9 }, { "entity": "x", "connections": [{ "include": 2 }] }, { "include": 9 }
            ]}}"#,
        )
        .unwrap();
        assert_eq!(include_ids(&selector), vec![9, 2]);
    }

    #[test]
    fn test_graft_appends_and_keeps_hop_settings() {
        let mut selector = parse_selector(
            r#"{ "main": { "entity": "product", "connections": [
                { "include": 5, "alias": "variants", "linkType": 3, "optional": true, "fields": [{ "key": "sku" }] }
            ]}}"#,
        )
        .unwrap();
        let library = library(&[(
            5,
            r#"{ "main": { "entity": "variant", "fields": [{ "key": "color" }],
                 "connections": [{ "entity": "stock" }] },
                 "sort": [{ "field": { "key": "color" } }] }"#,
        )]);

        resolve_includes(&mut selector, &library, None).unwrap();

        let hop = &selector.main.connections[0];
        assert_eq!(hop.include, None);
        assert_eq!(hop.entity, "variant");
        assert_eq!(hop.alias.as_deref(), Some("variants"));
        assert_eq!(hop.link_type, Some(3));
        assert!(hop.optional);
        assert_eq!(hop.fields, vec![Field::new("sku"), Field::new("color")]);
        assert_eq!(hop.connections[0].entity, "stock");
        assert!(selector.sort.is_empty());
    }

    #[test]
    fn test_nested_includes_resolve() {
        let mut selector =
            parse_selector(r#"{ "main": { "entity": "a", "connections": [{ "include": 1 }] } }"#)
                .unwrap();
        let library = library(&[
            (1, r#"{ "main": { "entity": "b", "connections": [{ "include": 2 }] } }"#),
            (2, r#"{ "main": { "entity": "c" } }"#),
        ]);

        resolve_includes(&mut selector, &library, None).unwrap();
        assert_eq!(selector.main.connections[0].connections[0].entity, "c");
        assert!(include_ids(&selector).is_empty());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut selector = parse_selector(
            r#"{ "main": { "entity": "a", "connections": [{ "include": 1 }, { "include": 2 }] } }"#,
        )
        .unwrap();
        let library = library(&[
            (1, r#"{ "main": { "entity": "b", "connections": [{ "include": 3 }] } }"#),
            (2, r#"{ "main": { "entity": "c", "connections": [{ "include": 3 }] } }"#),
            (3, r#"{ "main": { "entity": "d" } }"#),
        ]);
        resolve_includes(&mut selector, &library, None).unwrap();
    }

    #[test]
    fn test_cycle_reports_chain() {
        let mut selector =
            parse_selector(r#"{ "main": { "entity": "a", "connections": [{ "include": 3 }] } }"#)
                .unwrap();
        let library = library(&[
            (3, r#"{ "main": { "entity": "b", "connections": [{ "include": 7 }] } }"#),
            (7, r#"{ "main": { "entity": "c", "connections": [{ "include": 3 }] } }"#),
        ]);

        assert_eq!(
            resolve_includes(&mut selector, &library, None),
            Err(CompileError::CircularInclude(vec![3, 7, 3]))
        );
    }

    #[test]
    fn test_self_include_of_stored_root() {
        let mut selector =
            parse_selector(r#"{ "main": { "entity": "a", "connections": [{ "include": 4 }] } }"#)
                .unwrap();
        let library = library(&[(4, r#"{ "main": { "entity": "a", "connections": [{ "include": 4 }] } }"#)]);

        assert_eq!(
            resolve_includes(&mut selector, &library, Some(4)),
            Err(CompileError::CircularInclude(vec![4, 4]))
        );
    }

    #[test]
    fn test_missing_include() {
        let mut selector =
            parse_selector(r#"{ "main": { "entity": "a", "connections": [{ "include": 8 }] } }"#)
                .unwrap();
        assert_eq!(
            resolve_includes(&mut selector, &HashMap::new(), None),
            Err(CompileError::MissingInclude(8))
        );
    }
}
