use crate::error::CompileError;
use model::selector::{
    Selector,
    connection::Connection,
    field::{Field, ItemColumn},
    scope::ScopeCondition,
};
use std::collections::HashSet;

pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Checks a resolved selector before any SQL is generated.
pub fn validate(selector: &Selector, max_depth: usize) -> Result<(), CompileError> {
    let depth = selector.main.depth();
    if depth > max_depth {
        return Err(CompileError::MaxDepthExceeded {
            depth,
            max: max_depth,
        });
    }

    validate_connection(&selector.main, "main")?;

    for (i, sort) in selector.sort.iter().enumerate() {
        validate_field(&sort.field, &format!("sort[{i}].field"))?;
    }

    Ok(())
}

fn validate_connection(connection: &Connection, path: &str) -> Result<(), CompileError> {
    if let Some(id) = connection.include {
        return Err(CompileError::validation(
            path,
            format!("include of selector {id} was not resolved"),
        ));
    }
    if connection.entity.trim().is_empty() {
        return Err(CompileError::validation(path, "entity must not be empty"));
    }

    let mut output_names = HashSet::new();
    for (i, field) in connection.fields.iter().enumerate() {
        let field_path = format!("{path}.fields[{i}]");
        validate_field(field, &field_path)?;

        let name = field.output_name().to_lowercase();
        let is_plain_id = field.item_column() == Some(ItemColumn::Id) && name == "id";
        if is_plain_id {
            continue;
        }
        if name == "id" {
            return Err(CompileError::validation(
                field_path,
                "output name `id` is reserved for the item id",
            ));
        }
        if !output_names.insert(name) {
            return Err(CompileError::validation(
                field_path,
                format!("duplicate output name `{}`", field.output_name()),
            ));
        }
    }

    for (i, scope) in connection.scopes.iter().enumerate() {
        for (j, condition) in scope.conditions.iter().enumerate() {
            validate_condition(condition, &format!("{path}.scopes[{i}].conditions[{j}]"))?;
        }
    }

    for (i, child) in connection.connections.iter().enumerate() {
        let child_path = format!("{path}.connections[{i}]");
        validate_connection(child, &child_path)?;

        let name = child.output_name().to_lowercase();
        if name == "id" || !output_names.insert(name) {
            return Err(CompileError::validation(
                child_path,
                format!("duplicate output name `{}`", child.output_name()),
            ));
        }
    }

    Ok(())
}

fn validate_field(field: &Field, path: &str) -> Result<(), CompileError> {
    if field.key.trim().is_empty() {
        return Err(CompileError::validation(path, "field key must not be empty"));
    }
    if field.alias.as_deref().is_some_and(|a| a.trim().is_empty()) {
        return Err(CompileError::validation(path, "field alias must not be empty"));
    }
    Ok(())
}

fn validate_condition(condition: &ScopeCondition, path: &str) -> Result<(), CompileError> {
    validate_field(&condition.field, &format!("{path}.field"))?;

    let operator = condition.operator;
    if !operator.takes_values() {
        return Ok(());
    }
    if condition.values.is_empty() {
        return Err(CompileError::validation(
            path,
            format!("operator `{operator}` needs at least one value"),
        ));
    }
    if operator.is_ordering() && condition.values.len() != 1 {
        return Err(CompileError::validation(
            path,
            format!("operator `{operator}` takes exactly one value"),
        ));
    }
    for value in &condition.values {
        match value {
            serde_json::Value::Null => {
                return Err(CompileError::validation(
                    path,
                    "null is not a comparable value; use `isEmpty` instead",
                ));
            }
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                return Err(CompileError::validation(
                    path,
                    "condition values must be strings, numbers or booleans",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}
