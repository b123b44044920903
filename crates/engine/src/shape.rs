//! Folds flat joined rows back into the nested shape of the selector.
//!
//! Every row carries one id column per connection node. Items are collapsed
//! by id within their parent, in first-seen order; a NULL id (an optional
//! hop without a match) contributes nothing at that level or below.

use compiler::CompiledQuery;
use model::records::row::Row;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct ItemList {
    positions: HashMap<String, usize>,
    items: Vec<ShapedItem>,
}

#[derive(Debug)]
struct ShapedItem {
    object: Map<String, JsonValue>,
    children: Vec<ItemList>,
}

struct Layout<'q> {
    query: &'q CompiledQuery,
    children: Vec<Vec<usize>>,
}

impl<'q> Layout<'q> {
    fn new(query: &'q CompiledQuery) -> Self {
        let children = (0..query.nodes.len())
            .map(|node| query.children_of(node).collect())
            .collect();
        Layout { query, children }
    }

    fn absorb(&self, node: usize, row: &Row, list: &mut ItemList) {
        let Some(id) = row.get(&self.query.nodes[node].id_column) else {
            return;
        };
        let Some(key) = id.identity_key() else {
            return;
        };

        let position = match list.positions.get(&key) {
            Some(position) => *position,
            None => {
                let mut object = Map::new();
                object.insert("id".to_string(), id.to_json());
                for binding in self.query.bindings_for(node) {
                    let value = row
                        .get(&binding.column)
                        .map(|v| v.to_json())
                        .unwrap_or(JsonValue::Null);
                    object.insert(binding.name.clone(), value);
                }
                list.items.push(ShapedItem {
                    object,
                    children: self.children[node]
                        .iter()
                        .map(|_| ItemList::default())
                        .collect(),
                });
                list.positions.insert(key, list.items.len() - 1);
                list.items.len() - 1
            }
        };

        let item = &mut list.items[position];
        for (slot, child) in self.children[node].iter().enumerate() {
            self.absorb(*child, row, &mut item.children[slot]);
        }
    }

    fn render(&self, node: usize, list: ItemList) -> JsonValue {
        let items = list
            .items
            .into_iter()
            .map(|item| {
                let mut object = item.object;
                for (child_list, child) in item.children.into_iter().zip(&self.children[node]) {
                    let name = self.query.nodes[*child].output_name.clone();
                    object.insert(name, self.render(*child, child_list));
                }
                JsonValue::Object(object)
            })
            .collect();
        JsonValue::Array(items)
    }
}

/// Shapes `rows` into a JSON array of main items with nested child arrays.
pub fn shape_rows(query: &CompiledQuery, rows: &[Row]) -> JsonValue {
    if query.nodes.is_empty() {
        return JsonValue::Array(Vec::new());
    }

    let layout = Layout::new(query);
    let mut root = ItemList::default();
    for row in rows {
        layout.absorb(0, row, &mut root);
    }
    layout.render(0, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compiler::{CompileOptions, SelectorCompiler, parse::parse_selector};
    use model::core::value::Value;
    use planner::query::dialect::MySql;
    use serde_json::json;

    fn compiled() -> CompiledQuery {
        let selector = parse_selector(
            r#"{
                "main": {
                    "entity": "product",
                    "fields": [{ "key": "title" }],
                    "connections": [
                        { "entity": "variant", "alias": "variants", "optional": true, "fields": [{ "key": "color" }] },
                        { "entity": "category", "direction": "up", "fields": [{ "key": "title", "alias": "name" }] }
                    ]
                }
            }"#,
        )
        .unwrap();
        SelectorCompiler::new(&MySql)
            .compile(&selector, &CompileOptions::default())
            .unwrap()
    }

    fn row(product: u64, title: &str, variant: Option<(u64, &str)>, category: (u64, &str)) -> Row {
        let mut row = Row::default();
        row.push("main.id", Value::Uint(product));
        row.push("main.title", Value::from(title));
        match variant {
            Some((id, color)) => {
                row.push("variant_any_down_1.id", Value::Uint(id));
                row.push("variant_any_down_1.color", Value::from(color));
            }
            None => {
                row.push("variant_any_down_1.id", Value::Null);
                row.push("variant_any_down_1.color", Value::Null);
            }
        }
        row.push("category_any_up_1.id", Value::Uint(category.0));
        row.push("category_any_up_1.name", Value::from(category.1));
        row
    }

    #[test]
    fn test_rows_fold_into_tree() {
        let query = compiled();
        let rows = vec![
            row(2, "Chair", Some((20, "red")), (7, "Furniture")),
            row(2, "Chair", Some((21, "blue")), (7, "Furniture")),
            row(1, "Lamp", None, (8, "Lighting")),
            row(2, "Chair", Some((20, "red")), (9, "Outdoor")),
        ];

        assert_eq!(
            shape_rows(&query, &rows),
            json!([
                {
                    "id": 2,
                    "title": "Chair",
                    "variants": [
                        { "id": 20, "color": "red" },
                        { "id": 21, "color": "blue" }
                    ],
                    "category": [
                        { "id": 7, "name": "Furniture" },
                        { "id": 9, "name": "Outdoor" }
                    ]
                },
                {
                    "id": 1,
                    "title": "Lamp",
                    "variants": [],
                    "category": [{ "id": 8, "name": "Lighting" }]
                }
            ])
        );
    }

    #[test]
    fn test_no_rows() {
        assert_eq!(shape_rows(&compiled(), &[]), json!([]));
    }
}
