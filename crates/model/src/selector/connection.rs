use super::{field::Field, scope::Scope};
use serde::{Deserialize, Serialize};

/// Which side of `wiser_itemlink` the hop walks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    /// Items linked *to* the parent (`destination_item_id = parent.id`).
    #[default]
    Down,
    /// Items the parent is linked to (`item_id = parent.id`).
    Up,
}

impl LinkDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkDirection::Down => "down",
            LinkDirection::Up => "up",
        }
    }
}

/// One traversal step of a selector. The main connection is the root of
/// the tree; nested `connections` are hops away from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub entity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<i32>,

    #[serde(default)]
    pub direction: LinkDirection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default)]
    pub optional: bool,

    #[serde(default)]
    pub fields: Vec<Field>,

    #[serde(default)]
    pub scopes: Vec<Scope>,

    #[serde(default)]
    pub connections: Vec<Connection>,

    /// Id of a stored selector whose main connection is grafted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<i64>,
}

impl Connection {
    pub fn new(entity: &str) -> Self {
        Connection {
            entity: entity.to_string(),
            ..Default::default()
        }
    }

    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.entity)
    }

    /// Depth of the subtree rooted here; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        1 + self
            .connections
            .iter()
            .map(Connection::depth)
            .max()
            .unwrap_or(0)
    }

    /// Visits every connection in pre-order, root first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Connection)) {
        visit(self);
        for child in &self.connections {
            child.walk(visit);
        }
    }

    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Connection)) {
        visit(self);
        for child in &mut self.connections {
            child.walk_mut(visit);
        }
    }
}
