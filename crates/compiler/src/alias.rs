//! Table-alias allocation.
//!
//! Every hop of the connection tree joins `wiser_itemlink` and `wiser_item`
//! again, possibly for the same entity and link type (self-referencing
//! trees, "related products"). Aliases therefore carry an iteration count,
//! and the allocator refuses to hand out the same alias twice.

use model::selector::connection::{Connection, LinkDirection};
use std::collections::{HashMap, HashSet};

/// Alias of the root `wiser_item` table.
pub const ROOT_ALIAS: &str = "main";

/// Counts how often a `(entity, link type, direction)` hop has been
/// traversed so far in one compilation.
#[derive(Debug, Default, Clone)]
pub struct ConnectionIterationModel {
    counts: HashMap<(String, Option<i32>, LinkDirection), u32>,
}

impl ConnectionIterationModel {
    /// Registers one more traversal and returns its 1-based iteration.
    pub fn next(&mut self, entity: &str, link_type: Option<i32>, direction: LinkDirection) -> u32 {
        let count = self
            .counts
            .entry((entity.to_lowercase(), link_type, direction))
            .or_insert(0);
        *count += 1;
        *count
    }
}

/// The two tables a hop joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopAliases {
    pub item: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DetailKey {
    item_alias: String,
    key: String,
    language: Option<String>,
}

impl DetailKey {
    fn new(item_alias: &str, key: &str, language: Option<&str>) -> Self {
        DetailKey {
            item_alias: item_alias.to_string(),
            key: key.to_lowercase(),
            language: language.map(str::to_lowercase),
        }
    }
}

/// A detail alias, and whether this request introduced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailAlias {
    pub alias: String,
    pub is_new: bool,
}

#[derive(Debug, Default)]
pub struct AliasAllocator {
    iterations: ConnectionIterationModel,
    issued: HashSet<String>,
    details: HashMap<DetailKey, String>,
    lookups: HashMap<DetailKey, String>,
}

impl AliasAllocator {
    pub fn new() -> Self {
        let mut allocator = Self::default();
        allocator.issued.insert(ROOT_ALIAS.to_string());
        allocator
    }

    /// Allocates the item and link aliases of a child hop.
    pub fn hop(&mut self, connection: &Connection) -> HopAliases {
        let iteration = self.iterations.next(
            &connection.entity,
            connection.link_type,
            connection.direction,
        );
        let link = connection
            .link_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "any".to_string());

        let candidate = format!(
            "{}_{}_{}_{}",
            sanitize(&connection.entity),
            sanitize(&link),
            connection.direction.as_str(),
            iteration
        );
        let item = self.reserve(candidate);
        let link = self.reserve(format!("{item}_link"));
        HopAliases { item, link }
    }

    /// Returns the alias of the `wiser_itemdetail` join for `key` on the
    /// item aliased `item_alias`. Repeated requests get the same alias.
    pub fn detail(&mut self, item_alias: &str, key: &str, language: Option<&str>) -> DetailAlias {
        let lookup = DetailKey::new(item_alias, key, language);
        if let Some(alias) = self.details.get(&lookup) {
            return DetailAlias {
                alias: alias.clone(),
                is_new: false,
            };
        }

        let alias = self.reserve(detail_name(item_alias, key, language));
        self.details.insert(lookup, alias.clone());
        DetailAlias { alias, is_new: true }
    }

    /// Alias of a correlated `wiser_itemdetail` lookup. Kept apart from the
    /// detail joins, so a lookup never stands in for a join.
    pub fn lookup(&mut self, item_alias: &str, key: &str, language: Option<&str>) -> String {
        let lookup = DetailKey::new(item_alias, key, language);
        if let Some(alias) = self.lookups.get(&lookup) {
            return alias.clone();
        }
        let alias = self.reserve(format!("{}_lookup", detail_name(item_alias, key, language)));
        self.lookups.insert(lookup, alias.clone());
        alias
    }

    /// Alias of the derived table holding one page of main item ids.
    pub fn page(&mut self) -> String {
        self.reserve(format!("{ROOT_ALIAS}_page"))
    }

    fn reserve(&mut self, candidate: String) -> String {
        if self.issued.insert(candidate.clone()) {
            return candidate;
        }
        let mut suffix = 2;
        loop {
            let attempt = format!("{candidate}_{suffix}");
            if self.issued.insert(attempt.clone()) {
                return attempt;
            }
            suffix += 1;
        }
    }
}

fn detail_name(item_alias: &str, key: &str, language: Option<&str>) -> String {
    let mut name = format!("{item_alias}__{}", sanitize(key));
    if let Some(language) = language {
        name.push('_');
        name.push_str(&sanitize(language));
    }
    name
}

/// Lowercases and replaces everything outside `[a-z0-9_]` with `_`.
fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "x".to_string()
    } else {
        cleaned
    }
}
