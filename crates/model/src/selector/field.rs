use serde::{Deserialize, Serialize};

/// A reference to an item property: either a column of `wiser_item` or a
/// `wiser_itemdetail` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Overrides the selector-wide language for this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl Field {
    pub fn new(key: &str) -> Self {
        Field {
            key: key.to_string(),
            alias: None,
            language_code: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_language(mut self, language_code: &str) -> Self {
        self.language_code = Some(language_code.to_string());
        self
    }

    /// The key this field is emitted under in the response.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.key)
    }

    pub fn item_column(&self) -> Option<ItemColumn> {
        ItemColumn::from_key(&self.key)
    }

    /// Resolves the language that applies to this field, given the
    /// selector default. Item columns are never language specific.
    pub fn effective_language<'a>(&'a self, default: Option<&'a str>) -> Option<&'a str> {
        if self.item_column().is_some() {
            return None;
        }
        self.language_code
            .as_deref()
            .or(default)
            .filter(|code| !code.is_empty())
    }
}

/// Columns read straight from `wiser_item` without a detail join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemColumn {
    Id,
    Title,
    EntityType,
    ModuleId,
    PublishedEnvironment,
    AddedOn,
    AddedBy,
    ChangedOn,
    ChangedBy,
}

impl ItemColumn {
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "id" => Some(ItemColumn::Id),
            "title" => Some(ItemColumn::Title),
            "entity_type" => Some(ItemColumn::EntityType),
            "moduleid" => Some(ItemColumn::ModuleId),
            "published_environment" => Some(ItemColumn::PublishedEnvironment),
            "added_on" => Some(ItemColumn::AddedOn),
            "added_by" => Some(ItemColumn::AddedBy),
            "changed_on" => Some(ItemColumn::ChangedOn),
            "changed_by" => Some(ItemColumn::ChangedBy),
            _ => None,
        }
    }

    pub fn column_name(&self) -> &'static str {
        match self {
            ItemColumn::Id => "id",
            ItemColumn::Title => "title",
            ItemColumn::EntityType => "entity_type",
            ItemColumn::ModuleId => "moduleid",
            ItemColumn::PublishedEnvironment => "published_environment",
            ItemColumn::AddedOn => "added_on",
            ItemColumn::AddedBy => "added_by",
            ItemColumn::ChangedOn => "changed_on",
            ItemColumn::ChangedBy => "changed_by",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_columns_are_case_insensitive() {
        assert_eq!(Field::new("Title").item_column(), Some(ItemColumn::Title));
        assert_eq!(Field::new("price").item_column(), None);
    }

    #[test]
    fn test_effective_language() {
        let plain = Field::new("description");
        assert_eq!(plain.effective_language(Some("nl")), Some("nl"));
        assert_eq!(plain.effective_language(None), None);

        let english = Field::new("description").with_language("en");
        assert_eq!(english.effective_language(Some("nl")), Some("en"));

        // item columns ignore languages
        assert_eq!(Field::new("title").effective_language(Some("nl")), None);
    }

    #[test]
    fn test_output_name_prefers_alias() {
        assert_eq!(Field::new("price").output_name(), "price");
        assert_eq!(Field::new("price").with_alias("cost").output_name(), "cost");
    }
}
