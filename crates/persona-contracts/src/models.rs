use indexmap::IndexMap;

pub const DEFAULT_MODEL_ID: &str = "gemini-2.5-flash-image";
pub const PREMIUM_MODEL_ID: &str = "gemini-3-pro-image-preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub name: String,
    pub badge: String,
    pub description: String,
}

impl ModelSpec {
    /// The premium variant needs a billing-enabled credential; a 403 against
    /// it gets the tier-specific permission message.
    pub fn is_premium(&self) -> bool {
        self.id == PREMIUM_MODEL_ID
    }
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: IndexMap<String, ModelSpec>,
}

impl ModelCatalog {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn is_premium(&self, id: &str) -> bool {
        self.get(id).map(ModelSpec::is_premium).unwrap_or(false)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, name: &str, badge: &str, description: &str| {
        map.insert(
            id.to_string(),
            ModelSpec {
                id: id.to_string(),
                name: name.to_string(),
                badge: badge.to_string(),
                description: description.to_string(),
            },
        );
    };

    insert(
        DEFAULT_MODEL_ID,
        "Standard",
        "Flash",
        "Fast generation (seconds). Good for quick ideas.",
    );
    insert(
        PREMIUM_MODEL_ID,
        "Pro",
        "Paid Key",
        "Highest quality. Requires a billing-enabled API key.",
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelCatalog, DEFAULT_MODEL_ID, PREMIUM_MODEL_ID};

    #[test]
    fn default_model_is_listed_first() {
        let catalog = ModelCatalog::default();
        let ids: Vec<&str> = catalog.list().map(|model| model.id.as_str()).collect();
        assert_eq!(ids, vec![DEFAULT_MODEL_ID, PREMIUM_MODEL_ID]);
    }

    #[test]
    fn only_the_pro_variant_is_premium() {
        let catalog = ModelCatalog::default();
        assert!(!catalog.is_premium(DEFAULT_MODEL_ID));
        assert!(catalog.is_premium(PREMIUM_MODEL_ID));
        assert!(!catalog.is_premium("unknown-model"));
    }
}
