use indexmap::IndexMap;

/// Identifier of the reserved style whose prompt fragment is supplied by the
/// user instead of the catalog.
pub const CUSTOM_STYLE_ID: &str = "custom";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub prompt_modifier: String,
}

impl StyleSpec {
    pub fn is_custom(&self) -> bool {
        self.id == CUSTOM_STYLE_ID
    }

    /// Resolve the prompt fragment used to steer generation. Fixed styles
    /// carry their own fragment; the custom style requires non-empty user
    /// text and returns `None` without it.
    pub fn resolve_prompt(&self, custom_text: &str) -> Option<String> {
        if self.is_custom() {
            let trimmed = custom_text.trim();
            if trimmed.is_empty() {
                return None;
            }
            return Some(format!(
                "professional headshot, {trimmed}, high quality, photorealistic"
            ));
        }
        Some(self.prompt_modifier.clone())
    }
}

#[derive(Debug, Clone)]
pub struct StyleCatalog {
    styles: IndexMap<String, StyleSpec>,
}

impl StyleCatalog {
    pub fn new(styles: Option<IndexMap<String, StyleSpec>>) -> Self {
        Self {
            styles: styles.unwrap_or_else(default_styles),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StyleSpec> {
        self.styles.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &StyleSpec> {
        self.styles.values()
    }
}

impl Default for StyleCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_styles() -> IndexMap<String, StyleSpec> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str, name: &str, description: &str, prompt_modifier: &str| {
        map.insert(
            id.to_string(),
            StyleSpec {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                prompt_modifier: prompt_modifier.to_string(),
            },
        );
    };

    insert(
        "corporate",
        "Corporate Grey",
        "Clean, professional studio look with a neutral grey backdrop.",
        "professional corporate headshot, wearing a business suit, neutral grey studio background, soft studio lighting, high quality, photorealistic",
    );
    insert(
        "tech_office",
        "Modern Tech",
        "Smart casual look in a modern, open-plan office environment.",
        "modern professional headshot, wearing smart casual tech attire, blurred modern open office background with glass and plants, bright natural lighting, photorealistic",
    );
    insert(
        "academic",
        "Academic Library",
        "Intellectual vibe with a blurred library or bookshelf background.",
        "professional academic headshot, wearing smart blazer or tweed jacket, blurred library bookshelf background, warm lighting, intellectual look, photorealistic",
    );
    insert(
        "medical",
        "Medical / Clinical",
        "Clean, trustworthy look suitable for healthcare professionals.",
        "professional medical headshot, wearing white lab coat or scrubs, clean bright clinical background, soft lighting, trustworthy expression, photorealistic",
    );
    insert(
        "real_estate",
        "Luxury Interior",
        "Bright, welcoming look with a modern luxury home backdrop.",
        "professional real estate agent headshot, wearing smart business attire, blurred luxury modern home interior background, bright welcoming lighting, high key",
    );
    insert(
        "cafe",
        "Coffee Shop",
        "Relaxed, remote-work friendly atmosphere in a cozy cafe.",
        "casual professional headshot, wearing smart casual clothes, blurred coffee shop background with warm ambient lights, relaxed atmosphere, bokeh",
    );
    insert(
        "speaker",
        "Keynote Speaker",
        "Dynamic stage lighting for thought leaders and presenters.",
        "professional headshot as a keynote speaker, wearing smart attire, blurred dark stage background with purple and blue spotlight bokeh, confident pose, dramatic lighting",
    );
    insert(
        "outdoor",
        "Outdoor Natural",
        "Approachable and friendly vibe with soft outdoor lighting.",
        "professional outdoor headshot, wearing business casual, blurred park or city garden background, golden hour sunlight, bokeh effect, warm tones, photorealistic",
    );
    insert(
        "startup",
        "Startup Creative",
        "Energetic and creative look with a colorful urban backdrop.",
        "creative professional headshot, wearing stylish casual clothes, colorful urban brick wall or artistic office background, dynamic lighting, sharp focus",
    );
    insert(
        "black_white",
        "Dramatic B&W",
        "Timeless and serious black and white portrait.",
        "black and white professional headshot, dramatic contrast lighting, studio black background, serious and elegant expression, noir style",
    );
    insert(
        "custom",
        "Custom Style",
        "Describe your own unique setting, lighting, and attire.",
        "",
    );

    map
}

#[cfg(test)]
mod tests {
    use super::{StyleCatalog, CUSTOM_STYLE_ID};

    #[test]
    fn catalog_lists_custom_last() {
        let catalog = StyleCatalog::default();
        let ids: Vec<&str> = catalog.list().map(|style| style.id.as_str()).collect();
        assert_eq!(ids.first().copied(), Some("corporate"));
        assert_eq!(ids.last().copied(), Some(CUSTOM_STYLE_ID));
        assert_eq!(ids.len(), 11);
    }

    #[test]
    fn fixed_style_resolves_its_own_fragment() {
        let catalog = StyleCatalog::default();
        let style = catalog.get("black_white").expect("missing style");
        let prompt = style.resolve_prompt("ignored").expect("fixed prompt");
        assert!(prompt.contains("black and white professional headshot"));
    }

    #[test]
    fn custom_style_requires_user_text() {
        let catalog = StyleCatalog::default();
        let style = catalog.get(CUSTOM_STYLE_ID).expect("missing custom style");
        assert_eq!(style.resolve_prompt(""), None);
        assert_eq!(style.resolve_prompt("   "), None);

        let prompt = style
            .resolve_prompt("on a sailboat at dusk")
            .expect("custom prompt");
        assert_eq!(
            prompt,
            "professional headshot, on a sailboat at dusk, high quality, photorealistic"
        );
    }

    #[test]
    fn unknown_style_is_absent() {
        let catalog = StyleCatalog::default();
        assert!(catalog.get("vaporwave").is_none());
    }
}
