use serde::Serialize;

/// Built-in restyle presets. A preset carries a ready-to-send instruction
/// and bypasses the Director's intent classification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOption {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

pub const DESIGN_STYLES: [StyleOption; 6] = [
    StyleOption {
        id: "modern-minimalist",
        name: "Modern Minimalist",
        description: "Clean lines, neutral palette, clutter-free aesthetic.",
        prompt: "Redesign the room in a modern minimalist style, clean lines, neutral colors, decluttered, sleek furniture, soft natural lighting, architectural simplicity",
    },
    StyleOption {
        id: "scandinavian-warm",
        name: "Scandinavian Warm",
        description: "Cozy textures, light woods, airy hygge feel.",
        prompt: "Redesign the room in a Scandinavian style, hygge atmosphere, light wood textures, cozy textiles, white walls, warm lighting, functional decor, organic shapes",
    },
    StyleOption {
        id: "luxury-contemporary",
        name: "Luxury Contemporary",
        description: "High-end finishes, bold accents, polished look.",
        prompt: "Redesign the room in a luxury contemporary style, high-end finishes, marble accents, velvet textures, gold hardware, dramatic lighting, sophisticated, expensive look",
    },
    StyleOption {
        id: "japandi-calm",
        name: "Japandi Calm",
        description: "Fusion of Japanese rustic & Scandinavian.",
        prompt: "Redesign the room in a Japandi style, fusion of Japanese and Scandinavian aesthetics, natural materials, earth tones, low profile furniture, zen atmosphere, wabi-sabi",
    },
    StyleOption {
        id: "industrial-chic",
        name: "Industrial Chic",
        description: "Exposed raw elements, metal, leather, urban.",
        prompt: "Redesign the room in an industrial chic style, exposed brick, metal accents, leather furniture, raw materials, urban loft aesthetic, dramatic shadows, statement lighting",
    },
    StyleOption {
        id: "bohemian-eclectic",
        name: "Bohemian Eclectic",
        description: "Layered patterns, plants, vibrant & artistic.",
        prompt: "Redesign the room in a bohemian eclectic style, layered patterns, abundant indoor plants, rattan furniture, warm colors, artistic decor, relaxed atmosphere, textured rugs",
    },
];

pub fn find_style(id: &str) -> Option<&'static StyleOption> {
    DESIGN_STYLES.iter().find(|style| style.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_ids_are_unique() {
        let mut ids: Vec<&str> = DESIGN_STYLES.iter().map(|style| style.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), DESIGN_STYLES.len());
    }

    #[test]
    fn lookup_finds_known_styles() {
        assert!(find_style("japandi-calm").is_some());
        assert!(find_style("brutalist").is_none());
    }
}
