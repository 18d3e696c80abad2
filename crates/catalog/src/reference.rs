//! Seed rows for the category and license pickers.

use crate::model::{Category, License};

// (name, description, icon, color)
const CATEGORIES: &[(&str, &str, &str, &str)] = &[
    ("biodiversity", "Biodiversity and wildlife data", "🌿", "#27ae60"),
    ("climate", "Climate and weather data", "🌤️", "#3498db"),
    ("agriculture", "Agricultural and farming data", "🌾", "#f39c12"),
    ("forestry", "Forest and woodland data", "🌲", "#8e44ad"),
    ("water", "Water resources and hydrology", "💧", "#2980b9"),
    ("urban", "Urban and city planning data", "🏙️", "#34495e"),
    ("transportation", "Transportation and infrastructure", "🚗", "#e67e22"),
    ("energy", "Energy and renewable resources", "⚡", "#f1c40f"),
    ("geology", "Geological and soil data", "🏔️", "#95a5a6"),
    ("ocean", "Ocean and marine data", "🌊", "#1abc9c"),
    ("demographics", "Population and demographic data", "👥", "#e74c3c"),
    ("general", "General purpose data", "📊", "#7f8c8d"),
];

// (name, description, url, is_open)
const LICENSES: &[(&str, &str, &str, bool)] = &[
    (
        "CC BY 4.0",
        "Creative Commons Attribution 4.0 International",
        "https://creativecommons.org/licenses/by/4.0/",
        true,
    ),
    (
        "CC BY-SA 4.0",
        "Creative Commons Attribution-ShareAlike 4.0 International",
        "https://creativecommons.org/licenses/by-sa/4.0/",
        true,
    ),
    (
        "CC BY-NC 4.0",
        "Creative Commons Attribution-NonCommercial 4.0 International",
        "https://creativecommons.org/licenses/by-nc/4.0/",
        true,
    ),
    (
        "CC0 1.0",
        "Creative Commons Zero 1.0 Universal",
        "https://creativecommons.org/publicdomain/zero/1.0/",
        true,
    ),
    (
        "Open Data Commons Open Database License (ODbL)",
        "Open Database License for open data",
        "https://opendatacommons.org/licenses/odbl/",
        true,
    ),
    (
        "Open Data Commons Attribution License (ODC-By)",
        "Attribution License for open data",
        "https://opendatacommons.org/licenses/by/",
        true,
    ),
    (
        "GNU General Public License v3.0",
        "GNU General Public License version 3",
        "https://www.gnu.org/licenses/gpl-3.0.html",
        true,
    ),
    (
        "MIT License",
        "MIT License for software and data",
        "https://opensource.org/licenses/MIT",
        true,
    ),
    (
        "Apache License 2.0",
        "Apache License version 2.0",
        "https://www.apache.org/licenses/LICENSE-2.0",
        true,
    ),
    ("Proprietary", "Proprietary license - restricted use", "", false),
    ("All Rights Reserved", "All rights reserved - no public use", "", false),
];

pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_LICENSE: &str = "CC BY 4.0";

pub fn default_categories() -> Vec<Category> {
    CATEGORIES
        .iter()
        .map(|(name, description, icon, color)| Category {
            name: name.to_string(),
            description: Some(description.to_string()),
            icon: Some(icon.to_string()),
            color: Some(color.to_string()),
        })
        .collect()
}

pub fn default_licenses() -> Vec<License> {
    LICENSES
        .iter()
        .map(|(name, description, url, is_open)| License {
            name: name.to_string(),
            description: Some(description.to_string()),
            url: (!url.is_empty()).then(|| url.to_string()),
            is_open: *is_open,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_seeded() {
        let cats = default_categories();
        assert_eq!(cats.len(), 12);
        assert!(cats.iter().any(|c| c.name == DEFAULT_CATEGORY));

        let lics = default_licenses();
        assert_eq!(lics.len(), 11);
        assert!(lics.iter().any(|l| l.name == DEFAULT_LICENSE && l.is_open));
        assert!(lics.iter().filter(|l| !l.is_open).all(|l| l.url.is_none()));
    }
}
