use crate::catalog::SignatureCatalog;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many supporting technologies a profile keeps after the main one.
pub const SUPPORTING_CAP: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTechnology {
    pub technology: String,
    pub tier: u8,
    pub category: String,
    pub confidence: u32,
}

/// Ranked view of one scan's detections. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnologyProfile {
    pub domain: String,
    pub detected: BTreeMap<String, u32>,
    pub scored: Vec<ScoredTechnology>,
    pub main_technology: Option<String>,
    pub supporting_technologies: Vec<String>,
}

impl TechnologyProfile {
    pub fn empty(domain: &str) -> Self {
        TechnologyProfile {
            domain: domain.to_string(),
            detected: BTreeMap::new(),
            scored: Vec::new(),
            main_technology: None,
            supporting_technologies: Vec::new(),
        }
    }
}

/// Rank detected technologies by (tier desc, confidence desc, catalog order
/// asc) and split into main + supporting. Deterministic: no randomness, no
/// clock.
pub fn score(
    domain: &str,
    detected: &BTreeMap<String, u32>,
    catalog: &SignatureCatalog,
) -> TechnologyProfile {
    let mut scored: Vec<ScoredTechnology> = detected
        .iter()
        .map(|(tech, confidence)| ScoredTechnology {
            technology: tech.clone(),
            // Detected but unknown to the taxonomy still counts, at the
            // bottom tier.
            tier: catalog.tier_of(tech).unwrap_or(1),
            category: catalog
                .category_of(tech)
                .unwrap_or("Technology")
                .to_string(),
            confidence: *confidence,
        })
        .collect();

    scored.sort_by(|a, b| {
        b.tier
            .cmp(&a.tier)
            .then(b.confidence.cmp(&a.confidence))
            .then(catalog.order_of(&a.technology).cmp(&catalog.order_of(&b.technology)))
    });

    let main_technology = scored.first().map(|s| s.technology.clone());
    let supporting_technologies = scored
        .iter()
        .skip(1)
        .take(SUPPORTING_CAP)
        .map(|s| s.technology.clone())
        .collect();

    TechnologyProfile {
        domain: domain.to_string(),
        detected: detected.clone(),
        scored,
        main_technology,
        supporting_technologies,
    }
}
