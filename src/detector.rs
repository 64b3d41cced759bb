use crate::catalog::{Channel, SignatureCatalog};

use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashMap};

/// Normalized content bundle for one fetched site. Channels that were not
/// available (no headers, no inline scripts) stay empty and simply match
/// nothing.
#[derive(Debug, Default, Clone)]
pub struct PageBundle {
    pub html: String,
    pub headers: HashMap<String, String>,
    pub script_urls: Vec<String>,
    pub inline_scripts: Vec<String>,
}

impl PageBundle {
    pub fn from_html(html: &str) -> Self {
        PageBundle {
            html: html.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
            && self.headers.is_empty()
            && self.script_urls.is_empty()
            && self.inline_scripts.is_empty()
    }
}

/// Outcome of running the catalog against one page bundle.
#[derive(Debug, Default, Clone)]
pub struct Detection {
    /// Summed signature weight per detected technology.
    pub technologies: BTreeMap<String, u32>,
    /// Names of the signatures that matched, for scan records and debugging.
    pub matched_signatures: Vec<String>,
    /// Portal ids captured by extractor signatures, first-seen order.
    pub portal_ids: Vec<String>,
}

/// Applies the signature catalog to fetched page content. Pure function of
/// the bundle; absence of matches yields an empty map, not an error.
pub struct Detector {
    catalog: SignatureCatalog,
    compiled_patterns: HashMap<String, Regex>,
    /// Global noise floor override; None uses each technology's smallest
    /// declared signature weight.
    floor_override: Option<u32>,
}

impl Detector {
    pub fn new(catalog: SignatureCatalog, floor_override: Option<u32>) -> anyhow::Result<Self> {
        let mut compiled_patterns = HashMap::new();
        for entry in &catalog.entries {
            for sig in &entry.signatures {
                if !compiled_patterns.contains_key(&sig.pattern) {
                    let regex = RegexBuilder::new(&sig.pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            anyhow::anyhow!("Invalid pattern in signature '{}': {}", sig.name, e)
                        })?;
                    compiled_patterns.insert(sig.pattern.clone(), regex);
                }
            }
        }
        Ok(Detector {
            catalog,
            compiled_patterns,
            floor_override,
        })
    }

    pub fn catalog(&self) -> &SignatureCatalog {
        &self.catalog
    }

    /// Sum the weight of every matching signature per technology, then drop
    /// technologies whose total stays below the noise floor.
    pub fn detect(&self, bundle: &PageBundle) -> Detection {
        let mut detection = Detection::default();

        // Header names are matched by lowercase prefix, so x-shopify- covers
        // x-shopify-stage and friends.
        let headers_lower: HashMap<String, &str> = bundle
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();

        for entry in &self.catalog.entries {
            let mut total: u32 = 0;

            for sig in &entry.signatures {
                let regex = match self.compiled_patterns.get(&sig.pattern) {
                    Some(r) => r,
                    None => continue,
                };

                let matched = match &sig.channel {
                    Channel::Html => regex.is_match(&bundle.html),
                    Channel::ScriptUrl => bundle.script_urls.iter().any(|u| regex.is_match(u)),
                    Channel::InlineScript => {
                        bundle.inline_scripts.iter().any(|s| regex.is_match(s))
                    }
                    Channel::Header { name } => {
                        let wanted = name.to_lowercase();
                        headers_lower
                            .iter()
                            .any(|(h, v)| h.starts_with(&wanted) && regex.is_match(v))
                    }
                };

                if matched {
                    total += sig.weight;
                    detection.matched_signatures.push(sig.name.clone());
                    if sig.extracts_portal_id {
                        self.capture_portal_ids(regex, &sig.channel, bundle, &mut detection);
                    }
                }
            }

            let floor = self
                .floor_override
                .unwrap_or_else(|| self.catalog.min_signature_weight(&entry.technology));
            if total > 0 && total >= floor {
                detection
                    .technologies
                    .insert(entry.technology.clone(), total);
            } else if total > 0 {
                log::debug!(
                    "Dropping {} (weight {} below floor {})",
                    entry.technology,
                    total,
                    floor
                );
            }
        }

        detection
    }

    fn capture_portal_ids(
        &self,
        regex: &Regex,
        channel: &Channel,
        bundle: &PageBundle,
        detection: &mut Detection,
    ) {
        let texts: Vec<&str> = match channel {
            Channel::Html => vec![bundle.html.as_str()],
            Channel::ScriptUrl => bundle.script_urls.iter().map(|s| s.as_str()).collect(),
            Channel::InlineScript => bundle.inline_scripts.iter().map(|s| s.as_str()).collect(),
            Channel::Header { .. } => bundle.headers.values().map(|s| s.as_str()).collect(),
        };
        for text in texts {
            for caps in regex.captures_iter(text) {
                if let Some(id) = caps.get(1) {
                    let id = id.as_str().to_string();
                    if !detection.portal_ids.contains(&id) {
                        detection.portal_ids.push(id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Signature, TechEntry};

    fn one_tech_catalog(weight: u32) -> SignatureCatalog {
        SignatureCatalog {
            entries: vec![TechEntry {
                technology: "Shopify".to_string(),
                tier: 4,
                category: "Ecommerce".to_string(),
                signatures: vec![Signature {
                    name: "shopify-cdn".to_string(),
                    channel: Channel::ScriptUrl,
                    pattern: r"cdn\.shopify\.com".to_string(),
                    weight,
                    extracts_portal_id: false,
                }],
            }],
        }
    }

    #[test]
    fn test_single_strong_signal_detects() {
        let detector = Detector::new(one_tech_catalog(30), None).unwrap();
        let bundle = PageBundle {
            script_urls: vec!["https://cdn.shopify.com/s/files/theme.js".to_string()],
            ..Default::default()
        };
        let detection = detector.detect(&bundle);
        assert_eq!(detection.technologies.get("Shopify"), Some(&30));
    }

    #[test]
    fn test_no_match_yields_no_entry() {
        let detector = Detector::new(one_tech_catalog(30), None).unwrap();
        let detection = detector.detect(&PageBundle::from_html("<html></html>"));
        assert!(detection.technologies.is_empty());
    }

    #[test]
    fn test_weak_signals_sum_across_channels() {
        let catalog = SignatureCatalog {
            entries: vec![TechEntry {
                technology: "HubSpot".to_string(),
                tier: 5,
                category: "Marketing Automation".to_string(),
                signatures: vec![
                    Signature {
                        name: "hs-wrapper".to_string(),
                        channel: Channel::Html,
                        pattern: r"hs-cos-wrapper".to_string(),
                        weight: 25,
                        extracts_portal_id: false,
                    },
                    Signature {
                        name: "hsq".to_string(),
                        channel: Channel::InlineScript,
                        pattern: r"_hsq\s*=".to_string(),
                        weight: 15,
                        extracts_portal_id: false,
                    },
                ],
            }],
        };
        let detector = Detector::new(catalog, None).unwrap();
        let bundle = PageBundle {
            html: "<div class=\"hs-cos-wrapper\"></div>".to_string(),
            inline_scripts: vec!["var _hsq = window._hsq || [];".to_string()],
            ..Default::default()
        };
        let detection = detector.detect(&bundle);
        assert_eq!(detection.technologies.get("HubSpot"), Some(&40));
    }

    #[test]
    fn test_floor_override_drops_weak_totals() {
        let detector = Detector::new(one_tech_catalog(10), Some(25)).unwrap();
        let bundle = PageBundle {
            script_urls: vec!["https://cdn.shopify.com/a.js".to_string()],
            ..Default::default()
        };
        assert!(detector.detect(&bundle).technologies.is_empty());
    }

    #[test]
    fn test_header_prefix_match_is_case_insensitive() {
        let catalog = SignatureCatalog {
            entries: vec![TechEntry {
                technology: "Shopify".to_string(),
                tier: 4,
                category: "Ecommerce".to_string(),
                signatures: vec![Signature {
                    name: "shopify-header".to_string(),
                    channel: Channel::Header {
                        name: "x-shopify-".to_string(),
                    },
                    pattern: r".+".to_string(),
                    weight: 30,
                    extracts_portal_id: false,
                }],
            }],
        };
        let detector = Detector::new(catalog, None).unwrap();
        let mut bundle = PageBundle::default();
        bundle
            .headers
            .insert("X-Shopify-Stage".to_string(), "production".to_string());
        let detection = detector.detect(&bundle);
        assert_eq!(detection.technologies.get("Shopify"), Some(&30));
    }

    #[test]
    fn test_portal_id_extraction() {
        let catalog = SignatureCatalog {
            entries: vec![TechEntry {
                technology: "HubSpot".to_string(),
                tier: 5,
                category: "Marketing Automation".to_string(),
                signatures: vec![Signature {
                    name: "hs-script-loader".to_string(),
                    channel: Channel::ScriptUrl,
                    pattern: r"js\.hs-scripts\.com/(\d+)\.js".to_string(),
                    weight: 30,
                    extracts_portal_id: true,
                }],
            }],
        };
        let detector = Detector::new(catalog, None).unwrap();
        let bundle = PageBundle {
            script_urls: vec![
                "https://js.hs-scripts.com/4812345.js".to_string(),
                "https://js.hs-scripts.com/4812345.js?v=2".to_string(),
            ],
            ..Default::default()
        };
        let detection = detector.detect(&bundle);
        assert_eq!(detection.portal_ids, vec!["4812345".to_string()]);
    }

    #[test]
    fn test_missing_channels_tolerated() {
        let detector = Detector::new(SignatureCatalog::builtin(), None).unwrap();
        let detection = detector.detect(&PageBundle::default());
        assert!(detection.technologies.is_empty());
        assert!(detection.portal_ids.is_empty());
    }
}
