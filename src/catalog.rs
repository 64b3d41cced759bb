use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which part of a fetched page a signature matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Channel {
    Html,
    ScriptUrl,
    Header { name: String },
    InlineScript,
}

/// A single fingerprint rule: pattern -> technology -> weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub channel: Channel,
    pub pattern: String,
    pub weight: u32,
    /// When set, the pattern's first capture group is collected as a portal id.
    #[serde(default)]
    pub extracts_portal_id: bool,
}

/// All signatures for one technology, plus its value tier and category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechEntry {
    pub technology: String,
    pub tier: u8,
    pub category: String,
    pub signatures: Vec<Signature>,
}

/// The signature catalog. Declaration order of entries is the catalog order
/// used as the final tie-break when ranking detected technologies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureCatalog {
    pub entries: Vec<TechEntry>,
}

impl SignatureCatalog {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read catalog {}: {}", path.display(), e))?;
        let catalog: SignatureCatalog = serde_yaml::from_str(&content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Compile every pattern once to surface bad regexes at load time.
    pub fn validate(&self) -> anyhow::Result<()> {
        for entry in &self.entries {
            if entry.tier == 0 || entry.tier > 5 {
                anyhow::bail!(
                    "Technology '{}' has tier {} (must be 1-5)",
                    entry.technology,
                    entry.tier
                );
            }
            if entry.signatures.is_empty() {
                anyhow::bail!("Technology '{}' has no signatures", entry.technology);
            }
            for sig in &entry.signatures {
                if sig.weight == 0 {
                    anyhow::bail!("Signature '{}' has zero weight", sig.name);
                }
                RegexBuilder::new(&sig.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        anyhow::anyhow!("Invalid pattern in signature '{}': {}", sig.name, e)
                    })?;
            }
        }
        Ok(())
    }

    pub fn entry(&self, technology: &str) -> Option<&TechEntry> {
        self.entries.iter().find(|e| e.technology == technology)
    }

    pub fn tier_of(&self, technology: &str) -> Option<u8> {
        self.entry(technology).map(|e| e.tier)
    }

    pub fn category_of(&self, technology: &str) -> Option<&str> {
        self.entry(technology).map(|e| e.category.as_str())
    }

    /// Position in declaration order; unknown technologies sort last.
    pub fn order_of(&self, technology: &str) -> usize {
        self.entries
            .iter()
            .position(|e| e.technology == technology)
            .unwrap_or(usize::MAX)
    }

    /// Default noise floor for a technology: its smallest declared signature
    /// weight, so one strong signal is sufficient and weak signals must sum.
    pub fn min_signature_weight(&self, technology: &str) -> u32 {
        self.entry(technology)
            .map(|e| e.signatures.iter().map(|s| s.weight).min().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn technology_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.technology.clone()).collect()
    }

    /// Built-in catalog covering the marketing/CRM/ecommerce stack.
    pub fn builtin() -> Self {
        let mut entries = Vec::new();

        entries.push(TechEntry {
            technology: "HubSpot".to_string(),
            tier: 5,
            category: "Marketing Automation".to_string(),
            signatures: vec![
                script("hs-script-loader", r"js\.hs-scripts\.com/(\d+)\.js", 30, true),
                script("hs-analytics", r"js\.hs-analytics\.net", 25, false),
                script("hs-forms", r"js\.hsforms\.net", 25, false),
                script("hs-cta", r"js\.hscta\.net", 20, false),
                html("hs-cos-wrapper", r"hs-cos-wrapper", 25),
                html("hubfs-assets", r"/hubfs/", 15),
                header("hs-hub-header", "x-hs-hub-id", r".+", 30),
                inline("hsq-queue", r"_hsq\s*=", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Salesforce".to_string(),
            tier: 5,
            category: "CRM".to_string(),
            signatures: vec![
                script("force-cdn", r"\.force\.com", 30, false),
                script("salesforce-script", r"salesforce\.com", 25, false),
                inline("sfdc-app", r"SfdcApp|sforce", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Marketo".to_string(),
            tier: 5,
            category: "Marketing Automation".to_string(),
            signatures: vec![
                script("munchkin", r"munchkin\.marketo\.net", 30, false),
                html("mkto-form", r"mktoForm", 20),
                inline("mkto-forms2", r"MktoForms2", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Magento".to_string(),
            tier: 5,
            category: "Ecommerce".to_string(),
            signatures: vec![
                script("mage-static", r"/static/version\d+/", 25, false),
                html("mage-translation", r"mage-translation", 20),
                header("magento-header", "x-magento-", r".+", 30),
                inline("mage-js", r"Mage\.", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Segment".to_string(),
            tier: 5,
            category: "Customer Data Platform".to_string(),
            signatures: vec![
                script("segment-cdn", r"cdn\.segment\.com", 30, false),
                inline("analytics-track", r"analytics\.(identify|track)\(", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Shopify".to_string(),
            tier: 4,
            category: "Ecommerce".to_string(),
            signatures: vec![
                script("shopify-cdn", r"cdn\.shopify\.com", 30, false),
                html("shopify-theme", r"Shopify\.theme", 20),
                header("shopify-header", "x-shopify-", r".+", 30),
                inline("shopify-analytics", r"ShopifyAnalytics", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "BigCommerce".to_string(),
            tier: 4,
            category: "Ecommerce".to_string(),
            signatures: vec![
                script("bigcommerce-cdn", r"cdn\d*\.bcapp|bigcommerce\.com", 30, false),
                header("bc-header", "x-bc-", r".+", 25),
            ],
        });

        entries.push(TechEntry {
            technology: "Stripe".to_string(),
            tier: 4,
            category: "Payment Processor".to_string(),
            signatures: vec![
                script("stripe-js", r"js\.stripe\.com", 30, false),
                inline("stripe-init", r"Stripe\(", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "PayPal".to_string(),
            tier: 4,
            category: "Payment Processor".to_string(),
            signatures: vec![
                script("paypal-sdk", r"paypal\.com/sdk|paypalobjects\.com", 30, false),
                inline("paypal-js", r"paypal\.Buttons", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Klaviyo".to_string(),
            tier: 4,
            category: "Email Marketing".to_string(),
            signatures: vec![
                script("klaviyo-static", r"static\.klaviyo\.com", 30, false),
                inline("learnq", r"_learnq", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Mixpanel".to_string(),
            tier: 4,
            category: "Analytics".to_string(),
            signatures: vec![
                script("mixpanel-cdn", r"cdn\.mxpnl\.com", 30, false),
                inline("mixpanel-js", r"mixpanel\.(init|track)", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "WordPress".to_string(),
            tier: 3,
            category: "CMS".to_string(),
            signatures: vec![
                script("wp-content", r"/wp-content/", 25, false),
                html("wp-includes", r"wp-includes|wp-json", 20),
                header("wp-link-header", "link", r"wp-json", 20),
            ],
        });

        entries.push(TechEntry {
            technology: "WooCommerce".to_string(),
            tier: 3,
            category: "Ecommerce".to_string(),
            signatures: vec![
                script("woo-plugin", r"/plugins/woocommerce/", 30, false),
                html("woo-class", r"woocommerce-page|wc-block", 20),
            ],
        });

        entries.push(TechEntry {
            technology: "Mailchimp".to_string(),
            tier: 3,
            category: "Email Marketing".to_string(),
            signatures: vec![
                script("chimp-static", r"chimpstatic\.com|list-manage\.com", 30, false),
                html("mc-embedded", r"mc-embedded-subscribe", 20),
            ],
        });

        entries.push(TechEntry {
            technology: "Intercom".to_string(),
            tier: 3,
            category: "Live Chat".to_string(),
            signatures: vec![
                script("intercom-widget", r"widget\.intercom\.io", 30, false),
                inline("intercom-settings", r"intercomSettings", 15),
            ],
        });

        entries.push(TechEntry {
            technology: "Webflow".to_string(),
            tier: 3,
            category: "CMS".to_string(),
            signatures: vec![
                html("wf-attributes", r"data-wf-(site|page)", 25),
                script("webflow-assets", r"assets\.website-files\.com", 25, false),
            ],
        });

        entries.push(TechEntry {
            technology: "Cloudflare".to_string(),
            tier: 2,
            category: "Infrastructure".to_string(),
            signatures: vec![
                header("cf-ray", "cf-ray", r".+", 25),
                header("cf-server", "server", r"cloudflare", 20),
            ],
        });

        entries.push(TechEntry {
            technology: "nginx".to_string(),
            tier: 2,
            category: "Web Server".to_string(),
            signatures: vec![header("nginx-server", "server", r"nginx", 20)],
        });

        entries.push(TechEntry {
            technology: "Google Analytics".to_string(),
            tier: 1,
            category: "Analytics".to_string(),
            signatures: vec![
                script("gtag-js", r"googletagmanager\.com/gtag/js", 25, false),
                script("ga-legacy", r"google-analytics\.com/analytics\.js", 25, false),
                inline("gtag-call", r"gtag\(", 10),
            ],
        });

        entries.push(TechEntry {
            technology: "Hotjar".to_string(),
            tier: 1,
            category: "Analytics".to_string(),
            signatures: vec![
                script("hotjar-static", r"static\.hotjar\.com", 25, false),
                inline("hj-settings", r"_hjSettings", 10),
            ],
        });

        SignatureCatalog { entries }
    }
}

impl Default for SignatureCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn script(name: &str, pattern: &str, weight: u32, extracts_portal_id: bool) -> Signature {
    Signature {
        name: name.to_string(),
        channel: Channel::ScriptUrl,
        pattern: pattern.to_string(),
        weight,
        extracts_portal_id,
    }
}

fn html(name: &str, pattern: &str, weight: u32) -> Signature {
    Signature {
        name: name.to_string(),
        channel: Channel::Html,
        pattern: pattern.to_string(),
        weight,
        extracts_portal_id: false,
    }
}

fn header(name: &str, header_name: &str, pattern: &str, weight: u32) -> Signature {
    Signature {
        name: name.to_string(),
        channel: Channel::Header {
            name: header_name.to_string(),
        },
        pattern: pattern.to_string(),
        weight,
        extracts_portal_id: false,
    }
}

fn inline(name: &str, pattern: &str, weight: u32) -> Signature {
    Signature {
        name: name.to_string(),
        channel: Channel::InlineScript,
        pattern: pattern.to_string(),
        weight,
        extracts_portal_id: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_validates() {
        let catalog = SignatureCatalog::builtin();
        catalog.validate().unwrap();
        assert!(catalog.entries.len() >= 15);
    }

    #[test]
    fn test_tier_and_category_lookup() {
        let catalog = SignatureCatalog::builtin();
        assert_eq!(catalog.tier_of("HubSpot"), Some(5));
        assert_eq!(catalog.tier_of("nginx"), Some(2));
        assert_eq!(catalog.tier_of("NotATech"), None);
        assert_eq!(catalog.category_of("Shopify"), Some("Ecommerce"));
    }

    #[test]
    fn test_catalog_order_is_declaration_order() {
        let catalog = SignatureCatalog::builtin();
        assert!(catalog.order_of("HubSpot") < catalog.order_of("Shopify"));
        assert!(catalog.order_of("Shopify") < catalog.order_of("Hotjar"));
        assert_eq!(catalog.order_of("NotATech"), usize::MAX);
    }

    #[test]
    fn test_min_signature_weight() {
        let catalog = SignatureCatalog::builtin();
        // HubSpot's weakest signal is the inline _hsq queue at 15.
        assert_eq!(catalog.min_signature_weight("HubSpot"), 15);
        assert_eq!(catalog.min_signature_weight("nginx"), 20);
        assert_eq!(catalog.min_signature_weight("NotATech"), 0);
    }

    #[test]
    fn test_validate_rejects_bad_tier() {
        let mut catalog = SignatureCatalog::builtin();
        catalog.entries[0].tier = 9;
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let catalog = SignatureCatalog::builtin();
        let yaml = serde_yaml::to_string(&catalog).unwrap();
        let parsed: SignatureCatalog = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.entries.len(), catalog.entries.len());
        parsed.validate().unwrap();
    }
}
