use crate::catalog::SignatureCatalog;
use crate::emails::default_generic_prefixes;
use crate::variants::VariantCatalog;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// A named sender identity bound to one sending inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub role: String,
    pub tone: String,
    pub inbox: String,
    /// Overrides the global per-inbox cap for this inbox.
    #[serde(default)]
    pub daily_cap: Option<u32>,
}

/// Shared sender identity woven into every message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: String,
    pub location: String,
    pub hourly_rate: String,
    pub booking_url: String,
}

impl Default for CompanyProfile {
    fn default() -> Self {
        CompanyProfile {
            name: "FixBridge".to_string(),
            location: "Austin, TX".to_string(),
            hourly_rate: "$85/hr".to_string(),
            booking_url: "https://calendly.com/fixbridge/intro".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ledger_path: String,
    pub disposable_blocklist_path: String,
    /// Optional YAML signature catalog; the built-in catalog is used when
    /// unset.
    #[serde(default)]
    pub catalog_path: Option<String>,
    /// Global detection noise floor; unset means each technology's smallest
    /// declared signature weight.
    #[serde(default)]
    pub detection_floor: Option<u32>,
    #[serde(default = "default_generic_prefixes")]
    pub generic_prefixes: Vec<String>,
    pub categories: Vec<String>,
    #[serde(default = "default_cooldown_days")]
    pub category_cooldown_days: u32,
    #[serde(default = "default_max_email_pages")]
    pub max_email_pages: usize,
    #[serde(default = "default_fetch_timeout_seconds")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_daily_send_limit")]
    pub daily_send_limit: u32,
    #[serde(default = "default_per_inbox_daily_cap")]
    pub per_inbox_daily_cap: u32,
    #[serde(default = "default_send_delay_seconds")]
    pub send_delay_seconds: u64,
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub company: CompanyProfile,
    /// Message variants keyed by technology; the built-in catalog is used
    /// when unset.
    #[serde(default)]
    pub variants: Option<VariantCatalog>,
}

fn default_cooldown_days() -> u32 {
    7
}

fn default_max_email_pages() -> usize {
    10
}

fn default_fetch_timeout_seconds() -> u64 {
    10
}

fn default_daily_send_limit() -> u32 {
    500
}

fn default_per_inbox_daily_cap() -> u32 {
    50
}

fn default_send_delay_seconds() -> u64 {
    4
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ledger_path: "stackscout.db".to_string(),
            disposable_blocklist_path: "config/disposable_email_blocklist.json".to_string(),
            catalog_path: None,
            detection_floor: None,
            generic_prefixes: default_generic_prefixes(),
            categories: [
                "plumber",
                "dentist",
                "roofing contractor",
                "landscaping company",
                "auto repair shop",
                "law firm",
                "accounting firm",
                "veterinary clinic",
                "real estate agency",
                "fitness studio",
                "hvac contractor",
                "catering company",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            category_cooldown_days: default_cooldown_days(),
            max_email_pages: default_max_email_pages(),
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            daily_send_limit: default_daily_send_limit(),
            per_inbox_daily_cap: default_per_inbox_daily_cap(),
            send_delay_seconds: default_send_delay_seconds(),
            personas: vec![
                Persona {
                    id: "alex".to_string(),
                    name: "Alex Romero".to_string(),
                    role: "Integration Specialist".to_string(),
                    tone: "concise-technical".to_string(),
                    inbox: "alex@updates.fixbridge.co".to_string(),
                    daily_cap: None,
                },
                Persona {
                    id: "jordan".to_string(),
                    name: "Jordan Pike".to_string(),
                    role: "Automation Consultant".to_string(),
                    tone: "friendly-direct".to_string(),
                    inbox: "jordan@updates.fixbridge.co".to_string(),
                    daily_cap: None,
                },
                Persona {
                    id: "sam".to_string(),
                    name: "Sam Whitfield".to_string(),
                    role: "Technical Lead".to_string(),
                    tone: "structured-formal".to_string(),
                    inbox: "sam@updates.fixbridge.co".to_string(),
                    daily_cap: None,
                },
            ],
            company: CompanyProfile::default(),
            variants: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)
            .map_err(|e| anyhow::anyhow!("Failed to write config {}: {}", path.display(), e))?;
        Ok(())
    }

    /// The signature catalog this config resolves to.
    pub fn signature_catalog(&self) -> anyhow::Result<SignatureCatalog> {
        match &self.catalog_path {
            Some(path) => SignatureCatalog::load_from_file(Path::new(path)),
            None => Ok(SignatureCatalog::builtin()),
        }
    }

    /// The variant catalog this config resolves to.
    pub fn variant_catalog(&self, catalog: &SignatureCatalog) -> VariantCatalog {
        match &self.variants {
            Some(v) => v.clone(),
            None => VariantCatalog::builtin(&catalog.technology_names()),
        }
    }

    /// Surface setup defects before a run starts: bad patterns, roster gaps,
    /// technologies with no variants.
    pub fn validate(&self) -> anyhow::Result<()> {
        let catalog = self.signature_catalog()?;
        catalog.validate()?;

        if self.personas.is_empty() {
            anyhow::bail!("Persona roster is empty");
        }
        let mut ids = HashSet::new();
        let mut inboxes = HashSet::new();
        for persona in &self.personas {
            if !ids.insert(&persona.id) {
                anyhow::bail!("Duplicate persona id: {}", persona.id);
            }
            if !inboxes.insert(&persona.inbox) {
                anyhow::bail!("Duplicate inbox: {}", persona.inbox);
            }
            if !persona.inbox.contains('@') {
                anyhow::bail!("Persona '{}' inbox is not an email address", persona.id);
            }
        }

        if self.categories.is_empty() {
            anyhow::bail!("Category list is empty");
        }
        if self.daily_send_limit == 0 || self.per_inbox_daily_cap == 0 {
            anyhow::bail!("Send limits must be positive");
        }

        let variants = self.variant_catalog(&catalog);
        let gaps = variants.missing_from(&catalog.technology_names());
        if !gaps.is_empty() {
            anyhow::bail!("Technologies with no message variants: {}", gaps.join(", "));
        }

        Ok(())
    }
}
