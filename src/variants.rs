use crate::config::{CompanyProfile, Persona};
use crate::scorer::TechnologyProfile;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One alternative message template for a main technology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageVariant {
    pub id: String,
    pub subject_template: String,
    pub bullets: Vec<String>,
}

/// Message variants keyed by technology. BTreeMap keeps iteration order
/// stable for deterministic selection and config serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantCatalog {
    pub variants: BTreeMap<String, Vec<MessageVariant>>,
}

impl VariantCatalog {
    pub fn variants_for(&self, technology: &str) -> &[MessageVariant] {
        self.variants
            .get(technology)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Technologies that would be a configuration gap for outreach.
    pub fn missing_from(&self, technologies: &[String]) -> Vec<String> {
        technologies
            .iter()
            .filter(|t| self.variants_for(t).is_empty())
            .cloned()
            .collect()
    }

    /// Built-in variants: hand-written sets for the techs we see most, a
    /// starter pair for the rest of the built-in catalog.
    pub fn builtin(catalog_technologies: &[String]) -> Self {
        let mut variants: BTreeMap<String, Vec<MessageVariant>> = BTreeMap::new();

        variants.insert(
            "Shopify".to_string(),
            vec![
                variant(
                    "shopify_v1",
                    "Shopify integration issue on {{domain}}?",
                    &[
                        "Checkout or webhook issues affecting orders",
                        "Payment + analytics events not lining up",
                        "Small automation gaps that slow down the team",
                    ],
                ),
                variant(
                    "shopify_v2",
                    "Quick Shopify improvement idea for {{domain}}",
                    &[
                        "Order tracking and fulfillment sync problems",
                        "Broken email triggers (abandoned cart, post-purchase)",
                        "Third-party app conflicts causing errors",
                    ],
                ),
                variant(
                    "shopify_v3",
                    "Saw something in your Shopify setup",
                    &[
                        "Webhook reliability and event handling",
                        "Checkout customization issues",
                        "Inventory sync with external systems",
                    ],
                ),
            ],
        );

        variants.insert(
            "Salesforce".to_string(),
            vec![
                variant(
                    "salesforce_v1",
                    "Salesforce routing issue on {{domain}}?",
                    &[
                        "Lead routing rules not firing correctly",
                        "Automation flows dropping records",
                        "Reporting gaps affecting pipeline visibility",
                    ],
                ),
                variant(
                    "salesforce_v2",
                    "Quick Salesforce fix for {{domain}}",
                    &[
                        "Workflow automation cleanup",
                        "Data sync between Salesforce and other tools",
                        "Custom object and field configuration",
                    ],
                ),
                variant(
                    "salesforce_v3",
                    "Noticed your Salesforce setup",
                    &[
                        "Integration issues with marketing tools",
                        "Duplicate record cleanup and prevention",
                        "Process automation tuning",
                    ],
                ),
            ],
        );

        variants.insert(
            "HubSpot".to_string(),
            vec![
                variant(
                    "hubspot_v1",
                    "HubSpot workflow issue on {{domain}}?",
                    &[
                        "Broken workflows and lead routing",
                        "Form submissions not reaching the CRM",
                        "Lifecycle stages out of sync with reality",
                    ],
                ),
                variant(
                    "hubspot_v2",
                    "Quick HubSpot cleanup idea for {{domain}}",
                    &[
                        "Contact property and list hygiene",
                        "Email automation triggers misfiring",
                        "Attribution reporting gaps",
                    ],
                ),
                variant(
                    "hubspot_v3",
                    "Noticed your HubSpot setup",
                    &[
                        "Tracking code and analytics mismatches",
                        "Integration sync errors piling up",
                        "Duplicate contacts from form mapping",
                    ],
                ),
            ],
        );

        variants.insert(
            "WordPress".to_string(),
            vec![
                variant(
                    "wordpress_v1",
                    "WordPress performance idea for {{domain}}",
                    &[
                        "Site speed and caching optimization",
                        "Plugin conflicts causing errors",
                        "Form integration issues (submissions not reaching CRM)",
                    ],
                ),
                variant(
                    "wordpress_v2",
                    "Quick WordPress fix for {{domain}}",
                    &[
                        "Broken contact forms and lead capture",
                        "Analytics tracking not firing properly",
                        "Theme and plugin update conflicts",
                    ],
                ),
            ],
        );

        // Starter pair for every remaining catalog technology, so a default
        // install has no outreach gaps.
        for tech in catalog_technologies {
            if variants.contains_key(tech) {
                continue;
            }
            let slug: String = tech
                .to_lowercase()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            variants.insert(
                tech.clone(),
                vec![
                    variant(
                        &format!("{slug}_v1"),
                        &format!("Quick question about {tech} on {{{{domain}}}}"),
                        &[
                            &format!("Integration and configuration issues with {tech}"),
                            "Automation and workflow problems",
                            "Data sync and tracking gaps",
                        ],
                    ),
                    variant(
                        &format!("{slug}_v2"),
                        &format!("Noticed {tech} on {{{{domain}}}}"),
                        &[
                            &format!("{tech} setup and tuning"),
                            "Broken hand-offs between tools",
                            "Tracking and reporting blind spots",
                        ],
                    ),
                ],
            );
        }

        VariantCatalog { variants }
    }
}

fn variant(id: &str, subject: &str, bullets: &[&str]) -> MessageVariant {
    MessageVariant {
        id: id.to_string(),
        subject_template: subject.to_string(),
        bullets: bullets.iter().map(|b| b.to_string()).collect(),
    }
}

pub fn compose_subject(variant: &MessageVariant, domain: &str) -> String {
    variant.subject_template.replace("{{domain}}", domain)
}

/// Short plain-text body: persona greeting, one context sentence naming the
/// detected stack, the variant's bullets, rate line, booking CTA, signature.
pub fn compose_body(
    persona: &Persona,
    variant: &MessageVariant,
    profile: &TechnologyProfile,
    company: &CompanyProfile,
) -> String {
    let main_tech = profile.main_technology.as_deref().unwrap_or("your stack");

    let supporting: Vec<&str> = profile
        .supporting_technologies
        .iter()
        .filter(|t| t.as_str() != main_tech)
        .take(2)
        .map(|t| t.as_str())
        .collect();
    let supporting_mention = if supporting.is_empty() {
        String::new()
    } else {
        format!(" + {}", supporting.join(", "))
    };

    let greeting = if persona.tone.starts_with("structured") {
        format!(
            "Hello — I'm {} with {}, based in {}.",
            persona.name, company.name, company.location
        )
    } else {
        format!(
            "Hi — I'm {} from {} in {}.",
            persona.name, company.name, company.location
        )
    };

    let bullet_list: Vec<String> = variant
        .bullets
        .iter()
        .take(3)
        .map(|b| format!("• {b}"))
        .collect();

    let mut parts = vec![greeting];
    parts.push(format!(
        "\nI saw that {} is running {}{}, and I specialize in short-term technical fixes for stacks like yours.\n",
        profile.domain, main_tech, supporting_mention
    ));
    parts.push(bullet_list.join("\n"));
    parts.push(format!(
        "\nHourly: {}, strictly short-term — no long-term commitment.",
        company.hourly_rate
    ));
    if !company.booking_url.is_empty() {
        parts.push(format!(
            "\nIf it would help to have a specialist jump in, you can grab time here:\n{}",
            company.booking_url
        ));
    }
    parts.push(format!("\n– {}", persona.name));
    parts.push(format!("{}, {}", persona.role, company.name));

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SignatureCatalog;
    use std::collections::BTreeMap;

    fn persona() -> Persona {
        Persona {
            id: "p1".to_string(),
            name: "Sam".to_string(),
            role: "Integration Specialist".to_string(),
            tone: "concise-technical".to_string(),
            inbox: "sam@example-sender.com".to_string(),
            daily_cap: None,
        }
    }

    fn profile() -> TechnologyProfile {
        TechnologyProfile {
            domain: "acme.com".to_string(),
            detected: BTreeMap::new(),
            scored: Vec::new(),
            main_technology: Some("Shopify".to_string()),
            supporting_technologies: vec!["Stripe".to_string(), "Klaviyo".to_string()],
        }
    }

    #[test]
    fn test_builtin_covers_whole_catalog() {
        let techs = SignatureCatalog::builtin().technology_names();
        let catalog = VariantCatalog::builtin(&techs);
        assert!(catalog.missing_from(&techs).is_empty());
        // Hand-written sets stay intact.
        assert_eq!(catalog.variants_for("Shopify").len(), 3);
        assert!(catalog.variants_for("nginx").len() >= 2);
    }

    #[test]
    fn test_subject_substitutes_domain() {
        let v = variant("t_v1", "Quick question about {{domain}}", &[]);
        assert_eq!(compose_subject(&v, "acme.com"), "Quick question about acme.com");
    }

    #[test]
    fn test_body_mentions_stack_and_persona() {
        let techs = SignatureCatalog::builtin().technology_names();
        let catalog = VariantCatalog::builtin(&techs);
        let v = &catalog.variants_for("Shopify")[0];
        let body = compose_body(&persona(), v, &profile(), &CompanyProfile::default());
        assert!(body.contains("acme.com is running Shopify + Stripe, Klaviyo"));
        assert!(body.contains("Sam"));
        assert!(body.contains("• Checkout or webhook issues affecting orders"));
    }

    #[test]
    fn test_missing_from_reports_gaps() {
        let catalog = VariantCatalog {
            variants: BTreeMap::new(),
        };
        let gaps = catalog.missing_from(&["Shopify".to_string()]);
        assert_eq!(gaps, vec!["Shopify".to_string()]);
    }
}
