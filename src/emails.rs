use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref MAILTO_PATTERN: Regex =
        Regex::new(r#"href\s*=\s*["']mailto:([^"'?]+)"#).unwrap();
}

/// Placeholder domains that only ever appear in boilerplate.
const INVALID_DOMAINS: &[&str] = &["example.com", "example.org", "test.com", "domain.com"];

/// Asset suffixes the bare pattern scan captures by accident
/// (e.g. logo@2x.png).
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".gif", ".svg", ".css", ".js"];

pub fn default_generic_prefixes() -> Vec<String> {
    [
        "info",
        "support",
        "admin",
        "hello",
        "sales",
        "contact",
        "help",
        "noreply",
        "no-reply",
        "webmaster",
        "postmaster",
        "mail",
        "email",
        "enquiries",
        "enquiry",
        "office",
        "team",
        "general",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Pull raw candidate addresses out of one page: pattern scan plus
/// mailto: links, in document order.
pub fn extract_candidates(html: &str) -> Vec<String> {
    let mut candidates: Vec<String> = EMAIL_PATTERN
        .find_iter(html)
        .map(|m| m.as_str().to_string())
        .collect();
    for caps in MAILTO_PATTERN.captures_iter(html) {
        let email = caps[1].trim().to_string();
        if !email.is_empty() {
            candidates.push(email);
        }
    }
    candidates
}

/// One extracted address with its rejection flags. Only candidates with both
/// flags false survive into a lead's email list.
#[derive(Debug, Clone)]
pub struct EmailCandidate {
    pub address: String,
    pub is_generic: bool,
    pub is_disposable: bool,
}

/// Rejects generic-role and disposable/honeypot addresses, deduplicates
/// case-insensitively preserving first-seen order. Pure filter.
pub struct EmailFilter {
    generic_prefixes: Vec<String>,
    disposable_domains: HashSet<String>,
}

impl EmailFilter {
    pub fn new(generic_prefixes: Vec<String>, disposable_domains: HashSet<String>) -> Self {
        EmailFilter {
            generic_prefixes: generic_prefixes
                .into_iter()
                .map(|p| p.to_lowercase())
                .collect(),
            disposable_domains: disposable_domains
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
        }
    }

    /// Load the disposable/honeypot blocklist (a JSON array of domains,
    /// externally maintained). A missing or malformed file degrades to an
    /// empty set so a scan run never dies on list maintenance.
    pub fn load_blocklist(path: &Path) -> HashSet<String> {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(domains) => {
                    log::debug!("Loaded {} disposable email domains", domains.len());
                    domains.into_iter().map(|d| d.to_lowercase()).collect()
                }
                Err(e) => {
                    log::error!("Invalid JSON in blocklist {}: {}", path.display(), e);
                    HashSet::new()
                }
            },
            Err(_) => {
                log::warn!("Disposable email blocklist not found: {}", path.display());
                HashSet::new()
            }
        }
    }

    /// Generic if the local part equals a prefix exactly, or equals one after
    /// stripping separators (so no.reply and no_reply match noreply).
    pub fn is_generic(&self, local_part: &str) -> bool {
        let local = local_part.to_lowercase();
        let collapsed: String = local.chars().filter(|c| !".-_".contains(*c)).collect();
        self.generic_prefixes.iter().any(|p| {
            let p_collapsed: String = p.chars().filter(|c| !".-_".contains(*c)).collect();
            local == *p || collapsed == p_collapsed
        })
    }

    /// Disposable if the domain matches a blocklisted entry exactly or is a
    /// subdomain of one.
    pub fn is_disposable(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        if self.disposable_domains.contains(&domain) {
            return true;
        }
        self.disposable_domains
            .iter()
            .any(|blocked| domain.ends_with(&format!(".{blocked}")))
    }

    /// Flag one candidate without deciding anything else about it.
    pub fn evaluate(&self, raw: &str) -> EmailCandidate {
        let address = raw.trim().to_lowercase();
        let (local, domain) = match address.split_once('@') {
            Some((l, d)) if !l.is_empty() && !d.is_empty() => (l.to_string(), d.to_string()),
            _ => {
                return EmailCandidate {
                    address,
                    is_generic: false,
                    is_disposable: false,
                }
            }
        };
        EmailCandidate {
            is_generic: self.is_generic(&local),
            is_disposable: self.is_disposable(&domain),
            address,
        }
    }

    fn accepts(&self, email_lower: &str) -> bool {
        let (_, domain) = match email_lower.split_once('@') {
            Some((l, d)) if !l.is_empty() && !d.is_empty() => (l, d),
            _ => return false,
        };
        let candidate = self.evaluate(email_lower);
        if candidate.is_generic {
            log::debug!("Filtered generic email: {email_lower}");
            return false;
        }
        if candidate.is_disposable {
            log::debug!("Filtered disposable/honeypot email: {email_lower}");
            return false;
        }
        if INVALID_DOMAINS.contains(&domain) {
            return false;
        }
        if ASSET_SUFFIXES.iter().any(|ext| domain.ends_with(ext)) {
            return false;
        }
        true
    }

    /// Filter an ordered candidate sequence down to usable addresses.
    pub fn filter<I, S>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for candidate in candidates {
            let email = candidate.as_ref().trim().to_lowercase();
            if email.is_empty() || seen.contains(&email) {
                continue;
            }
            if self.accepts(&email) {
                seen.insert(email.clone());
                accepted.push(email);
            }
        }
        accepted
    }

    /// Extract and filter across an ordered page sequence, preserving the
    /// first-seen order across pages.
    pub fn filter_pages<'a, I>(&self, pages: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut candidates = Vec::new();
        for page in pages {
            candidates.extend(extract_candidates(page));
        }
        self.filter(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_with(disposable: &[&str]) -> EmailFilter {
        EmailFilter::new(
            default_generic_prefixes(),
            disposable.iter().map(|d| d.to_string()).collect(),
        )
    }

    #[test]
    fn test_filter_rejects_generic_disposable_and_dedups() {
        let filter = filter_with(&["mailinator.com"]);
        let result = filter.filter([
            "info@acme.com",
            "jane@acme.com",
            "x@mailinator.com",
            "Jane@ACME.com",
        ]);
        assert_eq!(result, vec!["jane@acme.com".to_string()]);
    }

    #[test]
    fn test_evaluate_sets_rejection_flags() {
        let filter = filter_with(&["mailinator.com"]);
        let candidate = filter.evaluate("Info@Acme.com");
        assert_eq!(candidate.address, "info@acme.com");
        assert!(candidate.is_generic);
        assert!(!candidate.is_disposable);

        let candidate = filter.evaluate("x@mailinator.com");
        assert!(candidate.is_disposable);
        assert!(!candidate.is_generic);

        let candidate = filter.evaluate("jane@acme.com");
        assert!(!candidate.is_generic);
        assert!(!candidate.is_disposable);
    }

    #[test]
    fn test_generic_matches_after_stripping_separators() {
        let filter = filter_with(&[]);
        assert!(filter.is_generic("no-reply"));
        assert!(filter.is_generic("no_reply"));
        assert!(filter.is_generic("No.Reply"));
        assert!(!filter.is_generic("janedoe"));
    }

    #[test]
    fn test_disposable_subdomains_count() {
        let filter = filter_with(&["mailinator.com"]);
        assert!(filter.is_disposable("mailinator.com"));
        assert!(filter.is_disposable("mx.mailinator.com"));
        assert!(!filter.is_disposable("notmailinator.com"));
    }

    #[test]
    fn test_placeholder_and_asset_domains_rejected() {
        let filter = filter_with(&[]);
        assert_eq!(
            filter.filter(["amy@example.com", "logo@2x.png", "jane@acme.com"]),
            vec!["jane@acme.com".to_string()]
        );
    }

    #[test]
    fn test_first_seen_order_preserved_across_pages() {
        let filter = filter_with(&[]);
        let home = "Reach jane@acme.com or bob@acme.com";
        let contact = "Reach bob@acme.com or amy@acme.com";
        let result = filter.filter_pages([home, contact]);
        assert_eq!(
            result,
            vec![
                "jane@acme.com".to_string(),
                "bob@acme.com".to_string(),
                "amy@acme.com".to_string()
            ]
        );
    }

    #[test]
    fn test_extract_candidates_finds_mailto_links() {
        let html = r#"<a href="mailto:jane@acme.com?subject=Hi">Email Jane</a>"#;
        let candidates = extract_candidates(html);
        assert!(candidates.contains(&"jane@acme.com".to_string()));
    }

    #[test]
    fn test_missing_blocklist_degrades_to_empty() {
        let set = EmailFilter::load_blocklist(Path::new("/nonexistent/blocklist.json"));
        assert!(set.is_empty());
    }
}
