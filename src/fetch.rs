use crate::detector::PageBundle;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Pages likely to carry contact information, crawled ahead of whatever else
/// the homepage links to.
const CONTACT_PATHS: &[&str] = &[
    "/contact",
    "/contact-us",
    "/about",
    "/about-us",
    "/team",
    "/our-team",
    "/leadership",
    "/people",
    "/staff",
];

lazy_static! {
    static ref SCRIPT_SRC_PATTERN: Regex =
        Regex::new(r#"(?i)<script[^>]*\bsrc\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref INLINE_SCRIPT_PATTERN: Regex =
        Regex::new(r"(?is)<script(?:\s[^>]*)?>(.*?)</script>").unwrap();
    static ref HREF_PATTERN: Regex =
        Regex::new(r#"(?i)<a[^>]*\bhref\s*=\s*["']([^"']+)["']"#).unwrap();
}

/// Strip scheme, path, port and a leading www. from whatever the discovery
/// source hands us.
pub fn canonical_domain(raw: &str) -> String {
    let mut domain = raw.trim().to_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(stripped) = domain.strip_prefix(prefix) {
            domain = stripped.to_string();
        }
    }
    domain = domain
        .split(['/', ':', '?'])
        .next()
        .unwrap_or("")
        .to_string();
    if let Some(stripped) = domain.strip_prefix("www.") {
        domain = stripped.to_string();
    }
    domain
}

pub fn normalize_url(domain: &str) -> String {
    let domain = domain.trim();
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    }
}

pub fn extract_script_urls(html: &str) -> Vec<String> {
    SCRIPT_SRC_PATTERN
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect()
}

pub fn extract_inline_scripts(html: &str) -> Vec<String> {
    INLINE_SCRIPT_PATTERN
        .captures_iter(html)
        .filter(|c| !c[1].trim().is_empty())
        .map(|c| c[1].to_string())
        .collect()
}

/// Same-host links from a page, resolved against the base URL and
/// normalized to scheme://host/path.
pub fn extract_internal_links(html: &str, base_url: &str) -> Vec<String> {
    let base = match Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for caps in HREF_PATTERN.captures_iter(html) {
        let href = caps[1].trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        let resolved = match base.join(href) {
            Ok(u) => u,
            Err(_) => continue,
        };
        if resolved.host_str() != base.host_str() {
            continue;
        }
        let normalized = format!(
            "{}://{}{}",
            resolved.scheme(),
            resolved.host_str().unwrap_or(""),
            resolved.path()
        );
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    }
    links
}

/// Fetch transport. The core treats any error as empty content for that
/// domain; crawling skips failed pages instead of aborting.
pub trait PageFetcher {
    fn fetch(
        &self,
        domain: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<PageBundle>> + Send;

    /// Ordered page bodies for the email crawl: homepage first, then contact
    /// paths, then discovered internal links, bounded by `max_pages`.
    fn crawl_pages(
        &self,
        domain: &str,
        initial_html: &str,
        max_pages: usize,
    ) -> impl std::future::Future<Output = Vec<String>> + Send;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(HttpFetcher { client })
    }

    async fn get_html(&self, url: &str) -> anyhow::Result<(String, HashMap<String, String>)> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let html = response.text().await?;
        Ok((html, headers))
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, domain: &str) -> anyhow::Result<PageBundle> {
        let url = normalize_url(domain);
        let (html, headers) = match self.get_html(&url).await {
            Ok(ok) => ok,
            // TLS-only sites are rare but real; try plain HTTP once before
            // giving up.
            Err(e) if url.starts_with("https://") => {
                let http_url = url.replacen("https://", "http://", 1);
                log::debug!("HTTPS fetch failed for {domain} ({e}); retrying over HTTP");
                self.get_html(&http_url).await?
            }
            Err(e) => return Err(e),
        };

        Ok(PageBundle {
            script_urls: extract_script_urls(&html),
            inline_scripts: extract_inline_scripts(&html),
            html,
            headers,
        })
    }

    async fn crawl_pages(&self, domain: &str, initial_html: &str, max_pages: usize) -> Vec<String> {
        let base_url = normalize_url(domain);
        let mut pages = vec![initial_html.to_string()];
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(base_url.clone());

        let mut queue: Vec<String> = CONTACT_PATHS
            .iter()
            .map(|p| format!("{base_url}{p}"))
            .collect();
        queue.extend(extract_internal_links(initial_html, &base_url));

        for url in queue {
            if pages.len() >= max_pages {
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }
            match self.get_html(&url).await {
                Ok((html, headers)) => {
                    let content_type = headers
                        .get("content-type")
                        .map(|v| v.to_lowercase())
                        .unwrap_or_default();
                    if content_type.is_empty() || content_type.contains("text/html") {
                        pages.push(html);
                    }
                }
                Err(e) => {
                    log::debug!("Skipping crawl page {url}: {e}");
                }
            }
        }
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_domain() {
        assert_eq!(canonical_domain("https://www.Acme.com/about"), "acme.com");
        assert_eq!(canonical_domain("http://acme.com:8080/x"), "acme.com");
        assert_eq!(canonical_domain("acme.com"), "acme.com");
        assert_eq!(canonical_domain("  www.acme.com  "), "acme.com");
    }

    #[test]
    fn test_normalize_url_defaults_to_https() {
        assert_eq!(normalize_url("acme.com"), "https://acme.com");
        assert_eq!(normalize_url("http://acme.com"), "http://acme.com");
    }

    #[test]
    fn test_extract_script_urls() {
        let html = r#"<script src="https://cdn.shopify.com/a.js"></script>
                      <script type="text/javascript" src='/local.js'></script>"#;
        let urls = extract_script_urls(html);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://cdn.shopify.com/a.js");
    }

    #[test]
    fn test_extract_inline_scripts_skips_empty_and_src_tags() {
        let html = r#"<script src="/a.js"></script>
                      <script>var _hsq = [];</script>
                      <script>   </script>"#;
        let scripts = extract_inline_scripts(html);
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("_hsq"));
    }

    #[test]
    fn test_extract_internal_links_keeps_same_host_only() {
        let html = r#"<a href="/contact">c</a>
                      <a href="https://acme.com/team#staff">t</a>
                      <a href="https://other.com/">x</a>
                      <a href="mailto:jane@acme.com">m</a>"#;
        let links = extract_internal_links(html, "https://acme.com");
        assert_eq!(
            links,
            vec![
                "https://acme.com/contact".to_string(),
                "https://acme.com/team".to_string()
            ]
        );
    }
}
