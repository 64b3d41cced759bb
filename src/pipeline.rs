use crate::allocation::{AllocationEngine, AllocationOutcome, Assignment};
use crate::config::Config;
use crate::detector::{Detector, PageBundle};
use crate::emails::EmailFilter;
use crate::fetch::{canonical_domain, PageFetcher};
use crate::ledger::{Ledger, ScanRecord};
use crate::rotation::next_category;
use crate::scorer::{score, TechnologyProfile};

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// A business domain plus everything a scan learned about it.
#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub domain: String,
    pub profile: TechnologyProfile,
    pub emails: Vec<String>,
    pub portal_ids: Vec<String>,
    pub assignment: Option<Assignment>,
}

impl Lead {
    /// Outreach needs something to say and someone to say it to.
    pub fn outreach_eligible(&self) -> bool {
        self.profile.main_technology.is_some() && !self.emails.is_empty()
    }
}

/// Where candidate domains come from. The production source (a places
/// scraper) lives outside this crate; anything that yields domains works.
pub trait DiscoverySource {
    fn discover(
        &self,
        category: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<String>>> + Send;
}

/// A fixed domain list, for file- or CLI-driven runs.
pub struct StaticDiscovery {
    pub domains: Vec<String>,
}

impl DiscoverySource for StaticDiscovery {
    async fn discover(&self, _category: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.domains.clone())
    }
}

/// Delivery transport. SMTP lives outside this crate; the pipeline only
/// needs success/failure per assignment.
pub trait SendTransport {
    fn send(
        &self,
        assignment: &Assignment,
        recipient: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// Dry-run transport: prints what would be sent and reports success.
pub struct LogOnlySender;

impl SendTransport for LogOnlySender {
    async fn send(&self, assignment: &Assignment, recipient: &str) -> anyhow::Result<()> {
        log::info!(
            "[dry-run] would send '{}' to {} from {} (variant {})",
            assignment.subject,
            recipient,
            assignment.inbox_email,
            assignment.variant_id
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub category: String,
    pub domains_discovered: usize,
    pub domains_new: usize,
    pub domains_skipped_seen: usize,
    pub scan_errors: usize,
    pub leads_with_tech: usize,
    pub emails_found: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct OutreachStats {
    pub attempted: usize,
    pub sent: usize,
    pub deferred: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct Pipeline<F: PageFetcher, L: Ledger> {
    config: Config,
    detector: Detector,
    email_filter: EmailFilter,
    fetcher: F,
    ledger: L,
}

impl<F: PageFetcher + Sync, L: Ledger> Pipeline<F, L> {
    pub fn new(config: Config, fetcher: F, ledger: L) -> anyhow::Result<Self> {
        let catalog = config.signature_catalog()?;
        let detector = Detector::new(catalog, config.detection_floor)?;
        let email_filter = EmailFilter::new(
            config.generic_prefixes.clone(),
            EmailFilter::load_blocklist(Path::new(&config.disposable_blocklist_path)),
        );
        Ok(Pipeline {
            config,
            detector,
            email_filter,
            fetcher,
            ledger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Scan one domain: claim it in the ledger, fetch, detect, score, crawl
    /// for emails. Returns None when another run already claimed the domain.
    /// Fetch failures complete with an empty profile instead of failing.
    pub async fn scan_domain(&self, raw_domain: &str, category: &str) -> anyhow::Result<Option<Lead>> {
        let domain = canonical_domain(raw_domain);
        if domain.is_empty() {
            return Ok(None);
        }

        // Claim immediately before fetching; the loser of a concurrent race
        // treats the domain as already handled.
        if !self.ledger.mark_seen(&domain, category)? {
            log::debug!("Skipping {domain}: already seen");
            return Ok(None);
        }

        let (bundle, fetch_error) = match self.fetcher.fetch(&domain).await {
            Ok(bundle) => (bundle, None),
            Err(e) => {
                log::warn!("Fetch failed for {domain}: {e}");
                (PageBundle::default(), Some(e.to_string()))
            }
        };

        let detection = self.detector.detect(&bundle);
        let profile = score(&domain, &detection.technologies, self.detector.catalog());

        let emails = if profile.main_technology.is_some() {
            let pages = self
                .fetcher
                .crawl_pages(&domain, &bundle.html, self.config.max_email_pages)
                .await;
            self.email_filter
                .filter_pages(pages.iter().map(|p| p.as_str()))
        } else {
            Vec::new()
        };

        self.ledger.record_scan(&ScanRecord {
            domain: domain.clone(),
            category: category.to_string(),
            technologies: profile.scored.iter().map(|s| s.technology.clone()).collect(),
            main_technology: profile.main_technology.clone(),
            portal_ids: detection.portal_ids.clone(),
            emails: emails.clone(),
            error: fetch_error,
        })?;

        Ok(Some(Lead {
            domain,
            profile,
            emails,
            portal_ids: detection.portal_ids,
            assignment: None,
        }))
    }

    /// One discovery-and-scan pass: pick the category, pull domains, scan
    /// each new one. Per-domain failures are isolated; only configuration
    /// errors abort the run.
    pub async fn run_scan_phase(
        &self,
        discovery: &impl DiscoverySource,
        category_override: Option<&str>,
    ) -> anyhow::Result<(Vec<Lead>, RunSummary)> {
        let usage = self
            .ledger
            .category_usage(self.config.category_cooldown_days)?;
        let category = next_category(
            &self.config.categories,
            &usage,
            self.config.category_cooldown_days,
            Utc::now().date_naive(),
            category_override,
        )?;
        log::info!("Today's category: {category}");

        let raw_domains = discovery.discover(&category).await?;
        let mut seen_this_run = HashSet::new();
        let domains: Vec<String> = raw_domains
            .iter()
            .map(|d| canonical_domain(d))
            .filter(|d| !d.is_empty() && seen_this_run.insert(d.clone()))
            .collect();

        let mut summary = RunSummary {
            category: category.clone(),
            domains_discovered: domains.len(),
            ..Default::default()
        };

        let mut leads = Vec::new();
        for (idx, domain) in domains.iter().enumerate() {
            log::info!("[{}/{}] scanning {domain}", idx + 1, domains.len());
            match self.scan_domain(domain, &category).await {
                Ok(Some(lead)) => {
                    summary.domains_new += 1;
                    if lead.profile.main_technology.is_some() {
                        summary.leads_with_tech += 1;
                    }
                    summary.emails_found += lead.emails.len();
                    leads.push(lead);
                }
                Ok(None) => summary.domains_skipped_seen += 1,
                Err(e) => {
                    // Ledger trouble on one domain should not sink the rest.
                    log::error!("Scan failed for {domain}: {e}");
                    summary.scan_errors += 1;
                }
            }
        }

        self.ledger.record_category_usage(
            &category,
            summary.domains_discovered as u32,
            summary.domains_new as u32,
        )?;

        Ok((leads, summary))
    }

    /// Allocate and send for every eligible lead. Quota slots are reserved
    /// atomically before the transport runs, so the per-inbox ceiling holds
    /// even when runs overlap; suppression state is only written after the
    /// transport confirms.
    pub async fn run_outreach_phase(
        &self,
        leads: &mut [Lead],
        engine: &mut AllocationEngine,
        sender: &impl SendTransport,
    ) -> anyhow::Result<OutreachStats> {
        let mut stats = OutreachStats::default();

        for lead in leads.iter_mut() {
            if stats.sent as u32 >= self.config.daily_send_limit {
                log::info!("Global daily send limit reached");
                break;
            }
            if !lead.outreach_eligible() {
                stats.skipped += 1;
                continue;
            }
            stats.attempted += 1;

            let history = self.ledger.domain_history(&lead.domain)?;
            // Configuration gaps (a technology with zero variants) abort the
            // phase; exhaustion defers the lead and moves on.
            let assignment = match engine.allocate(&lead.profile, &history, &self.ledger)? {
                AllocationOutcome::Assigned(a) => a,
                AllocationOutcome::Deferred(reason) => {
                    log::debug!("Deferred {}: {reason:?}", lead.domain);
                    stats.deferred += 1;
                    continue;
                }
            };

            let cap = self
                .config
                .personas
                .iter()
                .find(|p| p.id == assignment.persona_id)
                .and_then(|p| p.daily_cap)
                .unwrap_or(self.config.per_inbox_daily_cap);
            if !self.ledger.try_increment_inbox(&assignment.inbox_email, cap)? {
                log::debug!(
                    "Inbox {} hit its cap between allocation and send",
                    assignment.inbox_email
                );
                stats.deferred += 1;
                continue;
            }

            let recipient = &lead.emails[0];
            match sender.send(&assignment, recipient).await {
                Ok(()) => {
                    self.ledger.record_assignment(&lead.domain, &assignment)?;
                    log::info!(
                        "Sent to {recipient} via {} (variant {})",
                        assignment.inbox_email,
                        assignment.variant_id
                    );
                    lead.assignment = Some(assignment);
                    stats.sent += 1;
                }
                Err(e) => {
                    // No suppression state is written; the lead stays
                    // eligible for a future run.
                    log::error!("Send failed for {recipient}: {e}");
                    stats.failed += 1;
                }
            }

            if self.config.send_delay_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(self.config.send_delay_seconds)).await;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubFetcher {
        bundles: HashMap<String, PageBundle>,
        pages: HashMap<String, Vec<String>>,
    }

    impl StubFetcher {
        fn new() -> Self {
            StubFetcher {
                bundles: HashMap::new(),
                pages: HashMap::new(),
            }
        }

        fn with_site(mut self, domain: &str, bundle: PageBundle, pages: Vec<&str>) -> Self {
            self.bundles.insert(domain.to_string(), bundle);
            self.pages
                .insert(domain.to_string(), pages.iter().map(|p| p.to_string()).collect());
            self
        }
    }

    impl PageFetcher for StubFetcher {
        async fn fetch(&self, domain: &str) -> anyhow::Result<PageBundle> {
            self.bundles
                .get(domain)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }

        async fn crawl_pages(
            &self,
            domain: &str,
            initial_html: &str,
            max_pages: usize,
        ) -> Vec<String> {
            let mut pages = vec![initial_html.to_string()];
            if let Some(extra) = self.pages.get(domain) {
                pages.extend(extra.clone());
            }
            pages.truncate(max_pages);
            pages
        }
    }

    struct StubSender {
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    impl StubSender {
        fn new(fail: bool) -> Self {
            StubSender {
                fail,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl SendTransport for StubSender {
        async fn send(&self, _assignment: &Assignment, recipient: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push(recipient.to_string());
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.send_delay_seconds = 0;
        config.disposable_blocklist_path = "/nonexistent/blocklist.json".to_string();
        config
    }

    fn shopify_bundle() -> PageBundle {
        PageBundle {
            html: "<html>Contact jane@acme.com</html>".to_string(),
            script_urls: vec!["https://cdn.shopify.com/s/theme.js".to_string()],
            ..Default::default()
        }
    }

    fn pipeline(fetcher: StubFetcher) -> Pipeline<StubFetcher, MemoryLedger> {
        Pipeline::new(test_config(), fetcher, MemoryLedger::new()).unwrap()
    }

    fn engine(config: &Config) -> AllocationEngine {
        let catalog = config.signature_catalog().unwrap();
        AllocationEngine::new(
            config.variant_catalog(&catalog),
            config.personas.clone(),
            config.company.clone(),
            config.per_inbox_daily_cap,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_domain_never_scanned_twice() {
        let fetcher = StubFetcher::new().with_site("acme.com", shopify_bundle(), vec![]);
        let pipeline = pipeline(fetcher);
        let discovery = StaticDiscovery {
            domains: vec!["https://www.acme.com".to_string()],
        };

        let (leads, summary) = pipeline.run_scan_phase(&discovery, Some("plumber")).await.unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(summary.domains_new, 1);

        let (leads, summary) = pipeline.run_scan_phase(&discovery, Some("plumber")).await.unwrap();
        assert!(leads.is_empty());
        assert_eq!(summary.domains_new, 0);
        assert_eq!(summary.domains_skipped_seen, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_completes_with_empty_profile() {
        let pipeline = pipeline(StubFetcher::new());
        let lead = pipeline
            .scan_domain("down.example", "plumber")
            .await
            .unwrap()
            .unwrap();
        assert!(lead.profile.main_technology.is_none());
        assert!(lead.emails.is_empty());
        assert_eq!(pipeline.ledger().scan_count(), 1);
    }

    #[tokio::test]
    async fn test_scan_detects_and_extracts_emails() {
        let fetcher = StubFetcher::new().with_site(
            "acme.com",
            shopify_bundle(),
            vec!["<a href=\"mailto:bob@acme.com\">b</a>"],
        );
        let pipeline = pipeline(fetcher);
        let lead = pipeline
            .scan_domain("acme.com", "plumber")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lead.profile.main_technology.as_deref(), Some("Shopify"));
        assert_eq!(
            lead.emails,
            vec!["jane@acme.com".to_string(), "bob@acme.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_outreach_confirms_and_records() {
        let fetcher = StubFetcher::new().with_site("acme.com", shopify_bundle(), vec![]);
        let pipeline = pipeline(fetcher);
        let mut engine = engine(pipeline.config());
        let sender = StubSender::new(false);

        let mut leads = vec![pipeline
            .scan_domain("acme.com", "plumber")
            .await
            .unwrap()
            .unwrap()];
        let stats = pipeline
            .run_outreach_phase(&mut leads, &mut engine, &sender)
            .await
            .unwrap();

        assert_eq!(stats.sent, 1);
        assert!(leads[0].assignment.is_some());
        let history = pipeline.ledger().domain_history("acme.com").unwrap();
        assert_eq!(history.used_variant_ids.len(), 1);
        assert_eq!(history.used_personas.len(), 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_leaves_lead_eligible() {
        let fetcher = StubFetcher::new().with_site("acme.com", shopify_bundle(), vec![]);
        let pipeline = pipeline(fetcher);
        let mut engine = engine(pipeline.config());
        let sender = StubSender::new(true);

        let mut leads = vec![pipeline
            .scan_domain("acme.com", "plumber")
            .await
            .unwrap()
            .unwrap()];
        let stats = pipeline
            .run_outreach_phase(&mut leads, &mut engine, &sender)
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert!(leads[0].assignment.is_none());
        let history = pipeline.ledger().domain_history("acme.com").unwrap();
        assert!(history.used_variant_ids.is_empty());
        assert!(history.used_personas.is_empty());
    }

    #[tokio::test]
    async fn test_leads_without_tech_or_emails_skipped() {
        let fetcher = StubFetcher::new();
        let pipeline = pipeline(fetcher);
        let mut engine = engine(pipeline.config());
        let sender = StubSender::new(false);

        let mut leads = vec![pipeline
            .scan_domain("down.example", "plumber")
            .await
            .unwrap()
            .unwrap()];
        let stats = pipeline
            .run_outreach_phase(&mut leads, &mut engine, &sender)
            .await
            .unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn test_inbox_quota_ceiling_holds() {
        let mut config = test_config();
        config.per_inbox_daily_cap = 1;
        config.personas.truncate(1);

        let fetcher = StubFetcher::new()
            .with_site("a1.com", shopify_bundle(), vec![])
            .with_site("a2.com", shopify_bundle(), vec![]);
        let pipeline = Pipeline::new(config, fetcher, MemoryLedger::new()).unwrap();
        let mut engine = engine(pipeline.config());
        let sender = StubSender::new(false);

        let mut leads = vec![
            pipeline.scan_domain("a1.com", "plumber").await.unwrap().unwrap(),
            pipeline.scan_domain("a2.com", "plumber").await.unwrap().unwrap(),
        ];
        let stats = pipeline
            .run_outreach_phase(&mut leads, &mut engine, &sender)
            .await
            .unwrap();

        assert_eq!(stats.sent, 1);
        assert_eq!(stats.deferred, 1);
        assert_eq!(
            pipeline
                .ledger()
                .inbox_sent_today(&pipeline.config().personas[0].inbox)
                .unwrap(),
            1
        );
    }
}
