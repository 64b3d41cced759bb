use crate::config::{CompanyProfile, Persona};
use crate::ledger::{DomainHistory, Ledger};
use crate::scorer::TechnologyProfile;
use crate::variants::{compose_body, compose_subject, VariantCatalog};

use serde::{Deserialize, Serialize};

/// A fully specified outreach: who sends what to whom. Produced at most once
/// per lead per run; only a confirmed send consumes suppression/quota state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub persona_id: String,
    pub inbox_email: String,
    pub variant_id: String,
    pub main_tech: String,
    pub supporting_techs: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// Profile has no main technology; the lead is not outreach-eligible.
    NoMainTechnology,
    /// Every persona has already been used toward this domain.
    AllPersonasUsed,
    /// Remaining personas all sit on inboxes at their daily cap.
    InboxQuotaExhausted,
}

/// Allocation is total: exhaustion is a normal outcome, not an error.
/// Errors are reserved for configuration gaps.
#[derive(Debug)]
pub enum AllocationOutcome {
    Assigned(Assignment),
    Deferred(DeferReason),
}

pub struct AllocationEngine {
    variants: VariantCatalog,
    personas: Vec<Persona>,
    company: CompanyProfile,
    default_inbox_cap: u32,
    /// Round-robin cursor, carried across the run, breaking load ties so the
    /// pool is walked evenly instead of always restarting at the roster head.
    rotation_cursor: usize,
}

impl AllocationEngine {
    pub fn new(
        variants: VariantCatalog,
        personas: Vec<Persona>,
        company: CompanyProfile,
        default_inbox_cap: u32,
    ) -> anyhow::Result<Self> {
        if personas.is_empty() {
            anyhow::bail!("Persona roster is empty; outreach cannot run");
        }
        Ok(AllocationEngine {
            variants,
            personas,
            company,
            default_inbox_cap,
            rotation_cursor: 0,
        })
    }

    fn cap_for(&self, persona: &Persona) -> u32 {
        persona.daily_cap.unwrap_or(self.default_inbox_cap)
    }

    /// Phase one: variants for the main technology minus those already sent
    /// to this domain; once every variant has been tried, recycle the full
    /// set. Selection is the lowest id, so retried runs repeat the pick.
    fn select_variant<'a>(
        &'a self,
        main_tech: &str,
        history: &DomainHistory,
    ) -> anyhow::Result<&'a crate::variants::MessageVariant> {
        let all = self.variants.variants_for(main_tech);
        if all.is_empty() {
            anyhow::bail!("No message variants registered for technology '{main_tech}'");
        }

        let unused: Vec<_> = all
            .iter()
            .filter(|v| !history.used_variant_ids.contains(&v.id))
            .collect();
        let mut pool = if unused.is_empty() {
            log::debug!("All variants for {main_tech} used; recycling full set");
            all.iter().collect()
        } else {
            unused
        };
        pool.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pool[0])
    }

    /// Phase two: personas not yet used for this domain whose inbox still has
    /// quota, picked by fewest sends today, ties broken by the rotation
    /// cursor.
    fn select_persona(
        &mut self,
        history: &DomainHistory,
        ledger: &dyn Ledger,
    ) -> anyhow::Result<Result<(usize, u32), DeferReason>> {
        let fresh: Vec<usize> = (0..self.personas.len())
            .filter(|i| !history.used_personas.contains(&self.personas[*i].id))
            .collect();
        if fresh.is_empty() {
            return Ok(Err(DeferReason::AllPersonasUsed));
        }

        let mut with_quota: Vec<(usize, u32)> = Vec::new();
        for i in fresh {
            let persona = &self.personas[i];
            let sent = ledger.inbox_sent_today(&persona.inbox)?;
            if sent < self.cap_for(persona) {
                with_quota.push((i, sent));
            }
        }
        if with_quota.is_empty() {
            return Ok(Err(DeferReason::InboxQuotaExhausted));
        }

        let min_sent = with_quota.iter().map(|(_, s)| *s).min().unwrap_or(0);
        let least_loaded: Vec<(usize, u32)> = with_quota
            .into_iter()
            .filter(|(_, s)| *s == min_sent)
            .collect();

        // Walk the roster starting at the cursor so equally loaded personas
        // take turns across consecutive allocations.
        let n = self.personas.len();
        let chosen = (0..n)
            .map(|offset| (self.rotation_cursor + offset) % n)
            .find_map(|idx| least_loaded.iter().find(|(i, _)| *i == idx).copied())
            .unwrap_or(least_loaded[0]);

        self.rotation_cursor = (chosen.0 + 1) % n;
        Ok(Ok(chosen))
    }

    /// Run the per-lead state machine once. Never errors on exhaustion;
    /// errors only on data-catalog gaps (zero variants, empty roster).
    pub fn allocate(
        &mut self,
        profile: &TechnologyProfile,
        history: &DomainHistory,
        ledger: &dyn Ledger,
    ) -> anyhow::Result<AllocationOutcome> {
        let main_tech = match &profile.main_technology {
            Some(t) => t.clone(),
            None => return Ok(AllocationOutcome::Deferred(DeferReason::NoMainTechnology)),
        };

        let variant = self.select_variant(&main_tech, history)?.clone();

        let (persona_idx, sent) = match self.select_persona(history, ledger)? {
            Ok(pick) => pick,
            Err(reason) => {
                log::info!("Deferring {}: {:?}", profile.domain, reason);
                return Ok(AllocationOutcome::Deferred(reason));
            }
        };
        let persona = &self.personas[persona_idx];

        log::debug!(
            "Allocating {} -> persona {} ({} sent today), variant {}",
            profile.domain,
            persona.id,
            sent,
            variant.id
        );

        let subject = compose_subject(&variant, &profile.domain);
        let body = compose_body(persona, &variant, profile, &self.company);

        Ok(AllocationOutcome::Assigned(Assignment {
            persona_id: persona.id.clone(),
            inbox_email: persona.inbox.clone(),
            variant_id: variant.id.clone(),
            main_tech,
            supporting_techs: profile.supporting_technologies.clone(),
            subject,
            body,
        }))
    }
}
