//! Duplicate contact detection.
//!
//! A scan runs four signals against the record store, strongest first:
//! shared email, shared mobile, shared LinkedIn URL, and similar full name.
//! A contact that matches on several signals is reported once, under the
//! first signal that found it.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{full_name, Contact, ContactSummary, PendingMerge};
use crate::repository::ContactRepository;

pub const DEFAULT_NAME_THRESHOLD: f64 = 0.90;
pub const MIN_NAME_THRESHOLD: f64 = 0.50;
pub const MAX_NAME_THRESHOLD: f64 = 1.00;
pub const DEFAULT_NAME_POOL_LIMIT: usize = 200;
pub const DEFAULT_COMPANY_POOL_LIMIT: usize = 100;

/// Leading characters of the first name used to build the name-match pool.
const NAME_PREFIX_LEN: usize = 2;

// ────────────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────────────

pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Strips whitespace and the usual separators: `-`, `(`, `)`, `.`
pub fn normalize_mobile(mobile: &str) -> Option<String> {
    let normalized: String = mobile
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

pub fn normalize_linkedin(url: &str) -> Option<String> {
    let normalized = url.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Lowercases and collapses inner whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Jaro-Winkler similarity of two full names after case and whitespace folding.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&normalize_name(a), &normalize_name(b))
}

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct FinderConfig {
    pub name_threshold: f64,
    pub name_pool_limit: usize,
    pub company_pool_limit: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            name_threshold: DEFAULT_NAME_THRESHOLD,
            name_pool_limit: DEFAULT_NAME_POOL_LIMIT,
            company_pool_limit: DEFAULT_COMPANY_POOL_LIMIT,
        }
    }
}

impl FinderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_NAME_THRESHOLD..=MAX_NAME_THRESHOLD).contains(&self.name_threshold) {
            return Err(format!(
                "name threshold must be between {MIN_NAME_THRESHOLD} and {MAX_NAME_THRESHOLD}, got {}",
                self.name_threshold
            ));
        }
        if self.name_pool_limit == 0 {
            return Err("name pool limit must be at least 1".to_string());
        }
        if self.company_pool_limit == 0 {
            return Err("company pool limit must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Email,
    Mobile,
    Linkedin,
    Name,
}

impl MatchType {
    /// How much a match on this signal says about identity. Exact
    /// identifiers outrank a fuzzy name.
    pub fn strength(&self) -> u8 {
        match self {
            MatchType::Email => 4,
            MatchType::Mobile => 3,
            MatchType::Linkedin => 2,
            MatchType::Name => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchDetail {
    Value { value: String },
    Similarity { similarity: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub source_contact_id: Uuid,
    pub duplicate_contact_id: Uuid,
    pub duplicate: ContactSummary,
    pub match_type: MatchType,
    pub match_details: MatchDetail,
}

/// The identifying fields of the contact being scanned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateQuery {
    pub contact_id: Uuid,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub mobiles: Vec<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl From<&Contact> for DuplicateQuery {
    fn from(c: &Contact) -> Self {
        Self {
            contact_id: c.contact_id,
            emails: c.emails.iter().map(|e| e.email.clone()).collect(),
            mobiles: c.mobiles.iter().map(|m| m.mobile.clone()).collect(),
            linkedin: c.linkedin.clone(),
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
        }
    }
}

/// Result of a scan. `failed_signals` lists the lookups that errored; their
/// matches are missing from `candidates`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateScan {
    pub candidates: Vec<DuplicateCandidate>,
    pub failed_signals: Vec<MatchType>,
}

impl DuplicateScan {
    pub fn is_partial(&self) -> bool {
        !self.failed_signals.is_empty()
    }

    /// Folds one signal's matches into the scan. The scan's own contact is
    /// never kept.
    fn absorb(&mut self, found: Vec<DuplicateCandidate>) {
        let found = found
            .into_iter()
            .filter(|c| c.duplicate_contact_id != c.source_contact_id)
            .collect();
        self.candidates = merge_candidates(std::mem::take(&mut self.candidates), found);
    }

    fn signal_failed(&mut self, signal: MatchType) {
        if !self.failed_signals.contains(&signal) {
            self.failed_signals.push(signal);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Finder
// ────────────────────────────────────────────────────────────────────────────

fn candidate(
    source: Uuid,
    duplicate: ContactSummary,
    match_type: MatchType,
    match_details: MatchDetail,
) -> DuplicateCandidate {
    DuplicateCandidate {
        source_contact_id: source,
        duplicate_contact_id: duplicate.contact_id,
        duplicate,
        match_type,
        match_details,
    }
}

pub fn find_contact_duplicates<R: ContactRepository + ?Sized>(
    repo: &R,
    query: &DuplicateQuery,
    config: &FinderConfig,
) -> DuplicateScan {
    let mut scan = DuplicateScan::default();
    let source = query.contact_id;
    if source.is_nil() {
        return scan;
    }
    let exclude = Some(source);

    let emails: Vec<String> = query.emails.iter().filter_map(|e| normalize_email(e)).collect();
    if !emails.is_empty() {
        match repo.contacts_by_emails(&emails, exclude) {
            Ok(rows) => scan.absorb(
                rows.into_iter()
                    .map(|(summary, value)| {
                        candidate(source, summary, MatchType::Email, MatchDetail::Value { value })
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!(contact_id = %source, error = %e, "email duplicate lookup failed");
                scan.signal_failed(MatchType::Email);
            }
        }
    }

    let mobiles: Vec<String> = query.mobiles.iter().filter_map(|m| normalize_mobile(m)).collect();
    if !mobiles.is_empty() {
        match repo.contacts_by_mobiles(&mobiles, exclude) {
            Ok(rows) => scan.absorb(
                rows.into_iter()
                    .map(|(summary, value)| {
                        candidate(source, summary, MatchType::Mobile, MatchDetail::Value { value })
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!(contact_id = %source, error = %e, "mobile duplicate lookup failed");
                scan.signal_failed(MatchType::Mobile);
            }
        }
    }

    if let Some(linkedin) = query.linkedin.as_deref().and_then(normalize_linkedin) {
        match repo.contacts_by_linkedin(&linkedin, exclude) {
            Ok(rows) => scan.absorb(
                rows.into_iter()
                    .map(|summary| {
                        let value = summary.linkedin.clone().unwrap_or_else(|| linkedin.clone());
                        candidate(source, summary, MatchType::Linkedin, MatchDetail::Value { value })
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!(contact_id = %source, error = %e, "linkedin duplicate lookup failed");
                scan.signal_failed(MatchType::Linkedin);
            }
        }
    }

    let first = normalize_name(query.first_name.as_deref().unwrap_or(""));
    if !first.is_empty() {
        let last = normalize_name(query.last_name.as_deref().unwrap_or(""));
        let prefix: String = first.chars().take(NAME_PREFIX_LEN).collect();
        let wanted = full_name(Some(first.as_str()), Some(last.as_str()));

        match repo.name_pool(&prefix, &last, exclude, config.name_pool_limit) {
            Ok(pool) => scan.absorb(
                pool.into_iter()
                    .filter_map(|summary| {
                        let other =
                            full_name(summary.first_name.as_deref(), summary.last_name.as_deref());
                        if other.is_empty() {
                            return None;
                        }
                        let similarity = name_similarity(&wanted, &other);
                        (similarity >= config.name_threshold).then(|| {
                            let similarity = (similarity * 1000.0).round() / 1000.0;
                            candidate(source, summary, MatchType::Name, MatchDetail::Similarity { similarity })
                        })
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!(contact_id = %source, error = %e, "name duplicate lookup failed");
                scan.signal_failed(MatchType::Name);
            }
        }
    }

    debug!(
        contact_id = %source,
        candidates = scan.candidates.len(),
        failed = scan.failed_signals.len(),
        "duplicate scan finished"
    );
    scan
}

/// Folds `found` into `known` by duplicate id. When both lists hold the same
/// contact the stronger match type is kept; on a tie the known entry stays.
pub fn merge_candidates(
    mut known: Vec<DuplicateCandidate>,
    found: Vec<DuplicateCandidate>,
) -> Vec<DuplicateCandidate> {
    for candidate in found {
        match known
            .iter_mut()
            .find(|k| k.duplicate_contact_id == candidate.duplicate_contact_id)
        {
            Some(existing) if candidate.match_type.strength() > existing.match_type.strength() => {
                *existing = candidate;
            }
            Some(_) => {}
            None => known.push(candidate),
        }
    }
    known
}

/// Drops candidates that already sit in the merge queue with `contact_id`.
pub fn exclude_queued(
    candidates: Vec<DuplicateCandidate>,
    contact_id: Uuid,
    queued: &[PendingMerge],
) -> Vec<DuplicateCandidate> {
    candidates
        .into_iter()
        .filter(|c| !queued.iter().any(|m| m.involves(contact_id, c.duplicate_contact_id)))
        .collect()
}

/// Scans every contact that owns one of `emails` (for instance the
/// participants of an email thread). A pair found from both sides is
/// reported once.
pub fn find_duplicates_for_participants<R: ContactRepository + ?Sized>(
    repo: &R,
    emails: &[String],
    config: &FinderConfig,
) -> DuplicateScan {
    let mut result = DuplicateScan::default();
    let emails: Vec<String> = emails.iter().filter_map(|e| normalize_email(e)).collect();
    if emails.is_empty() {
        return result;
    }

    let owners = match repo.contacts_by_emails(&emails, None) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "participant lookup failed");
            result.signal_failed(MatchType::Email);
            return result;
        }
    };

    let mut owner_ids: Vec<Uuid> = Vec::new();
    for (summary, _) in owners {
        if !owner_ids.contains(&summary.contact_id) {
            owner_ids.push(summary.contact_id);
        }
    }

    for owner_id in owner_ids {
        let contact = match repo.get_contact(owner_id) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(e) => {
                warn!(contact_id = %owner_id, error = %e, "could not load participant contact");
                continue;
            }
        };

        let scan = find_contact_duplicates(repo, &DuplicateQuery::from(&contact), config);
        for signal in scan.failed_signals {
            result.signal_failed(signal);
        }
        for candidate in scan.candidates {
            let seen = result.candidates.iter().any(|c| {
                (c.source_contact_id == candidate.source_contact_id
                    && c.duplicate_contact_id == candidate.duplicate_contact_id)
                    || (c.source_contact_id == candidate.duplicate_contact_id
                        && c.duplicate_contact_id == candidate.source_contact_id)
            });
            if !seen {
                result.candidates.push(candidate);
            }
        }
    }

    result
}
