//! Duplicate company detection.
//!
//! Signals run strongest first: LinkedIn page, website, shared domain, similar
//! name. Pairs already waiting in the company merge queue are reported as
//! well, under `detected`, so they show up beside fresh matches.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::duplicates::{normalize_linkedin, FinderConfig};
use crate::models::{Company, CompanySummary};
use crate::repository::CompanyRepository;

/// Normalized names shorter than this neither trigger a name search nor
/// count as a containment match.
pub const MIN_COMPANY_NAME_LEN: usize = 4;

const DOMAIN_SUFFIXES: [&str; 11] = [
    "com", "net", "org", "io", "co", "uk", "it", "de", "fr", "es", "eu",
];

const LEGAL_SUFFIXES: [&str; 10] = [
    "ltd", "llc", "inc", "corp", "srl", "spa", "gmbh", "sa", "ag", "plc",
];

const NAME_PUNCTUATION: [char; 8] = ['-', '_', '.', ',', '\'', '"', '&', '+'];

// ────────────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────────────

/// Bare host: no scheme, no `www.`, no path, no port.
pub fn normalize_domain(domain: &str) -> Option<String> {
    let lower = domain.trim().to_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let host = rest.split('/').next().unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    (!host.is_empty()).then(|| host.to_string())
}

pub fn normalize_website(url: &str) -> Option<String> {
    let lower = url.trim().to_lowercase();
    let normalized = lower.trim_end_matches('/');
    (!normalized.is_empty()).then(|| normalized.to_string())
}

/// Folds a company name for fuzzy comparison: one trailing TLD and one
/// trailing legal form are dropped, then whitespace and punctuation.
/// A legal form only counts as a separate word ("Acme Ltd", not "Visa").
pub fn normalize_company_name(name: &str) -> Option<String> {
    let mut n = name.trim().to_lowercase();

    let tld_cut = n
        .rsplit_once('.')
        .filter(|(_, tld)| DOMAIN_SUFFIXES.contains(tld))
        .map(|(stem, _)| stem.len());
    if let Some(cut) = tld_cut {
        n.truncate(cut);
    }

    let legal_cut = {
        let bare = n.strip_suffix('.').unwrap_or(&n);
        bare.rsplit_once(|c: char| c.is_whitespace() || c == ',')
            .filter(|(_, last)| LEGAL_SUFFIXES.contains(last))
            .map(|(stem, _)| stem.len())
    };
    if let Some(cut) = legal_cut {
        n.truncate(cut);
    }

    let folded: String = n
        .chars()
        .filter(|c| !c.is_whitespace() && !NAME_PUNCTUATION.contains(c))
        .collect();
    (!folded.is_empty()).then_some(folded)
}

pub fn company_names_similar(a: &str, b: &str) -> bool {
    match (normalize_company_name(a), normalize_company_name(b)) {
        (Some(n1), Some(n2)) => normalized_names_similar(&n1, &n2),
        _ => false,
    }
}

fn normalized_names_similar(n1: &str, n2: &str) -> bool {
    if n1 == n2 {
        return true;
    }
    let (len1, len2) = (n1.chars().count(), n2.chars().count());

    if (len1 >= MIN_COMPANY_NAME_LEN && n2.contains(n1))
        || (len2 >= MIN_COMPANY_NAME_LEN && n1.contains(n2))
    {
        return true;
    }

    // shared prefix covering 80% of the shorter name
    let (shorter, longer, short_len) = if len1 < len2 {
        (n1, n2, len1)
    } else {
        (n2, n1, len2)
    };
    let prefix_len = short_len * 8 / 10;
    if prefix_len >= MIN_COMPANY_NAME_LEN {
        let prefix: String = shorter.chars().take(prefix_len).collect();
        if longer.starts_with(&prefix) {
            return true;
        }
    }

    // roughly 15% edits, at least one
    if len1 >= 5 && len2 >= 5 {
        let allowed = (len1.max(len2) * 15 / 100).max(1);
        return strsim::levenshtein(n1, n2) <= allowed;
    }
    false
}

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyMatchType {
    Linkedin,
    Website,
    Domain,
    Name,
    /// Already sitting in the company merge queue.
    Detected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDuplicateCandidate {
    pub source_company_id: Uuid,
    pub duplicate_company_id: Uuid,
    pub duplicate: CompanySummary,
    pub match_type: CompanyMatchType,
    pub match_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct CompanyQuery {
    pub company_id: Uuid,
    pub name: String,
    pub linkedin: Option<String>,
    pub website: Option<String>,
    pub domains: Vec<String>,
}

impl From<&Company> for CompanyQuery {
    fn from(c: &Company) -> Self {
        Self {
            company_id: c.company_id,
            name: c.name.clone(),
            linkedin: c.linkedin.clone(),
            website: c.website.clone(),
            domains: c.domains.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyScan {
    pub candidates: Vec<CompanyDuplicateCandidate>,
    pub failed_signals: Vec<CompanyMatchType>,
}

impl CompanyScan {
    pub fn is_partial(&self) -> bool {
        !self.failed_signals.is_empty()
    }

    fn seen(&self, company_id: Uuid) -> bool {
        self.candidates
            .iter()
            .any(|c| c.duplicate_company_id == company_id)
    }

    fn push(&mut self, candidate: CompanyDuplicateCandidate) {
        if candidate.duplicate_company_id != candidate.source_company_id
            && !self.seen(candidate.duplicate_company_id)
        {
            self.candidates.push(candidate);
        }
    }

    fn absorb(
        &mut self,
        source: Uuid,
        rows: Vec<(CompanySummary, String)>,
        match_type: CompanyMatchType,
    ) {
        for (duplicate, match_value) in rows {
            self.push(CompanyDuplicateCandidate {
                source_company_id: source,
                duplicate_company_id: duplicate.company_id,
                duplicate,
                match_type,
                match_value,
                merge_id: None,
            });
        }
    }

    fn signal_failed(&mut self, signal: CompanyMatchType) {
        if !self.failed_signals.contains(&signal) {
            self.failed_signals.push(signal);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Finder
// ────────────────────────────────────────────────────────────────────────────

pub fn find_company_duplicates<R: CompanyRepository + ?Sized>(
    repo: &R,
    query: &CompanyQuery,
    config: &FinderConfig,
) -> CompanyScan {
    let mut scan = CompanyScan::default();
    let source = query.company_id;
    if source.is_nil() {
        return scan;
    }
    let exclude = Some(source);

    if let Some(linkedin) = query.linkedin.as_deref().and_then(normalize_linkedin) {
        match repo.companies_by_linkedin(&linkedin, exclude) {
            Ok(rows) => scan.absorb(source, rows, CompanyMatchType::Linkedin),
            Err(e) => {
                warn!(company_id = %source, error = %e, "linkedin company lookup failed");
                scan.signal_failed(CompanyMatchType::Linkedin);
            }
        }
    }

    if let Some(website) = query.website.as_deref().and_then(normalize_website) {
        match repo.companies_by_website(&website, exclude) {
            Ok(rows) => scan.absorb(source, rows, CompanyMatchType::Website),
            Err(e) => {
                warn!(company_id = %source, error = %e, "website company lookup failed");
                scan.signal_failed(CompanyMatchType::Website);
            }
        }
    }

    let domains: Vec<String> = query.domains.iter().filter_map(|d| normalize_domain(d)).collect();
    if !domains.is_empty() {
        match repo.companies_by_domains(&domains, exclude) {
            Ok(rows) => scan.absorb(source, rows, CompanyMatchType::Domain),
            Err(e) => {
                warn!(company_id = %source, error = %e, "domain company lookup failed");
                scan.signal_failed(CompanyMatchType::Domain);
            }
        }
    }

    let needle = normalize_company_name(&query.name)
        .filter(|n| n.chars().count() >= MIN_COMPANY_NAME_LEN);
    if let Some(needle) = needle {
        match repo.company_name_pool(&needle, exclude, config.company_pool_limit) {
            Ok(pool) => {
                let rows = pool
                    .into_iter()
                    .filter(|c| company_names_similar(&query.name, &c.name))
                    .map(|c| {
                        let name = c.name.clone();
                        (c, name)
                    })
                    .collect();
                scan.absorb(source, rows, CompanyMatchType::Name);
            }
            Err(e) => {
                warn!(company_id = %source, error = %e, "company name lookup failed");
                scan.signal_failed(CompanyMatchType::Name);
            }
        }
    }

    match repo.pending_company_merges_for(source) {
        Ok(queued) => {
            for merge in queued {
                let Some(other) = merge.other_side(source) else {
                    continue;
                };
                if scan.seen(other) {
                    continue;
                }
                match repo.get_company(other) {
                    Ok(Some(company)) => scan.push(CompanyDuplicateCandidate {
                        source_company_id: source,
                        duplicate_company_id: other,
                        duplicate: CompanySummary::from(&company),
                        match_type: CompanyMatchType::Detected,
                        match_value: "previously detected".to_string(),
                        merge_id: Some(merge.merge_id),
                    }),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(company_id = %other, error = %e, "could not load queued company");
                        scan.signal_failed(CompanyMatchType::Detected);
                    }
                }
            }
        }
        Err(e) => {
            warn!(company_id = %source, error = %e, "could not load queued company merges");
            scan.signal_failed(CompanyMatchType::Detected);
        }
    }

    debug!(
        company_id = %source,
        candidates = scan.candidates.len(),
        failed = scan.failed_signals.len(),
        "company duplicate scan finished"
    );
    scan
}

/// Scans every company owning one of `domains` (for instance the sender
/// domains of an email thread). A pair found from both sides is reported once.
pub fn find_company_duplicates_for_domains<R: CompanyRepository + ?Sized>(
    repo: &R,
    domains: &[String],
    config: &FinderConfig,
) -> CompanyScan {
    let mut result = CompanyScan::default();
    let domains: Vec<String> = domains.iter().filter_map(|d| normalize_domain(d)).collect();
    if domains.is_empty() {
        return result;
    }

    let owners = match repo.companies_by_domains(&domains, None) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "domain owner lookup failed");
            result.signal_failed(CompanyMatchType::Domain);
            return result;
        }
    };

    let mut owner_ids: Vec<Uuid> = Vec::new();
    for (summary, _) in owners {
        if !owner_ids.contains(&summary.company_id) {
            owner_ids.push(summary.company_id);
        }
    }

    for owner_id in owner_ids {
        let company = match repo.get_company(owner_id) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(e) => {
                warn!(company_id = %owner_id, error = %e, "could not load domain owner");
                continue;
            }
        };

        let scan = find_company_duplicates(repo, &CompanyQuery::from(&company), config);
        for signal in scan.failed_signals {
            result.signal_failed(signal);
        }
        for candidate in scan.candidates {
            let seen = result.candidates.iter().any(|c| {
                (c.source_company_id == candidate.source_company_id
                    && c.duplicate_company_id == candidate.duplicate_company_id)
                    || (c.source_company_id == candidate.duplicate_company_id
                        && c.duplicate_company_id == candidate.source_company_id)
            });
            if !seen {
                result.candidates.push(candidate);
            }
        }
    }

    result
}
