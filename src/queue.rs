//! The merge queue as the handlers see it: arbitrate a pair and queue it, or
//! list the duplicates that are not queued yet.

use tracing::{info, warn};
use uuid::Uuid;

use crate::companies::{find_company_duplicates, CompanyQuery, CompanyScan};
use crate::duplicates::{exclude_queued, find_contact_duplicates, DuplicateQuery, DuplicateScan, FinderConfig};
use crate::error::{StoreError, StoreResult};
use crate::merge::{arbitrate, arbitrate_companies};
use crate::models::{
    Company, Contact, NewPendingCompanyMerge, NewPendingMerge, PendingCompanyMerge, PendingMerge,
};
use crate::repository::{CompanyRepository, ContactRepository};

/// Loads both contacts, arbitrates the field selections and queues the pair
/// with `primary_id` as the surviving record.
pub fn queue_contact_merge<R: ContactRepository + ?Sized>(
    repo: &R,
    primary_id: Uuid,
    duplicate_id: Uuid,
    notes: &str,
) -> StoreResult<PendingMerge> {
    if primary_id == duplicate_id {
        return Err(StoreError::SelfMerge(primary_id));
    }
    let primary = repo
        .get_contact(primary_id)?
        .ok_or(StoreError::ContactNotFound(primary_id))?;
    let duplicate = repo
        .get_contact(duplicate_id)?
        .ok_or(StoreError::ContactNotFound(duplicate_id))?;

    let pending = repo.queue_merge(NewPendingMerge {
        primary_contact_id: primary_id,
        duplicate_contact_id: duplicate_id,
        merge_selections: arbitrate(&primary, &duplicate),
        notes: notes.to_string(),
    })?;
    info!(
        merge_id = %pending.merge_id,
        primary = %primary_id,
        duplicate = %duplicate_id,
        "contact merge queued"
    );
    Ok(pending)
}

/// Duplicate candidates for `contact` minus the pairs already queued. When
/// the queue cannot be read the unfiltered scan is returned.
pub fn open_duplicates<R: ContactRepository + ?Sized>(
    repo: &R,
    contact: &Contact,
    config: &FinderConfig,
) -> DuplicateScan {
    let id = contact.contact_id;
    let mut scan = find_contact_duplicates(repo, &DuplicateQuery::from(contact), config);
    match repo.pending_merges_for(id) {
        Ok(queued) => scan.candidates = exclude_queued(scan.candidates, id, &queued),
        Err(e) => warn!(contact_id = %id, error = %e, "could not load queued merges"),
    }
    if scan.is_partial() {
        warn!(contact_id = %id, failed = ?scan.failed_signals, "duplicate scan is partial");
    }
    scan
}

pub fn queue_company_merge<R: CompanyRepository + ?Sized>(
    repo: &R,
    primary_id: Uuid,
    duplicate_id: Uuid,
    notes: &str,
) -> StoreResult<PendingCompanyMerge> {
    if primary_id == duplicate_id {
        return Err(StoreError::SelfMerge(primary_id));
    }
    let primary = repo
        .get_company(primary_id)?
        .ok_or(StoreError::CompanyNotFound(primary_id))?;
    let duplicate = repo
        .get_company(duplicate_id)?
        .ok_or(StoreError::CompanyNotFound(duplicate_id))?;

    let pending = repo.queue_company_merge(NewPendingCompanyMerge {
        primary_company_id: primary_id,
        duplicate_company_id: duplicate_id,
        merge_selections: arbitrate_companies(&primary, &duplicate),
        notes: notes.to_string(),
    })?;
    info!(
        merge_id = %pending.merge_id,
        primary = %primary_id,
        duplicate = %duplicate_id,
        "company merge queued"
    );
    Ok(pending)
}

/// Company candidates, queued pairs included under `detected`.
pub fn company_duplicates<R: CompanyRepository + ?Sized>(
    repo: &R,
    company: &Company,
    config: &FinderConfig,
) -> CompanyScan {
    let scan = find_company_duplicates(repo, &CompanyQuery::from(company), config);
    if scan.is_partial() {
        warn!(company_id = %company.company_id, failed = ?scan.failed_signals, "company scan is partial");
    }
    scan
}
