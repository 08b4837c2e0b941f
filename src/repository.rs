use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{
    Company, CompanySummary, Contact, ContactSummary, NewPendingCompanyMerge, NewPendingMerge,
    PendingCompanyMerge, PendingMerge,
};

/// The record-store operations the duplicate finder and the merge queue need.
///
/// Lookup arguments arrive already normalized (see `duplicates::normalize_*`);
/// implementations compare against their own stored values normalized the
/// same way. `exclude` drops one contact id from every result.
pub trait ContactRepository: Send + Sync {
    fn get_contact(&self, contact_id: Uuid) -> StoreResult<Option<Contact>>;

    /// Owners of any of `emails`, each paired with the stored address that matched.
    fn contacts_by_emails(
        &self,
        emails: &[String],
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(ContactSummary, String)>>;

    /// Owners of any of `mobiles`, each paired with the stored number that matched.
    fn contacts_by_mobiles(
        &self,
        mobiles: &[String],
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(ContactSummary, String)>>;

    fn contacts_by_linkedin(
        &self,
        linkedin: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<ContactSummary>>;

    /// Contacts whose first name starts with `first_prefix` or whose last
    /// name equals `last_name`, both sides folded by `normalize_name`. An
    /// empty `last_name` matches nothing on its own.
    fn name_pool(
        &self,
        first_prefix: &str,
        last_name: &str,
        exclude: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<ContactSummary>>;

    fn queue_merge(&self, merge: NewPendingMerge) -> StoreResult<PendingMerge>;

    /// Pending merges where the contact is on either side.
    fn pending_merges_for(&self, contact_id: Uuid) -> StoreResult<Vec<PendingMerge>>;
}

/// Company-side lookups, with the same normalization contract as
/// [`ContactRepository`]. Matches come back paired with the stored value.
pub trait CompanyRepository: Send + Sync {
    fn get_company(&self, company_id: Uuid) -> StoreResult<Option<Company>>;

    fn companies_by_linkedin(
        &self,
        linkedin: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(CompanySummary, String)>>;

    fn companies_by_website(
        &self,
        website: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(CompanySummary, String)>>;

    fn companies_by_domains(
        &self,
        domains: &[String],
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(CompanySummary, String)>>;

    /// Companies whose normalized name contains `normalized_name`, is
    /// contained in it, or shares its first four characters.
    fn company_name_pool(
        &self,
        normalized_name: &str,
        exclude: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<CompanySummary>>;

    fn queue_company_merge(&self, merge: NewPendingCompanyMerge) -> StoreResult<PendingCompanyMerge>;

    fn pending_company_merges_for(&self, company_id: Uuid) -> StoreResult<Vec<PendingCompanyMerge>>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::companies::{normalize_company_name, normalize_website, MIN_COMPANY_NAME_LEN};
    use crate::duplicates::{normalize_email, normalize_linkedin, normalize_mobile, normalize_name};
    use crate::error::StoreError;
    use crate::models::MergeStatus;

    /// In-memory store with per-operation failure injection.
    #[derive(Default)]
    pub struct MemoryRepository {
        pub contacts: Mutex<Vec<Contact>>,
        pub merges: Mutex<Vec<PendingMerge>>,
        pub companies: Mutex<Vec<Company>>,
        pub company_merges: Mutex<Vec<PendingCompanyMerge>>,
        failing: Mutex<HashSet<&'static str>>,
    }

    impl MemoryRepository {
        pub fn with_contacts(contacts: Vec<Contact>) -> Self {
            Self {
                contacts: Mutex::new(contacts),
                ..Default::default()
            }
        }

        pub fn with_companies(companies: Vec<Company>) -> Self {
            Self {
                companies: Mutex::new(companies),
                ..Default::default()
            }
        }

        pub fn fail(&self, op: &'static str) {
            self.failing.lock().unwrap().insert(op);
        }

        fn check(&self, op: &'static str) -> StoreResult<()> {
            if self.failing.lock().unwrap().contains(op) {
                return Err(StoreError::Unavailable(format!("{op} unavailable")));
            }
            Ok(())
        }

        fn others(&self, exclude: Option<Uuid>) -> Vec<Contact> {
            self.contacts
                .lock()
                .unwrap()
                .iter()
                .filter(|c| Some(c.contact_id) != exclude)
                .cloned()
                .collect()
        }

        fn other_companies(&self, exclude: Option<Uuid>) -> Vec<Company> {
            self.companies
                .lock()
                .unwrap()
                .iter()
                .filter(|c| Some(c.company_id) != exclude)
                .cloned()
                .collect()
        }
    }

    impl ContactRepository for MemoryRepository {
        fn get_contact(&self, contact_id: Uuid) -> StoreResult<Option<Contact>> {
            self.check("get_contact")?;
            Ok(self.others(None).into_iter().find(|c| c.contact_id == contact_id))
        }

        fn contacts_by_emails(
            &self,
            emails: &[String],
            exclude: Option<Uuid>,
        ) -> StoreResult<Vec<(ContactSummary, String)>> {
            self.check("contacts_by_emails")?;
            let mut out = Vec::new();
            for c in self.others(exclude) {
                for e in &c.emails {
                    if normalize_email(&e.email).is_some_and(|n| emails.contains(&n)) {
                        out.push((ContactSummary::from(&c), e.email.clone()));
                    }
                }
            }
            Ok(out)
        }

        fn contacts_by_mobiles(
            &self,
            mobiles: &[String],
            exclude: Option<Uuid>,
        ) -> StoreResult<Vec<(ContactSummary, String)>> {
            self.check("contacts_by_mobiles")?;
            let mut out = Vec::new();
            for c in self.others(exclude) {
                for m in &c.mobiles {
                    if normalize_mobile(&m.mobile).is_some_and(|n| mobiles.contains(&n)) {
                        out.push((ContactSummary::from(&c), m.mobile.clone()));
                    }
                }
            }
            Ok(out)
        }

        fn contacts_by_linkedin(
            &self,
            linkedin: &str,
            exclude: Option<Uuid>,
        ) -> StoreResult<Vec<ContactSummary>> {
            self.check("contacts_by_linkedin")?;
            Ok(self
                .others(exclude)
                .iter()
                .filter(|c| {
                    c.linkedin.as_deref().and_then(normalize_linkedin).as_deref() == Some(linkedin)
                })
                .map(ContactSummary::from)
                .collect())
        }

        fn name_pool(
            &self,
            first_prefix: &str,
            last_name: &str,
            exclude: Option<Uuid>,
            limit: usize,
        ) -> StoreResult<Vec<ContactSummary>> {
            self.check("name_pool")?;
            let norm = |v: &Option<String>| normalize_name(v.as_deref().unwrap_or(""));
            Ok(self
                .others(exclude)
                .iter()
                .filter(|c| {
                    (!first_prefix.is_empty() && norm(&c.first_name).starts_with(first_prefix))
                        || (!last_name.is_empty() && norm(&c.last_name) == last_name)
                })
                .take(limit)
                .map(ContactSummary::from)
                .collect())
        }

        fn queue_merge(&self, merge: NewPendingMerge) -> StoreResult<PendingMerge> {
            self.check("queue_merge")?;
            let mut merges = self.merges.lock().unwrap();
            if merges.iter().any(|m| {
                m.status == MergeStatus::Pending
                    && m.primary_contact_id == merge.primary_contact_id
                    && m.duplicate_contact_id == merge.duplicate_contact_id
            }) {
                return Err(StoreError::AlreadyQueued {
                    primary: merge.primary_contact_id,
                    duplicate: merge.duplicate_contact_id,
                });
            }
            let pending = PendingMerge {
                merge_id: Uuid::new_v4(),
                primary_contact_id: merge.primary_contact_id,
                duplicate_contact_id: merge.duplicate_contact_id,
                status: MergeStatus::Pending,
                merge_selections: merge.merge_selections,
                start_trigger: true,
                notes: merge.notes,
                detected_at: "2025-01-01 00:00:00".to_string(),
            };
            merges.push(pending.clone());
            Ok(pending)
        }

        fn pending_merges_for(&self, contact_id: Uuid) -> StoreResult<Vec<PendingMerge>> {
            self.check("pending_merges_for")?;
            Ok(self
                .merges
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.status == MergeStatus::Pending && m.other_side(contact_id).is_some())
                .cloned()
                .collect())
        }
    }

    /// The pool rule the SQLite store expresses with `instr`/`substr`.
    fn pool_matches(stored: &str, needle: &str) -> bool {
        stored.contains(needle)
            || needle.contains(stored)
            || stored
                .chars()
                .take(MIN_COMPANY_NAME_LEN)
                .eq(needle.chars().take(MIN_COMPANY_NAME_LEN))
    }

    impl CompanyRepository for MemoryRepository {
        fn get_company(&self, company_id: Uuid) -> StoreResult<Option<Company>> {
            self.check("get_company")?;
            Ok(self.other_companies(None).into_iter().find(|c| c.company_id == company_id))
        }

        fn companies_by_linkedin(
            &self,
            linkedin: &str,
            exclude: Option<Uuid>,
        ) -> StoreResult<Vec<(CompanySummary, String)>> {
            self.check("companies_by_linkedin")?;
            Ok(self
                .other_companies(exclude)
                .iter()
                .filter_map(|c| {
                    let stored = c.linkedin.as_deref()?;
                    (normalize_linkedin(stored).as_deref() == Some(linkedin))
                        .then(|| (CompanySummary::from(c), stored.to_string()))
                })
                .collect())
        }

        fn companies_by_website(
            &self,
            website: &str,
            exclude: Option<Uuid>,
        ) -> StoreResult<Vec<(CompanySummary, String)>> {
            self.check("companies_by_website")?;
            Ok(self
                .other_companies(exclude)
                .iter()
                .filter_map(|c| {
                    let stored = c.website.as_deref()?;
                    (normalize_website(stored).as_deref() == Some(website))
                        .then(|| (CompanySummary::from(c), stored.to_string()))
                })
                .collect())
        }

        fn companies_by_domains(
            &self,
            domains: &[String],
            exclude: Option<Uuid>,
        ) -> StoreResult<Vec<(CompanySummary, String)>> {
            self.check("companies_by_domains")?;
            let mut out = Vec::new();
            for c in self.other_companies(exclude) {
                for d in c.domains.iter().filter(|d| domains.contains(*d)) {
                    out.push((CompanySummary::from(&c), d.clone()));
                }
            }
            Ok(out)
        }

        fn company_name_pool(
            &self,
            normalized_name: &str,
            exclude: Option<Uuid>,
            limit: usize,
        ) -> StoreResult<Vec<CompanySummary>> {
            self.check("company_name_pool")?;
            Ok(self
                .other_companies(exclude)
                .iter()
                .filter(|c| {
                    normalize_company_name(&c.name).is_some_and(|n| pool_matches(&n, normalized_name))
                })
                .take(limit)
                .map(CompanySummary::from)
                .collect())
        }

        fn queue_company_merge(
            &self,
            merge: NewPendingCompanyMerge,
        ) -> StoreResult<PendingCompanyMerge> {
            self.check("queue_company_merge")?;
            let mut merges = self.company_merges.lock().unwrap();
            if merges.iter().any(|m| {
                m.status == MergeStatus::Pending
                    && m.primary_company_id == merge.primary_company_id
                    && m.duplicate_company_id == merge.duplicate_company_id
            }) {
                return Err(StoreError::AlreadyQueued {
                    primary: merge.primary_company_id,
                    duplicate: merge.duplicate_company_id,
                });
            }
            let pending = PendingCompanyMerge {
                merge_id: Uuid::new_v4(),
                primary_company_id: merge.primary_company_id,
                duplicate_company_id: merge.duplicate_company_id,
                status: MergeStatus::Pending,
                merge_selections: merge.merge_selections,
                start_trigger: true,
                notes: merge.notes,
                detected_at: "2025-01-01 00:00:00".to_string(),
            };
            merges.push(pending.clone());
            Ok(pending)
        }

        fn pending_company_merges_for(
            &self,
            company_id: Uuid,
        ) -> StoreResult<Vec<PendingCompanyMerge>> {
            self.check("pending_company_merges_for")?;
            Ok(self
                .company_merges
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.status == MergeStatus::Pending && m.other_side(company_id).is_some())
                .cloned()
                .collect())
        }
    }
}
