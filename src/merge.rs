//! Field-level merge arbitration between a primary contact and its duplicate.
//!
//! The arbitrator never touches the store. It produces a [`MergeSelections`]
//! document naming, for every field, which side survives; an external executor
//! applies it later.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::duplicates::{normalize_email, normalize_mobile};
use crate::models::{
    is_uncategorized, Company, Contact, ContactEmail, ContactMobile, Frequency, PendingMerge,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Current,
    Duplicate,
    Combine,
}

/// One explicit resolution per contact field. Every field is required when
/// deserialising, so a stored document with a gap is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeSelections {
    pub first_name: Resolution,
    pub last_name: Resolution,
    pub category: Resolution,
    pub description: Resolution,
    pub job_role: Resolution,
    pub linkedin: Resolution,
    pub birthday: Resolution,
    pub score: Resolution,
    pub keep_in_touch_frequency: Resolution,
    pub emails: Resolution,
    pub mobiles: Resolution,
    pub companies: Resolution,
    pub cities: Resolution,
    pub tags: Resolution,
}

impl MergeSelections {
    pub fn scalar_resolutions(&self) -> [(&'static str, Resolution); 9] {
        [
            ("first_name", self.first_name),
            ("last_name", self.last_name),
            ("category", self.category),
            ("description", self.description),
            ("job_role", self.job_role),
            ("linkedin", self.linkedin),
            ("birthday", self.birthday),
            ("score", self.score),
            ("keep_in_touch_frequency", self.keep_in_touch_frequency),
        ]
    }

    pub fn relation_resolutions(&self) -> [(&'static str, Resolution); 5] {
        [
            ("emails", self.emails),
            ("mobiles", self.mobiles),
            ("companies", self.companies),
            ("cities", self.cities),
            ("tags", self.tags),
        ]
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Non-empty beats empty; between two non-empty values the longer wins.
pub fn pick_string(current: Option<&str>, duplicate: Option<&str>) -> Resolution {
    match (non_blank(current), non_blank(duplicate)) {
        (None, Some(_)) => Resolution::Duplicate,
        (Some(c), Some(d)) if d.chars().count() > c.chars().count() => Resolution::Duplicate,
        _ => Resolution::Current,
    }
}

/// Higher score wins; a missing score counts as zero.
pub fn pick_score(current: Option<i64>, duplicate: Option<i64>) -> Resolution {
    if duplicate.unwrap_or(0) > current.unwrap_or(0) {
        Resolution::Duplicate
    } else {
        Resolution::Current
    }
}

/// The more frequent cadence wins. `NotSet` sorts last so it always loses.
pub fn pick_frequency(current: Frequency, duplicate: Frequency) -> Resolution {
    if duplicate < current {
        Resolution::Duplicate
    } else {
        Resolution::Current
    }
}

/// A specific category beats the default one; two specific ones keep current.
pub fn pick_category(current: Option<&str>, duplicate: Option<&str>) -> Resolution {
    if is_uncategorized(current) && !is_uncategorized(duplicate) {
        Resolution::Duplicate
    } else {
        Resolution::Current
    }
}

pub fn arbitrate(current: &Contact, duplicate: &Contact) -> MergeSelections {
    MergeSelections {
        first_name: pick_string(current.first_name.as_deref(), duplicate.first_name.as_deref()),
        last_name: pick_string(current.last_name.as_deref(), duplicate.last_name.as_deref()),
        category: pick_category(current.category.as_deref(), duplicate.category.as_deref()),
        description: pick_string(
            current.description.as_deref(),
            duplicate.description.as_deref(),
        ),
        job_role: pick_string(current.job_role.as_deref(), duplicate.job_role.as_deref()),
        linkedin: pick_string(current.linkedin.as_deref(), duplicate.linkedin.as_deref()),
        birthday: pick_string(current.birthday.as_deref(), duplicate.birthday.as_deref()),
        score: pick_score(current.score, duplicate.score),
        keep_in_touch_frequency: pick_frequency(
            current.keep_in_touch_frequency,
            duplicate.keep_in_touch_frequency,
        ),
        emails: Resolution::Combine,
        mobiles: Resolution::Combine,
        companies: Resolution::Combine,
        cities: Resolution::Combine,
        tags: Resolution::Combine,
    }
}

fn choose<T: Clone>(resolution: Resolution, current: &T, duplicate: &T) -> T {
    match resolution {
        Resolution::Duplicate => duplicate.clone(),
        Resolution::Current | Resolution::Combine => current.clone(),
    }
}

fn union_by<T: Clone>(
    resolution: Resolution,
    current: &[T],
    duplicate: &[T],
    key: impl Fn(&T) -> String,
) -> Vec<T> {
    match resolution {
        Resolution::Current => current.to_vec(),
        Resolution::Duplicate => duplicate.to_vec(),
        Resolution::Combine => {
            let mut seen = HashSet::new();
            current
                .iter()
                .chain(duplicate)
                .filter(|item| seen.insert(key(item)))
                .cloned()
                .collect()
        }
    }
}

/// Relation entries that carry a primary marker.
trait PrimaryFlag {
    fn primary_flag(&mut self) -> &mut bool;
}

impl PrimaryFlag for ContactEmail {
    fn primary_flag(&mut self) -> &mut bool {
        &mut self.is_primary
    }
}

impl PrimaryFlag for ContactMobile {
    fn primary_flag(&mut self) -> &mut bool {
        &mut self.is_primary
    }
}

/// Keeps the first primary entry and demotes the rest.
fn single_primary<T: PrimaryFlag>(mut items: Vec<T>) -> Vec<T> {
    let mut seen_primary = false;
    for item in &mut items {
        let flag = item.primary_flag();
        if *flag {
            *flag = !seen_primary;
            seen_primary = true;
        }
    }
    items
}

/// The record an executor would write back for `current` after following
/// `selections`. Relations are unioned on their normalized key and the
/// current side keeps its primary email and mobile.
pub fn apply_selections(
    current: &Contact,
    duplicate: &Contact,
    selections: &MergeSelections,
) -> Contact {
    let s = selections;
    let name_key = |v: &String| v.trim().to_lowercase();
    Contact {
        contact_id: current.contact_id,
        first_name: choose(s.first_name, &current.first_name, &duplicate.first_name),
        last_name: choose(s.last_name, &current.last_name, &duplicate.last_name),
        category: choose(s.category, &current.category, &duplicate.category),
        description: choose(s.description, &current.description, &duplicate.description),
        job_role: choose(s.job_role, &current.job_role, &duplicate.job_role),
        linkedin: choose(s.linkedin, &current.linkedin, &duplicate.linkedin),
        birthday: choose(s.birthday, &current.birthday, &duplicate.birthday),
        score: choose(s.score, &current.score, &duplicate.score),
        keep_in_touch_frequency: choose(
            s.keep_in_touch_frequency,
            &current.keep_in_touch_frequency,
            &duplicate.keep_in_touch_frequency,
        ),
        emails: single_primary(union_by(s.emails, &current.emails, &duplicate.emails, |e| {
            normalize_email(&e.email).unwrap_or_default()
        })),
        mobiles: single_primary(union_by(
            s.mobiles,
            &current.mobiles,
            &duplicate.mobiles,
            |m| normalize_mobile(&m.mobile).unwrap_or_default(),
        )),
        companies: union_by(s.companies, &current.companies, &duplicate.companies, name_key),
        cities: union_by(s.cities, &current.cities, &duplicate.cities, name_key),
        tags: union_by(s.tags, &current.tags, &duplicate.tags, name_key),
        created_at: current.created_at.clone(),
        updated_at: current.updated_at.clone(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Companies
// ────────────────────────────────────────────────────────────────────────────

/// Category companies carry before triage, alongside the contact default.
const COMPANY_UNSET_CATEGORY: &str = "Not Set";

/// Selection document for a company pair. Relations always combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompanyMergeSelections {
    pub name: Resolution,
    pub website: Resolution,
    pub category: Resolution,
    pub description: Resolution,
    pub linkedin: Resolution,
    pub domains: Resolution,
    pub tags: Resolution,
    pub cities: Resolution,
    pub contacts: Resolution,
}

fn is_company_uncategorized(category: Option<&str>) -> bool {
    is_uncategorized(category) || category.map(str::trim) == Some(COMPANY_UNSET_CATEGORY)
}

pub fn pick_company_category(current: Option<&str>, duplicate: Option<&str>) -> Resolution {
    if is_company_uncategorized(current) && !is_company_uncategorized(duplicate) {
        Resolution::Duplicate
    } else {
        Resolution::Current
    }
}

pub fn arbitrate_companies(current: &Company, duplicate: &Company) -> CompanyMergeSelections {
    CompanyMergeSelections {
        name: pick_string(Some(current.name.as_str()), Some(duplicate.name.as_str())),
        website: pick_string(current.website.as_deref(), duplicate.website.as_deref()),
        category: pick_company_category(current.category.as_deref(), duplicate.category.as_deref()),
        description: pick_string(
            current.description.as_deref(),
            duplicate.description.as_deref(),
        ),
        linkedin: pick_string(current.linkedin.as_deref(), duplicate.linkedin.as_deref()),
        domains: Resolution::Combine,
        tags: Resolution::Combine,
        cities: Resolution::Combine,
        contacts: Resolution::Combine,
    }
}

/// What a queued merge would produce, without writing anything.
#[derive(Debug, Clone, Serialize)]
pub struct MergePreview {
    pub merge: PendingMerge,
    pub merged: Contact,
    /// Scalar fields whose value comes from the duplicate.
    pub from_duplicate: Vec<&'static str>,
    /// Relations unioned from both sides.
    pub combined: Vec<&'static str>,
}

pub fn preview(merge: PendingMerge, current: &Contact, duplicate: &Contact) -> MergePreview {
    let selections = merge.merge_selections;
    let fields_with = |all: &[(&'static str, Resolution)], wanted: Resolution| {
        all.iter()
            .filter(|(_, r)| *r == wanted)
            .map(|(field, _)| *field)
            .collect::<Vec<_>>()
    };
    MergePreview {
        merged: apply_selections(current, duplicate, &selections),
        from_duplicate: fields_with(&selections.scalar_resolutions(), Resolution::Duplicate),
        combined: fields_with(&selections.relation_resolutions(), Resolution::Combine),
        merge,
    }
}
