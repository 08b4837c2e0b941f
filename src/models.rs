use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::merge::{CompanyMergeSelections, MergeSelections};

/// Category a contact lands in before anyone has triaged it.
pub const DEFAULT_CATEGORY: &str = "Inbox";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ContactEmail {
    pub email: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ContactMobile {
    pub mobile: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// Keep-in-touch cadence, declared from most to least frequent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    TwicePerYear,
    OncePerYear,
    DoNotKeepInTouch,
    #[default]
    NotSet,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "Weekly",
            Frequency::Monthly => "Monthly",
            Frequency::Quarterly => "Quarterly",
            Frequency::TwicePerYear => "Twice per Year",
            Frequency::OncePerYear => "Once per Year",
            Frequency::DoNotKeepInTouch => "Do not keep in touch",
            Frequency::NotSet => "Not Set",
        }
    }

    /// Parses a stored value, falling back to `NotSet` for anything unknown.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(Frequency::NotSet)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Weekly" => Ok(Frequency::Weekly),
            "Monthly" => Ok(Frequency::Monthly),
            "Quarterly" => Ok(Frequency::Quarterly),
            "Twice per Year" => Ok(Frequency::TwicePerYear),
            "Once per Year" => Ok(Frequency::OncePerYear),
            "Do not keep in touch" => Ok(Frequency::DoNotKeepInTouch),
            "Not Set" | "" => Ok(Frequency::NotSet),
            other => Err(format!("unknown keep-in-touch frequency: {other}")),
        }
    }
}

impl Serialize for Frequency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Frequency::parse_lenient(raw.as_deref()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Contact {
    pub contact_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub job_role: Option<String>,
    pub linkedin: Option<String>,
    pub birthday: Option<String>,
    pub score: Option<i64>,
    pub keep_in_touch_frequency: Frequency,
    pub emails: Vec<ContactEmail>,
    pub mobiles: Vec<ContactMobile>,
    pub companies: Vec<String>,
    pub cities: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Contact {
    /// An empty record carrying only an id.
    #[cfg(test)]
    pub fn blank(contact_id: Uuid) -> Self {
        Self {
            contact_id,
            first_name: None,
            last_name: None,
            category: None,
            description: None,
            job_role: None,
            linkedin: None,
            birthday: None,
            score: None,
            keep_in_touch_frequency: Frequency::NotSet,
            emails: vec![],
            mobiles: vec![],
            companies: vec![],
            cities: vec![],
            tags: vec![],
            created_at: String::new(),
            updated_at: String::new(),
        }
    }
}

pub fn full_name(first: Option<&str>, last: Option<&str>) -> String {
    let first = first.unwrap_or("").trim();
    let last = last.unwrap_or("").trim();
    match (first.is_empty(), last.is_empty()) {
        (false, false) => format!("{first} {last}"),
        (false, true) => first.to_string(),
        (true, false) => last.to_string(),
        (true, true) => String::new(),
    }
}

/// True for absent, blank, and the default `Inbox` category.
pub fn is_uncategorized(category: Option<&str>) -> bool {
    match category.map(str::trim) {
        None | Some("") => true,
        Some(c) => c == DEFAULT_CATEGORY,
    }
}

/// The slice of a contact the duplicate finder reads back from the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContactSummary {
    pub contact_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub linkedin: Option<String>,
}

impl From<&Contact> for ContactSummary {
    fn from(c: &Contact) -> Self {
        Self {
            contact_id: c.contact_id,
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            linkedin: c.linkedin.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ContactInput {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub job_role: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub keep_in_touch_frequency: Frequency,
    #[serde(default)]
    pub emails: Vec<ContactEmail>,
    #[serde(default)]
    pub mobiles: Vec<ContactMobile>,
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ContactInput {
    pub fn validate(&self) -> Result<(), String> {
        let has_name = [&self.first_name, &self.last_name]
            .iter()
            .any(|n| n.as_deref().is_some_and(|s| !s.trim().is_empty()));
        if !has_name {
            return Err("first_name or last_name is required".to_string());
        }
        if let Some(score) = self.score {
            if !(1..=5).contains(&score) {
                return Err(format!("score must be between 1 and 5, got {score}"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStatus {
    Pending,
    Completed,
    Dismissed,
    Failed,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStatus::Pending => "pending",
            MergeStatus::Completed => "completed",
            MergeStatus::Dismissed => "dismissed",
            MergeStatus::Failed => "failed",
        }
    }
}

impl FromStr for MergeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MergeStatus::Pending),
            "completed" => Ok(MergeStatus::Completed),
            "dismissed" => Ok(MergeStatus::Dismissed),
            "failed" => Ok(MergeStatus::Failed),
            other => Err(format!("unknown merge status: {other}")),
        }
    }
}

/// A merge waiting for the external executor to pick it up.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PendingMerge {
    pub merge_id: Uuid,
    pub primary_contact_id: Uuid,
    pub duplicate_contact_id: Uuid,
    pub status: MergeStatus,
    pub merge_selections: MergeSelections,
    pub start_trigger: bool,
    pub notes: String,
    pub detected_at: String,
}

impl PendingMerge {
    pub fn involves(&self, a: Uuid, b: Uuid) -> bool {
        self.other_side(a) == Some(b)
    }

    pub fn other_side(&self, contact_id: Uuid) -> Option<Uuid> {
        if self.primary_contact_id == contact_id {
            Some(self.duplicate_contact_id)
        } else if self.duplicate_contact_id == contact_id {
            Some(self.primary_contact_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPendingMerge {
    pub primary_contact_id: Uuid,
    pub duplicate_contact_id: Uuid,
    pub merge_selections: MergeSelections,
    pub notes: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Companies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Company {
    pub company_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub linkedin: Option<String>,
    pub website: Option<String>,
    /// Normalized, see `companies::normalize_domain`.
    pub domains: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CompanySummary {
    pub company_id: Uuid,
    pub name: String,
    pub category: Option<String>,
}

impl From<&Company> for CompanySummary {
    fn from(c: &Company) -> Self {
        Self {
            company_id: c.company_id,
            name: c.name.clone(),
            category: c.category.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CompanyInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl CompanyInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PendingCompanyMerge {
    pub merge_id: Uuid,
    pub primary_company_id: Uuid,
    pub duplicate_company_id: Uuid,
    pub status: MergeStatus,
    pub merge_selections: CompanyMergeSelections,
    pub start_trigger: bool,
    pub notes: String,
    pub detected_at: String,
}

impl PendingCompanyMerge {
    pub fn other_side(&self, company_id: Uuid) -> Option<Uuid> {
        if self.primary_company_id == company_id {
            Some(self.duplicate_company_id)
        } else if self.duplicate_company_id == company_id {
            Some(self.primary_company_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPendingCompanyMerge {
    pub primary_company_id: Uuid,
    pub duplicate_company_id: Uuid,
    pub merge_selections: CompanyMergeSelections,
    pub notes: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub db: String,
}
