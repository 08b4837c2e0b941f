use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use crate::companies::{normalize_company_name, normalize_domain, normalize_website};
use crate::duplicates::{normalize_email, normalize_linkedin, normalize_mobile, normalize_name};
use crate::error::{StoreError, StoreResult};
use crate::merge::{CompanyMergeSelections, MergeSelections};
use crate::models::{
    Company, CompanyInput, CompanySummary, Contact, ContactEmail, ContactInput, ContactMobile,
    ContactSummary, Frequency, MergeStatus, NewPendingCompanyMerge, NewPendingMerge,
    PendingCompanyMerge, PendingMerge,
};
use crate::repository::{CompanyRepository, ContactRepository};

const CONTACT_COLUMNS: &str = "contact_id, first_name, last_name, category, description, job_role,
     linkedin, birthday, score, keep_in_touch_frequency, created_at, updated_at";

const COMPANY_COLUMNS: &str =
    "company_id, name, category, description, linkedin, website, created_at, updated_at";

const MERGE_COLUMNS: &str = "merge_id, primary_contact_id, duplicate_contact_id, status,
     merge_selections, start_trigger, notes, detected_at";

const COMPANY_MERGE_COLUMNS: &str = "merge_id, primary_company_id, duplicate_company_id, status,
     merge_selections, start_trigger, notes, detected_at";

/// A named entity linked to contacts through a join table.
struct Linked {
    table: &'static str,
    key: &'static str,
    join_table: &'static str,
    join_col: &'static str,
}

const COMPANIES: Linked = Linked {
    table: "companies",
    key: "company_id",
    join_table: "contact_companies",
    join_col: "company_id",
};
const CITIES: Linked = Linked {
    table: "cities",
    key: "id",
    join_table: "contact_cities",
    join_col: "city_id",
};
const TAGS: Linked = Linked {
    table: "tags",
    key: "id",
    join_table: "contact_tags",
    join_col: "tag_id",
};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> StoreResult<Self> {
        Self::new(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub fn new(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_db()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Every `*_normalized` column is written from Rust with the same
    /// normalizers the finders use. SQLite's `lower()` only folds ASCII.
    fn init_db(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                contact_id              TEXT PRIMARY KEY,
                first_name              TEXT,
                last_name               TEXT,
                category                TEXT,
                description             TEXT,
                job_role                TEXT,
                linkedin                TEXT,
                birthday                TEXT,
                score                   INTEGER CHECK (score IS NULL OR score BETWEEN 1 AND 5),
                keep_in_touch_frequency TEXT NOT NULL DEFAULT 'Not Set',
                first_name_normalized   TEXT NOT NULL DEFAULT '',
                last_name_normalized    TEXT NOT NULL DEFAULT '',
                linkedin_normalized     TEXT,
                created_at              DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at              DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_contacts_linkedin ON contacts (linkedin_normalized);
            CREATE INDEX IF NOT EXISTS idx_contacts_last_name ON contacts (last_name_normalized);

            CREATE TABLE IF NOT EXISTS contact_emails (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                contact_id       TEXT NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
                email            TEXT NOT NULL,
                email_normalized TEXT NOT NULL,
                type             TEXT NOT NULL DEFAULT '',
                is_primary       INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_contact_emails_email ON contact_emails (email_normalized);

            CREATE TABLE IF NOT EXISTS contact_mobiles (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                contact_id        TEXT NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
                mobile            TEXT NOT NULL,
                mobile_normalized TEXT NOT NULL,
                type              TEXT NOT NULL DEFAULT '',
                is_primary        INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_contact_mobiles_mobile ON contact_mobiles (mobile_normalized);

            CREATE TABLE IF NOT EXISTS companies (
                company_id          TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                name_normalized     TEXT,
                category            TEXT,
                description         TEXT,
                linkedin            TEXT,
                linkedin_normalized TEXT,
                website             TEXT,
                website_normalized  TEXT,
                created_at          DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at          DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_companies_linkedin ON companies (linkedin_normalized);
            CREATE INDEX IF NOT EXISTS idx_companies_website ON companies (website_normalized);

            CREATE TABLE IF NOT EXISTS company_domains (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id TEXT NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
                domain     TEXT NOT NULL,
                UNIQUE (company_id, domain)
            );
            CREATE INDEX IF NOT EXISTS idx_company_domains_domain ON company_domains (domain);

            CREATE TABLE IF NOT EXISTS contact_companies (
                contact_id TEXT NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
                company_id TEXT NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
                PRIMARY KEY (contact_id, company_id)
            );

            CREATE TABLE IF NOT EXISTS cities (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS contact_cities (
                contact_id TEXT NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
                city_id    INTEGER NOT NULL REFERENCES cities(id) ON DELETE CASCADE,
                PRIMARY KEY (contact_id, city_id)
            );

            CREATE TABLE IF NOT EXISTS tags (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS contact_tags (
                contact_id TEXT NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
                tag_id     INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (contact_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS contact_duplicates (
                merge_id             TEXT PRIMARY KEY,
                primary_contact_id   TEXT NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
                duplicate_contact_id TEXT NOT NULL REFERENCES contacts(contact_id) ON DELETE CASCADE,
                status               TEXT NOT NULL DEFAULT 'pending',
                merge_selections     TEXT NOT NULL,
                start_trigger        INTEGER NOT NULL DEFAULT 0,
                notes                TEXT NOT NULL DEFAULT '',
                detected_at          DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_contact_duplicates_pending
                ON contact_duplicates (primary_contact_id, duplicate_contact_id)
                WHERE status = 'pending';

            CREATE TABLE IF NOT EXISTS company_duplicates (
                merge_id             TEXT PRIMARY KEY,
                primary_company_id   TEXT NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
                duplicate_company_id TEXT NOT NULL REFERENCES companies(company_id) ON DELETE CASCADE,
                status               TEXT NOT NULL DEFAULT 'pending',
                merge_selections     TEXT NOT NULL,
                start_trigger        INTEGER NOT NULL DEFAULT 0,
                notes                TEXT NOT NULL DEFAULT '',
                detected_at          DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_company_duplicates_pending
                ON company_duplicates (primary_company_id, duplicate_company_id)
                WHERE status = 'pending';
            "#,
        )?;
        Ok(())
    }

    pub fn ping(&self) -> bool {
        self.lock()
            .map(|c| c.execute_batch("SELECT 1").is_ok())
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    // ─── Contacts ───────────────────────────────────────────────────────────

    pub fn list_contacts(&self, q: Option<&str>) -> StoreResult<Vec<Contact>> {
        let conn = self.lock()?;

        let ids: Vec<Uuid> = match q.map(str::trim).filter(|s| !s.is_empty()) {
            Some(search) => {
                let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
                let mut stmt = conn.prepare(
                    r#"SELECT DISTINCT c.contact_id FROM contacts c
                       LEFT JOIN contact_emails ce ON ce.contact_id = c.contact_id
                       WHERE c.first_name_normalized LIKE ?1 ESCAPE '\'
                          OR c.last_name_normalized LIKE ?1 ESCAPE '\'
                          OR ce.email_normalized LIKE ?1 ESCAPE '\'
                       ORDER BY c.updated_at DESC, c.contact_id"#,
                )?;
                let ids = stmt
                    .query_map(params![pattern], |row| uuid_col(row, 0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT contact_id FROM contacts ORDER BY updated_at DESC, contact_id")?;
                let ids = stmt
                    .query_map([], |row| uuid_col(row, 0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            }
        };

        let mut contacts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(contact) = fetch_contact_by_id(&conn, id)? {
                contacts.push(contact);
            }
        }
        Ok(contacts)
    }

    pub fn create_contact(&self, input: &ContactInput) -> StoreResult<Uuid> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = Uuid::new_v4();
        let keys = ContactKeys::of(input);
        tx.execute(
            "INSERT INTO contacts (contact_id, first_name, last_name, category, description, job_role,
                                   linkedin, birthday, score, keep_in_touch_frequency,
                                   first_name_normalized, last_name_normalized, linkedin_normalized)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id.to_string(),
                input.first_name,
                input.last_name,
                input.category,
                input.description,
                input.job_role,
                trimmed(&input.linkedin),
                input.birthday,
                input.score,
                input.keep_in_touch_frequency.as_str(),
                keys.first_name,
                keys.last_name,
                keys.linkedin,
            ],
        )?;
        write_relations(&tx, id, input)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn update_contact(&self, id: Uuid, input: &ContactInput) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let keys = ContactKeys::of(input);
        let updated = tx.execute(
            "UPDATE contacts SET first_name=?1, last_name=?2, category=?3, description=?4, job_role=?5,
                    linkedin=?6, birthday=?7, score=?8, keep_in_touch_frequency=?9,
                    first_name_normalized=?10, last_name_normalized=?11, linkedin_normalized=?12,
                    updated_at=CURRENT_TIMESTAMP
             WHERE contact_id=?13",
            params![
                input.first_name,
                input.last_name,
                input.category,
                input.description,
                input.job_role,
                trimmed(&input.linkedin),
                input.birthday,
                input.score,
                input.keep_in_touch_frequency.as_str(),
                keys.first_name,
                keys.last_name,
                keys.linkedin,
                id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::ContactNotFound(id));
        }
        write_relations(&tx, id, input)?;
        tx.commit()?;
        Ok(())
    }

    /// Returns false when there was no such contact.
    pub fn delete_contact(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM contacts WHERE contact_id = ?1",
            params![id.to_string()],
        )?;
        info!(contact_id = %id, rows, "deleted contact");
        Ok(rows > 0)
    }

    pub fn get_merge(&self, merge_id: Uuid) -> StoreResult<Option<PendingMerge>> {
        let conn = self.lock()?;
        fetch_merge_by_id(&conn, merge_id)
    }

    pub fn dismiss_merge(&self, merge_id: Uuid) -> StoreResult<PendingMerge> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE contact_duplicates SET status = ?1, start_trigger = 0
             WHERE merge_id = ?2 AND status = 'pending'",
            params![MergeStatus::Dismissed.as_str(), merge_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::MergeNotFound(merge_id));
        }
        fetch_merge_by_id(&conn, merge_id)?.ok_or(StoreError::MergeNotFound(merge_id))
    }

    // ─── Companies ──────────────────────────────────────────────────────────

    /// Matches the search against normalized names and stored domains.
    pub fn list_companies(&self, q: Option<&str>) -> StoreResult<Vec<Company>> {
        let conn = self.lock()?;

        let ids: Vec<Uuid> = match q.map(str::trim).filter(|s| !s.is_empty()) {
            Some(search) => {
                let name_pattern =
                    normalize_company_name(search).map(|n| format!("%{}%", escape_like(&n)));
                let domain_pattern = format!("%{}%", escape_like(&search.to_lowercase()));
                let mut stmt = conn.prepare(
                    r#"SELECT DISTINCT c.company_id, c.name FROM companies c
                       LEFT JOIN company_domains d ON d.company_id = c.company_id
                       WHERE (?1 IS NOT NULL AND c.name_normalized LIKE ?1 ESCAPE '\')
                          OR d.domain LIKE ?2 ESCAPE '\'
                       ORDER BY c.name, c.company_id"#,
                )?;
                let ids = stmt
                    .query_map(params![name_pattern, domain_pattern], |row| uuid_col(row, 0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            }
            None => {
                let mut stmt = conn.prepare("SELECT company_id FROM companies ORDER BY name, company_id")?;
                let ids = stmt
                    .query_map([], |row| uuid_col(row, 0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            }
        };

        let mut companies = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(company) = fetch_company_by_id(&conn, id)? {
                companies.push(company);
            }
        }
        Ok(companies)
    }

    pub fn create_company(&self, input: &CompanyInput) -> StoreResult<Uuid> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = Uuid::new_v4();
        insert_company(&tx, id, input)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn update_company(&self, id: Uuid, input: &CompanyInput) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let name = input.name.trim();
        let updated = tx.execute(
            "UPDATE companies SET name=?1, name_normalized=?2, category=?3, description=?4,
                    linkedin=?5, linkedin_normalized=?6, website=?7, website_normalized=?8,
                    updated_at=CURRENT_TIMESTAMP
             WHERE company_id=?9",
            params![
                name,
                normalize_company_name(name),
                input.category,
                input.description,
                trimmed(&input.linkedin),
                input.linkedin.as_deref().and_then(normalize_linkedin),
                trimmed(&input.website),
                input.website.as_deref().and_then(normalize_website),
                id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::CompanyNotFound(id));
        }
        write_domains(&tx, id, &input.domains)?;
        tx.commit()?;
        Ok(())
    }

    /// Returns false when there was no such company.
    pub fn delete_company(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM companies WHERE company_id = ?1",
            params![id.to_string()],
        )?;
        info!(company_id = %id, rows, "deleted company");
        Ok(rows > 0)
    }

    pub fn get_company_merge(&self, merge_id: Uuid) -> StoreResult<Option<PendingCompanyMerge>> {
        let conn = self.lock()?;
        fetch_company_merge_by_id(&conn, merge_id)
    }

    pub fn dismiss_company_merge(&self, merge_id: Uuid) -> StoreResult<PendingCompanyMerge> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE company_duplicates SET status = ?1, start_trigger = 0
             WHERE merge_id = ?2 AND status = 'pending'",
            params![MergeStatus::Dismissed.as_str(), merge_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::MergeNotFound(merge_id));
        }
        fetch_company_merge_by_id(&conn, merge_id)?.ok_or(StoreError::MergeNotFound(merge_id))
    }

    // ─── Seed ───────────────────────────────────────────────────────────────

    /// Loads sample companies and contacts, each with a planted duplicate.
    /// Returns the number of contacts.
    pub fn seed_data(&self) -> StoreResult<usize> {
        struct SeedCompany {
            name: &'static str,
            category: &'static str,
            linkedin: &'static str,
            website: &'static str,
            domains: Vec<&'static str>,
        }

        struct SeedContact {
            first: &'static str,
            last: &'static str,
            category: &'static str,
            job_role: &'static str,
            linkedin: &'static str,
            score: Option<i64>,
            frequency: Frequency,
            emails: Vec<&'static str>,
            mobiles: Vec<&'static str>,
            companies: Vec<&'static str>,
            cities: Vec<&'static str>,
            tags: Vec<&'static str>,
        }

        let companies = vec![
            SeedCompany {
                name: "Northwind",
                category: "Startup",
                linkedin: "https://www.linkedin.com/company/northwind",
                website: "https://northwind.io",
                domains: vec!["northwind.io"],
            },
            SeedCompany {
                name: "Northwind Ltd.",
                category: "Not Set",
                linkedin: "",
                website: "",
                domains: vec!["www.Northwind.io"],
            },
            SeedCompany {
                name: "Hughes Ventures",
                category: "Investor",
                linkedin: "",
                website: "https://hughes.vc",
                domains: vec!["hughes.vc"],
            },
            SeedCompany {
                name: "Hughes Ventures LLC",
                category: "",
                linkedin: "",
                website: "https://hughes.vc/",
                domains: vec![],
            },
            SeedCompany {
                name: "Lumen Labs",
                category: "Startup",
                linkedin: "https://www.linkedin.com/company/lumen-labs",
                website: "",
                domains: vec!["lumen.dev"],
            },
            SeedCompany {
                name: "Lumen Lab",
                category: "",
                linkedin: "",
                website: "",
                domains: vec![],
            },
            SeedCompany {
                name: "Printhouse",
                category: "Supplier",
                linkedin: "",
                website: "https://printhouse.co.uk",
                domains: vec!["printhouse.co.uk"],
            },
        ];

        let seeds = vec![
            SeedContact {
                first: "Giulia",
                last: "Romano",
                category: "Founder",
                job_role: "CEO",
                linkedin: "https://www.linkedin.com/in/giuliaromano",
                score: Some(4),
                frequency: Frequency::Quarterly,
                emails: vec!["giulia@northwind.io"],
                mobiles: vec!["+39 347 555 0101"],
                companies: vec!["Northwind"],
                cities: vec!["Milan"],
                tags: vec!["founder", "fintech"],
            },
            SeedContact {
                first: "Giulia",
                last: "Romano",
                category: "Inbox",
                job_role: "",
                linkedin: "",
                score: None,
                frequency: Frequency::NotSet,
                emails: vec!["Giulia@Northwind.io", "g.romano@gmail.com"],
                mobiles: vec![],
                companies: vec![],
                cities: vec!["Milan"],
                tags: vec![],
            },
            SeedContact {
                first: "Tom",
                last: "Hughes",
                category: "Professional Investor",
                job_role: "Partner",
                linkedin: "https://www.linkedin.com/in/tomhughes",
                score: Some(5),
                frequency: Frequency::Monthly,
                emails: vec!["tom@hughes.vc"],
                mobiles: vec!["+44 7700 900123"],
                companies: vec!["Hughes Ventures"],
                cities: vec!["London"],
                tags: vec!["investor"],
            },
            SeedContact {
                first: "Thomas",
                last: "Hughes",
                category: "Inbox",
                job_role: "General Partner",
                linkedin: "",
                score: Some(3),
                frequency: Frequency::OncePerYear,
                emails: vec!["thomas.hughes@outlook.com"],
                mobiles: vec!["+447700900123"],
                companies: vec![],
                cities: vec![],
                tags: vec!["investor", "london"],
            },
            SeedContact {
                first: "Priya",
                last: "Nair",
                category: "Advisor",
                job_role: "Head of Product",
                linkedin: "https://www.linkedin.com/in/priyanair",
                score: Some(4),
                frequency: Frequency::TwicePerYear,
                emails: vec!["priya@lumen.dev"],
                mobiles: vec![],
                companies: vec!["Lumen Labs"],
                cities: vec!["Berlin"],
                tags: vec!["advisor"],
            },
            SeedContact {
                first: "Priya",
                last: "Nayar",
                category: "Inbox",
                job_role: "",
                linkedin: "https://www.linkedin.com/in/PriyaNair",
                score: None,
                frequency: Frequency::NotSet,
                emails: vec![],
                mobiles: vec![],
                companies: vec![],
                cities: vec![],
                tags: vec![],
            },
            SeedContact {
                first: "Daniel",
                last: "Okafor",
                category: "Supplier",
                job_role: "Account Manager",
                linkedin: "",
                score: Some(2),
                frequency: Frequency::DoNotKeepInTouch,
                emails: vec!["daniel@printhouse.co.uk"],
                mobiles: vec!["+44 20 7946 0958"],
                companies: vec!["Printhouse"],
                cities: vec!["Manchester"],
                tags: vec!["supplier"],
            },
        ];

        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());

        let company_count = companies.len();
        for seed in companies {
            self.create_company(&CompanyInput {
                name: seed.name.to_string(),
                category: opt(seed.category),
                description: None,
                linkedin: opt(seed.linkedin),
                website: opt(seed.website),
                domains: seed.domains.iter().map(|d| d.to_string()).collect(),
            })?;
        }

        let count = seeds.len();
        for seed in seeds {
            let input = ContactInput {
                first_name: opt(seed.first),
                last_name: opt(seed.last),
                category: opt(seed.category),
                description: None,
                job_role: opt(seed.job_role),
                linkedin: opt(seed.linkedin),
                birthday: None,
                score: seed.score,
                keep_in_touch_frequency: seed.frequency,
                emails: seed
                    .emails
                    .iter()
                    .enumerate()
                    .map(|(i, e)| ContactEmail {
                        email: e.to_string(),
                        kind: "work".to_string(),
                        is_primary: i == 0,
                    })
                    .collect(),
                mobiles: seed
                    .mobiles
                    .iter()
                    .enumerate()
                    .map(|(i, m)| ContactMobile {
                        mobile: m.to_string(),
                        kind: "mobile".to_string(),
                        is_primary: i == 0,
                    })
                    .collect(),
                companies: seed.companies.iter().map(|s| s.to_string()).collect(),
                cities: seed.cities.iter().map(|s| s.to_string()).collect(),
                tags: seed.tags.iter().map(|s| s.to_string()).collect(),
            };
            self.create_contact(&input)?;
        }
        info!(companies = company_count, contacts = count, "seeded sample data");
        Ok(count)
    }
}

impl ContactRepository for SqliteStore {
    fn get_contact(&self, contact_id: Uuid) -> StoreResult<Option<Contact>> {
        let conn = self.lock()?;
        fetch_contact_by_id(&conn, contact_id)
    }

    fn contacts_by_emails(
        &self,
        emails: &[String],
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(ContactSummary, String)>> {
        let conn = self.lock()?;
        let exclude = exclude.map(|id| id.to_string());
        let mut stmt = conn.prepare(
            r#"SELECT c.contact_id, c.first_name, c.last_name, c.linkedin, e.email
               FROM contact_emails e
               JOIN contacts c ON c.contact_id = e.contact_id
               WHERE e.email_normalized = ?1
                 AND (?2 IS NULL OR c.contact_id != ?2)
               ORDER BY e.id"#,
        )?;
        let mut out = Vec::new();
        for email in emails {
            let rows = stmt
                .query_map(params![email, exclude], |row| {
                    Ok((summary_from_row(row)?, row.get::<_, String>(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    fn contacts_by_mobiles(
        &self,
        mobiles: &[String],
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(ContactSummary, String)>> {
        let conn = self.lock()?;
        let exclude = exclude.map(|id| id.to_string());
        let mut stmt = conn.prepare(
            r#"SELECT c.contact_id, c.first_name, c.last_name, c.linkedin, m.mobile
               FROM contact_mobiles m
               JOIN contacts c ON c.contact_id = m.contact_id
               WHERE m.mobile_normalized = ?1
                 AND (?2 IS NULL OR c.contact_id != ?2)
               ORDER BY m.id"#,
        )?;
        let mut out = Vec::new();
        for mobile in mobiles {
            let rows = stmt
                .query_map(params![mobile, exclude], |row| {
                    Ok((summary_from_row(row)?, row.get::<_, String>(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    fn contacts_by_linkedin(
        &self,
        linkedin: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<ContactSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT contact_id, first_name, last_name, linkedin FROM contacts
               WHERE linkedin_normalized = ?1
                 AND (?2 IS NULL OR contact_id != ?2)
               ORDER BY contact_id"#,
        )?;
        let rows = stmt
            .query_map(params![linkedin, exclude.map(|id| id.to_string())], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn name_pool(
        &self,
        first_prefix: &str,
        last_name: &str,
        exclude: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<ContactSummary>> {
        let conn = self.lock()?;
        let prefix_pattern = format!("{}%", escape_like(first_prefix));
        let mut stmt = conn.prepare(
            r#"SELECT contact_id, first_name, last_name, linkedin FROM contacts
               WHERE (?4 IS NULL OR contact_id != ?4)
                 AND ((?1 != '' AND first_name_normalized LIKE ?2 ESCAPE '\')
                      OR (?3 != '' AND last_name_normalized = ?3))
               ORDER BY last_name_normalized, first_name_normalized, contact_id
               LIMIT ?5"#,
        )?;
        let rows = stmt
            .query_map(
                params![
                    first_prefix,
                    prefix_pattern,
                    last_name,
                    exclude.map(|id| id.to_string()),
                    limit as i64,
                ],
                summary_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn queue_merge(&self, merge: NewPendingMerge) -> StoreResult<PendingMerge> {
        let conn = self.lock()?;
        let primary = merge.primary_contact_id.to_string();
        let duplicate = merge.duplicate_contact_id.to_string();

        let already: Option<String> = conn
            .query_row(
                "SELECT merge_id FROM contact_duplicates
                 WHERE primary_contact_id = ?1 AND duplicate_contact_id = ?2 AND status = 'pending'",
                params![primary, duplicate],
                |r| r.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Err(StoreError::AlreadyQueued {
                primary: merge.primary_contact_id,
                duplicate: merge.duplicate_contact_id,
            });
        }

        let merge_id = Uuid::new_v4();
        let selections = serde_json::to_string(&merge.merge_selections)?;
        conn.execute(
            "INSERT INTO contact_duplicates
                 (merge_id, primary_contact_id, duplicate_contact_id, status, merge_selections,
                  start_trigger, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                merge_id.to_string(),
                primary,
                duplicate,
                MergeStatus::Pending.as_str(),
                selections,
                merge.notes,
            ],
        )?;
        info!(%merge_id, primary = %primary, duplicate = %duplicate, "queued contact merge");

        fetch_merge_by_id(&conn, merge_id)?.ok_or(StoreError::MergeNotFound(merge_id))
    }

    fn pending_merges_for(&self, contact_id: Uuid) -> StoreResult<Vec<PendingMerge>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {MERGE_COLUMNS} FROM contact_duplicates
             WHERE status = 'pending' AND (primary_contact_id = ?1 OR duplicate_contact_id = ?1)
             ORDER BY detected_at, merge_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![contact_id.to_string()], raw_merge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawMerge::into_contact_merge).collect()
    }
}

impl CompanyRepository for SqliteStore {
    fn get_company(&self, company_id: Uuid) -> StoreResult<Option<Company>> {
        let conn = self.lock()?;
        fetch_company_by_id(&conn, company_id)
    }

    fn companies_by_linkedin(
        &self,
        linkedin: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(CompanySummary, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT company_id, name, category, linkedin FROM companies
               WHERE linkedin_normalized = ?1
                 AND (?2 IS NULL OR company_id != ?2)
               ORDER BY company_id"#,
        )?;
        let rows = stmt
            .query_map(params![linkedin, exclude.map(|id| id.to_string())], |row| {
                Ok((company_summary_from_row(row)?, row.get::<_, String>(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn companies_by_website(
        &self,
        website: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(CompanySummary, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT company_id, name, category, website FROM companies
               WHERE website_normalized = ?1
                 AND (?2 IS NULL OR company_id != ?2)
               ORDER BY company_id"#,
        )?;
        let rows = stmt
            .query_map(params![website, exclude.map(|id| id.to_string())], |row| {
                Ok((company_summary_from_row(row)?, row.get::<_, String>(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn companies_by_domains(
        &self,
        domains: &[String],
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<(CompanySummary, String)>> {
        let conn = self.lock()?;
        let exclude = exclude.map(|id| id.to_string());
        let mut stmt = conn.prepare(
            r#"SELECT c.company_id, c.name, c.category, d.domain
               FROM company_domains d
               JOIN companies c ON c.company_id = d.company_id
               WHERE d.domain = ?1
                 AND (?2 IS NULL OR c.company_id != ?2)
               ORDER BY d.id"#,
        )?;
        let mut out = Vec::new();
        for domain in domains {
            let rows = stmt
                .query_map(params![domain, exclude], |row| {
                    Ok((company_summary_from_row(row)?, row.get::<_, String>(3)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    fn company_name_pool(
        &self,
        normalized_name: &str,
        exclude: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<CompanySummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"SELECT company_id, name, category FROM companies
               WHERE name_normalized IS NOT NULL
                 AND (?2 IS NULL OR company_id != ?2)
                 AND (instr(name_normalized, ?1) > 0
                      OR instr(?1, name_normalized) > 0
                      OR substr(name_normalized, 1, 4) = substr(?1, 1, 4))
               ORDER BY name, company_id
               LIMIT ?3"#,
        )?;
        let rows = stmt
            .query_map(
                params![normalized_name, exclude.map(|id| id.to_string()), limit as i64],
                company_summary_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn queue_company_merge(&self, merge: NewPendingCompanyMerge) -> StoreResult<PendingCompanyMerge> {
        let conn = self.lock()?;
        let primary = merge.primary_company_id.to_string();
        let duplicate = merge.duplicate_company_id.to_string();

        let already: Option<String> = conn
            .query_row(
                "SELECT merge_id FROM company_duplicates
                 WHERE primary_company_id = ?1 AND duplicate_company_id = ?2 AND status = 'pending'",
                params![primary, duplicate],
                |r| r.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Err(StoreError::AlreadyQueued {
                primary: merge.primary_company_id,
                duplicate: merge.duplicate_company_id,
            });
        }

        let merge_id = Uuid::new_v4();
        let selections = serde_json::to_string(&merge.merge_selections)?;
        conn.execute(
            "INSERT INTO company_duplicates
                 (merge_id, primary_company_id, duplicate_company_id, status, merge_selections,
                  start_trigger, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                merge_id.to_string(),
                primary,
                duplicate,
                MergeStatus::Pending.as_str(),
                selections,
                merge.notes,
            ],
        )?;
        info!(%merge_id, primary = %primary, duplicate = %duplicate, "queued company merge");

        fetch_company_merge_by_id(&conn, merge_id)?.ok_or(StoreError::MergeNotFound(merge_id))
    }

    fn pending_company_merges_for(&self, company_id: Uuid) -> StoreResult<Vec<PendingCompanyMerge>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COMPANY_MERGE_COLUMNS} FROM company_duplicates
             WHERE status = 'pending' AND (primary_company_id = ?1 OR duplicate_company_id = ?1)
             ORDER BY detected_at, merge_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![company_id.to_string()], raw_merge_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawMerge::into_company_merge).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Row helpers
// ────────────────────────────────────────────────────────────────────────────

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ContactSummary> {
    Ok(ContactSummary {
        contact_id: uuid_col(row, 0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        linkedin: row.get(3)?,
    })
}

fn company_summary_from_row(row: &Row<'_>) -> rusqlite::Result<CompanySummary> {
    Ok(CompanySummary {
        company_id: uuid_col(row, 0)?,
        name: row.get(1)?,
        category: row.get(2)?,
    })
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Trimmed value, or None when blank.
fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Comparison keys stored next to a contact's display values.
struct ContactKeys {
    first_name: String,
    last_name: String,
    linkedin: Option<String>,
}

impl ContactKeys {
    fn of(input: &ContactInput) -> Self {
        Self {
            first_name: normalize_name(input.first_name.as_deref().unwrap_or("")),
            last_name: normalize_name(input.last_name.as_deref().unwrap_or("")),
            linkedin: input.linkedin.as_deref().and_then(normalize_linkedin),
        }
    }
}

/// A queue row before its ids are assigned to contacts or companies.
struct RawMerge {
    merge_id: Uuid,
    primary_id: Uuid,
    duplicate_id: Uuid,
    status: String,
    merge_selections: String,
    start_trigger: bool,
    notes: String,
    detected_at: String,
}

impl RawMerge {
    fn status(&self) -> StoreResult<MergeStatus> {
        self.status.parse().map_err(|reason| StoreError::Corrupt {
            field: "status",
            reason,
        })
    }

    fn into_contact_merge(self) -> StoreResult<PendingMerge> {
        let status = self.status()?;
        let merge_selections: MergeSelections = serde_json::from_str(&self.merge_selections)?;
        Ok(PendingMerge {
            merge_id: self.merge_id,
            primary_contact_id: self.primary_id,
            duplicate_contact_id: self.duplicate_id,
            status,
            merge_selections,
            start_trigger: self.start_trigger,
            notes: self.notes,
            detected_at: self.detected_at,
        })
    }

    fn into_company_merge(self) -> StoreResult<PendingCompanyMerge> {
        let status = self.status()?;
        let merge_selections: CompanyMergeSelections = serde_json::from_str(&self.merge_selections)?;
        Ok(PendingCompanyMerge {
            merge_id: self.merge_id,
            primary_company_id: self.primary_id,
            duplicate_company_id: self.duplicate_id,
            status,
            merge_selections,
            start_trigger: self.start_trigger,
            notes: self.notes,
            detected_at: self.detected_at,
        })
    }
}

fn raw_merge_from_row(row: &Row<'_>) -> rusqlite::Result<RawMerge> {
    Ok(RawMerge {
        merge_id: uuid_col(row, 0)?,
        primary_id: uuid_col(row, 1)?,
        duplicate_id: uuid_col(row, 2)?,
        status: row.get(3)?,
        merge_selections: row.get(4)?,
        start_trigger: row.get(5)?,
        notes: row.get(6)?,
        detected_at: row.get(7)?,
    })
}

fn fetch_merge_by_id(conn: &Connection, merge_id: Uuid) -> StoreResult<Option<PendingMerge>> {
    let sql = format!("SELECT {MERGE_COLUMNS} FROM contact_duplicates WHERE merge_id = ?1");
    let raw = conn
        .query_row(&sql, params![merge_id.to_string()], raw_merge_from_row)
        .optional()?;
    raw.map(RawMerge::into_contact_merge).transpose()
}

fn fetch_company_merge_by_id(
    conn: &Connection,
    merge_id: Uuid,
) -> StoreResult<Option<PendingCompanyMerge>> {
    let sql = format!("SELECT {COMPANY_MERGE_COLUMNS} FROM company_duplicates WHERE merge_id = ?1");
    let raw = conn
        .query_row(&sql, params![merge_id.to_string()], raw_merge_from_row)
        .optional()?;
    raw.map(RawMerge::into_company_merge).transpose()
}

fn fetch_contact_by_id(conn: &Connection, id: Uuid) -> StoreResult<Option<Contact>> {
    let key = id.to_string();
    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE contact_id = ?1");
    let contact_opt = conn
        .query_row(&sql, params![key], |row| {
            let frequency: Option<String> = row.get(9)?;
            Ok(Contact {
                contact_id: uuid_col(row, 0)?,
                first_name: row.get(1)?,
                last_name: row.get(2)?,
                category: row.get(3)?,
                description: row.get(4)?,
                job_role: row.get(5)?,
                linkedin: row.get(6)?,
                birthday: row.get(7)?,
                score: row.get(8)?,
                keep_in_touch_frequency: Frequency::parse_lenient(frequency.as_deref()),
                emails: vec![],
                mobiles: vec![],
                companies: vec![],
                cities: vec![],
                tags: vec![],
                created_at: row.get(10)?,
                updated_at: row.get(11)?,
            })
        })
        .optional()?;

    let Some(mut contact) = contact_opt else {
        return Ok(None);
    };

    // emails
    let mut stmt = conn.prepare(
        "SELECT email, type, is_primary FROM contact_emails
         WHERE contact_id = ?1 ORDER BY is_primary DESC, id",
    )?;
    contact.emails = stmt
        .query_map(params![key], |row| {
            Ok(ContactEmail {
                email: row.get(0)?,
                kind: row.get(1)?,
                is_primary: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // mobiles
    let mut stmt = conn.prepare(
        "SELECT mobile, type, is_primary FROM contact_mobiles
         WHERE contact_id = ?1 ORDER BY is_primary DESC, id",
    )?;
    contact.mobiles = stmt
        .query_map(params![key], |row| {
            Ok(ContactMobile {
                mobile: row.get(0)?,
                kind: row.get(1)?,
                is_primary: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    contact.companies = linked_names(conn, &COMPANIES, &key)?;
    contact.cities = linked_names(conn, &CITIES, &key)?;
    contact.tags = linked_names(conn, &TAGS, &key)?;

    Ok(Some(contact))
}

fn fetch_company_by_id(conn: &Connection, id: Uuid) -> StoreResult<Option<Company>> {
    let key = id.to_string();
    let sql = format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE company_id = ?1");
    let company_opt = conn
        .query_row(&sql, params![key], |row| {
            Ok(Company {
                company_id: uuid_col(row, 0)?,
                name: row.get(1)?,
                category: row.get(2)?,
                description: row.get(3)?,
                linkedin: row.get(4)?,
                website: row.get(5)?,
                domains: vec![],
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })
        .optional()?;

    let Some(mut company) = company_opt else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT domain FROM company_domains WHERE company_id = ?1 ORDER BY id")?;
    company.domains = stmt
        .query_map(params![key], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(Some(company))
}

fn linked_names(conn: &Connection, link: &Linked, contact_id: &str) -> StoreResult<Vec<String>> {
    let Linked {
        table,
        key,
        join_table,
        join_col,
    } = link;
    let sql = format!(
        "SELECT t.name FROM {table} t
         JOIN {join_table} j ON j.{join_col} = t.{key}
         WHERE j.contact_id = ?1
         ORDER BY t.name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map(params![contact_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Cities and tags: one row per distinct name.
fn upsert_names_and_link(
    conn: &Connection,
    link: &Linked,
    contact_id: &str,
    names: &[String],
) -> StoreResult<()> {
    let Linked {
        table,
        key,
        join_table,
        join_col,
    } = link;
    conn.execute(
        &format!("DELETE FROM {join_table} WHERE contact_id = ?1"),
        params![contact_id],
    )?;
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        conn.execute(
            &format!("INSERT OR IGNORE INTO {table} (name) VALUES (?1)"),
            params![name],
        )?;
        let id: i64 = conn.query_row(
            &format!("SELECT {key} FROM {table} WHERE name = ?1"),
            params![name],
            |r| r.get(0),
        )?;
        conn.execute(
            &format!("INSERT OR IGNORE INTO {join_table} (contact_id, {join_col}) VALUES (?1, ?2)"),
            params![contact_id, id],
        )?;
    }
    Ok(())
}

/// Companies are full records and names are not unique, so a contact links
/// to the oldest company with that exact name, or to a new bare one.
fn link_companies(conn: &Connection, contact_id: &str, names: &[String]) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM contact_companies WHERE contact_id = ?1",
        params![contact_id],
    )?;
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let existing: Option<String> = conn
            .query_row(
                "SELECT company_id FROM companies WHERE name = ?1
                 ORDER BY created_at, company_id LIMIT 1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        let company_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                insert_company(
                    conn,
                    id,
                    &CompanyInput {
                        name: name.to_string(),
                        ..Default::default()
                    },
                )?;
                id.to_string()
            }
        };
        conn.execute(
            "INSERT OR IGNORE INTO contact_companies (contact_id, company_id) VALUES (?1, ?2)",
            params![contact_id, company_id],
        )?;
    }
    Ok(())
}

fn insert_company(conn: &Connection, id: Uuid, input: &CompanyInput) -> StoreResult<()> {
    let name = input.name.trim();
    conn.execute(
        "INSERT INTO companies (company_id, name, name_normalized, category, description,
                                linkedin, linkedin_normalized, website, website_normalized)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id.to_string(),
            name,
            normalize_company_name(name),
            input.category,
            input.description,
            trimmed(&input.linkedin),
            input.linkedin.as_deref().and_then(normalize_linkedin),
            trimmed(&input.website),
            input.website.as_deref().and_then(normalize_website),
        ],
    )?;
    write_domains(conn, id, &input.domains)
}

fn write_domains(conn: &Connection, id: Uuid, domains: &[String]) -> StoreResult<()> {
    let key = id.to_string();
    conn.execute("DELETE FROM company_domains WHERE company_id = ?1", params![key])?;
    for domain in domains.iter().filter_map(|d| normalize_domain(d)) {
        conn.execute(
            "INSERT OR IGNORE INTO company_domains (company_id, domain) VALUES (?1, ?2)",
            params![key, domain],
        )?;
    }
    Ok(())
}

fn write_relations(conn: &Connection, id: Uuid, input: &ContactInput) -> StoreResult<()> {
    let key = id.to_string();

    conn.execute("DELETE FROM contact_emails WHERE contact_id = ?1", params![key])?;
    for e in &input.emails {
        let Some(normalized) = normalize_email(&e.email) else {
            continue;
        };
        conn.execute(
            "INSERT INTO contact_emails (contact_id, email, email_normalized, type, is_primary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, e.email.trim(), normalized, e.kind, e.is_primary],
        )?;
    }

    conn.execute("DELETE FROM contact_mobiles WHERE contact_id = ?1", params![key])?;
    for m in &input.mobiles {
        let Some(normalized) = normalize_mobile(&m.mobile) else {
            continue;
        };
        conn.execute(
            "INSERT INTO contact_mobiles (contact_id, mobile, mobile_normalized, type, is_primary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, m.mobile.trim(), normalized, m.kind, m.is_primary],
        )?;
    }

    link_companies(conn, &key, &input.companies)?;
    upsert_names_and_link(conn, &CITIES, &key, &input.cities)?;
    upsert_names_and_link(conn, &TAGS, &key, &input.tags)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companies::{find_company_duplicates, CompanyMatchType, CompanyQuery};
    use crate::duplicates::{find_contact_duplicates, DuplicateQuery, FinderConfig, MatchType};
    use crate::merge::{arbitrate, arbitrate_companies, Resolution};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn input(first: &str, last: &str) -> ContactInput {
        ContactInput {
            first_name: Some(first.into()),
            last_name: Some(last.into()),
            ..Default::default()
        }
    }

    fn company_input(name: &str) -> CompanyInput {
        CompanyInput {
            name: name.into(),
            ..Default::default()
        }
    }

    fn email(addr: &str) -> ContactEmail {
        ContactEmail {
            email: addr.into(),
            kind: "work".into(),
            is_primary: true,
        }
    }

    fn mobile(number: &str) -> ContactMobile {
        ContactMobile {
            mobile: number.into(),
            kind: "mobile".into(),
            is_primary: true,
        }
    }

    #[test]
    fn create_and_get_contact_with_relations() {
        let store = store();
        let mut new = input("Giulia", "Romano");
        new.score = Some(4);
        new.keep_in_touch_frequency = Frequency::Quarterly;
        new.emails = vec![email("giulia@northwind.io"), email("  ")];
        new.mobiles = vec![mobile("+39 347 555 0101")];
        new.tags = vec!["fintech".into(), "founder".into(), "".into()];
        new.cities = vec!["Milan".into()];
        new.companies = vec!["Northwind".into()];

        let id = store.create_contact(&new).unwrap();
        let got = store.get_contact(id).unwrap().unwrap();
        assert_eq!(got.contact_id, id);
        assert_eq!(got.first_name.as_deref(), Some("Giulia"));
        assert_eq!(got.score, Some(4));
        assert_eq!(got.keep_in_touch_frequency, Frequency::Quarterly);
        assert_eq!(got.emails.len(), 1);
        assert_eq!(got.mobiles[0].mobile, "+39 347 555 0101");
        assert_eq!(got.tags, ["fintech", "founder"]);
        assert_eq!(got.cities, ["Milan"]);
        assert_eq!(got.companies, ["Northwind"]);
    }

    #[test]
    fn update_replaces_relations_and_missing_contact_errors() {
        let store = store();
        let mut new = input("Tom", "Hughes");
        new.tags = vec!["investor".into()];
        let id = store.create_contact(&new).unwrap();

        new.tags = vec!["london".into()];
        new.job_role = Some("Partner".into());
        store.update_contact(id, &new).unwrap();
        let got = store.get_contact(id).unwrap().unwrap();
        assert_eq!(got.tags, ["london"]);
        assert_eq!(got.job_role.as_deref(), Some("Partner"));

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.update_contact(missing, &new),
            Err(StoreError::ContactNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn delete_contact_reports_existence() {
        let store = store();
        let id = store.create_contact(&input("Daniel", "Okafor")).unwrap();
        assert!(store.delete_contact(id).unwrap());
        assert!(!store.delete_contact(id).unwrap());
        assert!(store.get_contact(id).unwrap().is_none());
    }

    #[test]
    fn list_contacts_searches_names_and_emails() {
        let store = store();
        let mut a = input("Priya", "Nair");
        a.emails = vec![email("priya@lumen.dev")];
        store.create_contact(&a).unwrap();
        store.create_contact(&input("Daniel", "Okafor")).unwrap();
        store.create_contact(&input("Élodie", "Ångström")).unwrap();

        assert_eq!(store.list_contacts(None).unwrap().len(), 3);
        assert_eq!(store.list_contacts(Some("  ")).unwrap().len(), 3);
        let hits = store.list_contacts(Some("LUMEN")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].last_name.as_deref(), Some("Nair"));
        assert_eq!(store.list_contacts(Some("oka")).unwrap().len(), 1);
        assert_eq!(store.list_contacts(Some("ÅNGSTR")).unwrap().len(), 1);
        assert!(store.list_contacts(Some("%")).unwrap().is_empty());
    }

    #[test]
    fn lookups_normalize_and_exclude() {
        let store = store();
        let mut a = input("Tom", "Hughes");
        a.emails = vec![email("Tom@Hughes.vc")];
        a.mobiles = vec![mobile("+44 7700 900123")];
        a.linkedin = Some("https://www.linkedin.com/in/TomHughes".into());
        let a_id = store.create_contact(&a).unwrap();
        let b_id = store.create_contact(&input("Thomas", "Hughes")).unwrap();

        let by_email = store
            .contacts_by_emails(&["tom@hughes.vc".into()], None)
            .unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].0.contact_id, a_id);
        assert_eq!(by_email[0].1, "Tom@Hughes.vc");
        assert!(store
            .contacts_by_emails(&["tom@hughes.vc".into()], Some(a_id))
            .unwrap()
            .is_empty());

        let by_mobile = store
            .contacts_by_mobiles(&["+447700900123".into()], Some(b_id))
            .unwrap();
        assert_eq!(by_mobile.len(), 1);
        assert_eq!(by_mobile[0].1, "+44 7700 900123");

        let by_linkedin = store
            .contacts_by_linkedin("https://www.linkedin.com/in/tomhughes", None)
            .unwrap();
        assert_eq!(by_linkedin.len(), 1);

        let pool = store.name_pool("th", "", Some(a_id), 10).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].contact_id, b_id);
        let pool = store.name_pool("zz", "hughes", None, 10).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(store.name_pool("zz", "hughes", None, 1).unwrap().len(), 1);
        assert!(store.name_pool("", "", None, 10).unwrap().is_empty());
    }

    #[test]
    fn non_ascii_case_and_stray_whitespace_still_match() {
        let store = store();
        let mut a = input("Émile", "Ørsted");
        a.emails = vec![email("Élodie@Café.fr")];
        a.linkedin = Some("\thttps://www.linkedin.com/in/Elodie\n".into());
        let a_id = store.create_contact(&a).unwrap();

        let by_email = store
            .contacts_by_emails(&["élodie@café.fr".into()], None)
            .unwrap();
        assert_eq!(by_email.len(), 1);
        assert_eq!(by_email[0].1, "Élodie@Café.fr");

        let by_linkedin = store
            .contacts_by_linkedin("https://www.linkedin.com/in/elodie", None)
            .unwrap();
        assert_eq!(by_linkedin.len(), 1);
        let stored = store.get_contact(a_id).unwrap().unwrap();
        assert_eq!(stored.linkedin.as_deref(), Some("https://www.linkedin.com/in/Elodie"));

        assert_eq!(store.name_pool("ém", "", None, 10).unwrap().len(), 1);
        assert_eq!(store.name_pool("", "ørsted", None, 10).unwrap().len(), 1);

        let mut b = input("EMILE", "ØRSTED");
        b.emails = vec![email(" ÉLODIE@CAFÉ.FR ")];
        let b_id = store.create_contact(&b).unwrap();
        let scan = find_contact_duplicates(&store, &DuplicateQuery::from(&stored), &FinderConfig::default());
        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].duplicate_contact_id, b_id);
        assert_eq!(scan.candidates[0].match_type, MatchType::Email);

        // keys follow updates
        b.emails = vec![email("emile@orsted.dk")];
        store.update_contact(b_id, &b).unwrap();
        assert!(store
            .contacts_by_emails(&["élodie@café.fr".into()], Some(a_id))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn name_pool_escapes_like_wildcards() {
        let store = store();
        store.create_contact(&input("Anna", "Bianchi")).unwrap();
        assert!(store.name_pool("%", "", None, 10).unwrap().is_empty());
        assert!(store.name_pool("_n", "", None, 10).unwrap().is_empty());
        assert_eq!(store.name_pool("an", "", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn queue_merge_persists_document_and_rejects_repeats() {
        let store = store();
        let a = store.create_contact(&input("Giulia", "Romano")).unwrap();
        let b = store.create_contact(&input("Giulia", "Romano Rossi")).unwrap();
        let current = store.get_contact(a).unwrap().unwrap();
        let duplicate = store.get_contact(b).unwrap().unwrap();
        let selections = arbitrate(&current, &duplicate);

        let queued = store
            .queue_merge(NewPendingMerge {
                primary_contact_id: a,
                duplicate_contact_id: b,
                merge_selections: selections,
                notes: "from test".into(),
            })
            .unwrap();
        assert_eq!(queued.status, MergeStatus::Pending);
        assert!(queued.start_trigger);
        assert_eq!(queued.merge_selections.last_name, Resolution::Duplicate);
        assert!(!queued.detected_at.is_empty());

        let again = store.queue_merge(NewPendingMerge {
            primary_contact_id: a,
            duplicate_contact_id: b,
            merge_selections: selections,
            notes: String::new(),
        });
        assert!(matches!(again, Err(StoreError::AlreadyQueued { .. })));

        assert_eq!(store.pending_merges_for(b).unwrap(), vec![queued.clone()]);

        let dismissed = store.dismiss_merge(queued.merge_id).unwrap();
        assert_eq!(dismissed.status, MergeStatus::Dismissed);
        assert!(store.pending_merges_for(a).unwrap().is_empty());
        assert_eq!(store.get_merge(queued.merge_id).unwrap(), Some(dismissed));
        assert_eq!(store.get_merge(Uuid::new_v4()).unwrap(), None);
        assert!(matches!(
            store.dismiss_merge(queued.merge_id),
            Err(StoreError::MergeNotFound(_))
        ));
    }

    #[test]
    fn corrupt_selection_document_is_an_error() {
        let store = store();
        let a = store.create_contact(&input("A", "One")).unwrap();
        let b = store.create_contact(&input("B", "Two")).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO contact_duplicates (merge_id, primary_contact_id, duplicate_contact_id, merge_selections)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    a.to_string(),
                    b.to_string(),
                    r#"{"first_name":"current"}"#
                ],
            )
            .unwrap();
        }
        assert!(matches!(
            store.pending_merges_for(a),
            Err(StoreError::Corrupt { field: "merge_selections", .. })
        ));
    }

    #[test]
    fn company_crud_normalizes_identifiers() {
        let store = store();
        let mut new = company_input("  Northwind Ltd. ");
        new.category = Some("Startup".into());
        new.linkedin = Some(" https://www.linkedin.com/company/Northwind\n".into());
        new.website = Some("https://Northwind.io/".into());
        new.domains = vec!["https://www.Northwind.io".into(), "northwind.io".into(), " ".into()];
        let id = store.create_company(&new).unwrap();

        let got = store.get_company(id).unwrap().unwrap();
        assert_eq!(got.name, "Northwind Ltd.");
        assert_eq!(got.linkedin.as_deref(), Some("https://www.linkedin.com/company/Northwind"));
        assert_eq!(got.domains, ["northwind.io"]);

        assert_eq!(store.list_companies(Some("NORTHWIND")).unwrap().len(), 1);
        assert_eq!(store.list_companies(Some("northwind.io")).unwrap().len(), 1);
        assert!(store.list_companies(Some("globex")).unwrap().is_empty());

        new.name = "Northwind Traders".into();
        new.domains = vec!["northwind.com".into()];
        store.update_company(id, &new).unwrap();
        let got = store.get_company(id).unwrap().unwrap();
        assert_eq!(got.name, "Northwind Traders");
        assert_eq!(got.domains, ["northwind.com"]);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.update_company(missing, &new),
            Err(StoreError::CompanyNotFound(id)) if id == missing
        ));
        assert!(store.delete_company(id).unwrap());
        assert!(!store.delete_company(id).unwrap());
        assert!(store.get_company(id).unwrap().is_none());
    }

    #[test]
    fn company_lookups_normalize_and_exclude() {
        let store = store();
        let mut a = company_input("Hughes Ventures");
        a.website = Some("https://hughes.vc".into());
        a.linkedin = Some("https://www.linkedin.com/company/hughes".into());
        a.domains = vec!["hughes.vc".into()];
        let a_id = store.create_company(&a).unwrap();
        let mut b = company_input("Hughes Ventures LLC");
        b.website = Some("HTTPS://hughes.vc/".into());
        b.linkedin = Some("https://www.linkedin.com/company/Hughes ".into());
        b.domains = vec!["www.hughes.vc".into()];
        let b_id = store.create_company(&b).unwrap();
        store.create_company(&company_input("Hughes")).unwrap();
        store.create_company(&company_input("Ångström Systems")).unwrap();

        let by_website = store.companies_by_website("https://hughes.vc", Some(a_id)).unwrap();
        assert_eq!(by_website.len(), 1);
        assert_eq!(by_website[0].0.company_id, b_id);
        assert_eq!(by_website[0].1, "HTTPS://hughes.vc/");

        let by_linkedin = store
            .companies_by_linkedin("https://www.linkedin.com/company/hughes", None)
            .unwrap();
        assert_eq!(by_linkedin.len(), 2);

        let by_domain = store.companies_by_domains(&["hughes.vc".into()], Some(b_id)).unwrap();
        assert_eq!(by_domain.len(), 1);
        assert_eq!(by_domain[0].0.company_id, a_id);

        let pool = store.company_name_pool("hughesventures", Some(a_id), 10).unwrap();
        let names: Vec<_> = pool.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Hughes", "Hughes Ventures LLC"]);
        assert_eq!(store.company_name_pool("hughesventures", None, 1).unwrap().len(), 1);
        assert_eq!(store.company_name_pool("ångströmsystem", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn contacts_share_company_rows() {
        let store = store();
        let mut a = input("Giulia", "Romano");
        a.companies = vec!["Northwind".into()];
        let mut b = input("Marco", "Verdi");
        b.companies = vec!["Northwind".into(), "Globex".into()];
        store.create_contact(&a).unwrap();
        let b_id = store.create_contact(&b).unwrap();

        assert_eq!(store.list_companies(None).unwrap().len(), 2);
        assert_eq!(store.get_contact(b_id).unwrap().unwrap().companies, ["Globex", "Northwind"]);
    }

    #[test]
    fn company_queue_round_trip() {
        let store = store();
        let a = store.create_company(&company_input("Lumen Labs")).unwrap();
        let b = store.create_company(&company_input("Lumen Lab")).unwrap();
        let current = store.get_company(a).unwrap().unwrap();
        let duplicate = store.get_company(b).unwrap().unwrap();
        let selections = arbitrate_companies(&current, &duplicate);

        let queued = store
            .queue_company_merge(NewPendingCompanyMerge {
                primary_company_id: a,
                duplicate_company_id: b,
                merge_selections: selections,
                notes: String::new(),
            })
            .unwrap();
        assert_eq!(queued.status, MergeStatus::Pending);
        assert_eq!(queued.merge_selections, selections);

        let again = store.queue_company_merge(NewPendingCompanyMerge {
            primary_company_id: a,
            duplicate_company_id: b,
            merge_selections: selections,
            notes: String::new(),
        });
        assert!(matches!(again, Err(StoreError::AlreadyQueued { .. })));
        assert_eq!(store.pending_company_merges_for(b).unwrap(), vec![queued.clone()]);

        let dismissed = store.dismiss_company_merge(queued.merge_id).unwrap();
        assert_eq!(dismissed.status, MergeStatus::Dismissed);
        assert!(store.pending_company_merges_for(a).unwrap().is_empty());
        assert_eq!(store.get_company_merge(queued.merge_id).unwrap(), Some(dismissed));
        assert!(matches!(
            store.dismiss_company_merge(queued.merge_id),
            Err(StoreError::MergeNotFound(_))
        ));
    }

    #[test]
    fn seeded_duplicates_are_found() {
        let store = store();
        assert!(store.is_empty().unwrap());
        assert_eq!(store.seed_data().unwrap(), 7);
        assert!(!store.is_empty().unwrap());
        assert_eq!(store.list_companies(None).unwrap().len(), 7);

        let giulia = store
            .list_contacts(Some("northwind"))
            .unwrap()
            .into_iter()
            .find(|c| c.category.as_deref() == Some("Founder"))
            .unwrap();
        assert_eq!(giulia.companies, ["Northwind"]);
        let scan = find_contact_duplicates(
            &store,
            &DuplicateQuery::from(&giulia),
            &FinderConfig::default(),
        );
        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].match_type, MatchType::Email);
        assert_ne!(scan.candidates[0].duplicate_contact_id, giulia.contact_id);

        let tom = store.list_contacts(Some("tom@hughes.vc")).unwrap().remove(0);
        let scan = find_contact_duplicates(&store, &DuplicateQuery::from(&tom), &FinderConfig::default());
        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].match_type, MatchType::Mobile);

        let priya = store.list_contacts(Some("priya@lumen.dev")).unwrap().remove(0);
        let scan = find_contact_duplicates(&store, &DuplicateQuery::from(&priya), &FinderConfig::default());
        assert_eq!(scan.candidates.len(), 1);
        assert_eq!(scan.candidates[0].match_type, MatchType::Linkedin);

        let company_scan = |name: &str| {
            let company = store
                .list_companies(None)
                .unwrap()
                .into_iter()
                .find(|c| c.name == name)
                .unwrap();
            find_company_duplicates(&store, &CompanyQuery::from(&company), &FinderConfig::default())
        };
        let found = company_scan("Northwind");
        assert_eq!(found.candidates.len(), 1);
        assert_eq!(found.candidates[0].duplicate.name, "Northwind Ltd.");
        assert_eq!(found.candidates[0].match_type, CompanyMatchType::Domain);

        let found = company_scan("Hughes Ventures");
        assert_eq!(found.candidates.len(), 1);
        assert_eq!(found.candidates[0].match_type, CompanyMatchType::Website);

        let found = company_scan("Lumen Labs");
        assert_eq!(found.candidates.len(), 1);
        assert_eq!(found.candidates[0].duplicate.name, "Lumen Lab");
        assert_eq!(found.candidates[0].match_type, CompanyMatchType::Name);

        assert!(company_scan("Printhouse").candidates.is_empty());
    }

    #[test]
    fn ping_reports_healthy_connection() {
        assert!(store().ping());
    }
}
