use crate::Database;
use crate::models::{DonationRow, ExpenseRow, NgoRow, ProjectRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

impl Database {
    // -- Users & roles --

    /// Create the user and profile rows in one transaction. Role assignment
    /// is a separate step so a failure there can be surfaced to the caller
    /// as a partial signup rather than silently reported as success.
    pub fn create_identity(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        full_name: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, password) VALUES (?1, ?2, ?3)",
                (id, email, password_hash),
            )?;
            tx.execute(
                "INSERT INTO profiles (id, user_id, full_name, email) VALUES (?1, ?2, ?3, ?4)",
                (uuid::Uuid::new_v4().to_string(), id, full_name, email),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Persist the single role assignment for an identity. UNIQUE(user_id)
    /// keeps it at exactly one.
    pub fn assign_role(&self, user_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_roles (id, user_id, role) VALUES (?1, ?2, ?3)",
                (uuid::Uuid::new_v4().to_string(), user_id, role),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.prepare("SELECT id, email, password, created_at FROM users WHERE email = ?1")?
                .query_row([email], map_user)
                .optional()
        })
    }

    pub fn get_user_email(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT email FROM users WHERE id = ?1", [user_id], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    pub fn get_role(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM user_roles WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- NGOs --

    pub fn insert_ngo(
        &self,
        id: &str,
        user_id: &str,
        name: &str,
        description: Option<&str>,
        registration_number: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ngos (id, user_id, name, description, registration_number)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, user_id, name, description, registration_number),
            )?;
            Ok(())
        })
    }

    pub fn get_ngo(&self, id: &str) -> Result<Option<NgoRow>> {
        self.with_conn(|conn| {
            conn.prepare(&format!("{} WHERE id = ?1", SELECT_NGO))?
                .query_row([id], map_ngo)
                .optional()
        })
    }

    pub fn list_ngos(&self) -> Result<Vec<NgoRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_NGO))?;
            let rows = stmt
                .query_map([], map_ngo)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The organization owned by this identity, if any. One owner per NGO;
    /// an operator owns at most one NGO in this system.
    pub fn ngo_owned_by(&self, user_id: &str) -> Result<Option<NgoRow>> {
        self.with_conn(|conn| {
            conn.prepare(&format!("{} WHERE user_id = ?1", SELECT_NGO))?
                .query_row([user_id], map_ngo)
                .optional()
        })
    }

    /// Flip the verification flag, recording who verified and when.
    /// Returns the (before, after) row images so the caller can publish a
    /// change event with both states. None if the NGO does not exist.
    pub fn set_ngo_verification(
        &self,
        id: &str,
        is_verified: bool,
        admin_id: &str,
    ) -> Result<Option<(NgoRow, NgoRow)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let old = tx
                .prepare(&format!("{} WHERE id = ?1", SELECT_NGO))?
                .query_row([id], map_ngo)
                .optional()?;
            let Some(old) = old else {
                return Ok(None);
            };

            if is_verified {
                tx.execute(
                    "UPDATE ngos SET is_verified = 1, verified_at = datetime('now'), verified_by = ?2
                     WHERE id = ?1",
                    (id, admin_id),
                )?;
            } else {
                tx.execute(
                    "UPDATE ngos SET is_verified = 0, verified_at = NULL, verified_by = NULL
                     WHERE id = ?1",
                    [id],
                )?;
            }

            let new = tx
                .prepare(&format!("{} WHERE id = ?1", SELECT_NGO))?
                .query_row([id], map_ngo)
                .optional()?
                .ok_or_else(|| anyhow::anyhow!("NGO vanished mid-update: {}", id))?;

            tx.commit()?;
            Ok(Some((old, new)))
        })
    }

    // -- Projects --

    pub fn insert_project(
        &self,
        id: &str,
        ngo_id: &str,
        name: &str,
        description: Option<&str>,
        target_amount: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, ngo_id, name, description, target_amount)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, ngo_id, name, description, target_amount),
            )?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: &str) -> Result<Option<ProjectRow>> {
        self.with_conn(|conn| {
            conn.prepare(&format!("{} WHERE id = ?1", SELECT_PROJECT))?
                .query_row([id], map_project)
                .optional()
        })
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_PROJECT))?;
            let rows = stmt
                .query_map([], map_project)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One-hop join the change-feed payload does not carry: which NGO owns
    /// the project this donation targets, plus the project name for display.
    pub fn ngo_for_project(&self, project_id: &str) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT p.ngo_id, p.name FROM projects p WHERE p.id = ?1",
                [project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })
    }

    pub fn total_donated(&self, project_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM donations
                 WHERE project_id = ?1 AND status = 'completed'",
                [project_id],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }

    // -- Donations --

    #[allow(clippy::too_many_arguments)]
    pub fn insert_donation(
        &self,
        id: &str,
        project_id: &str,
        donor_id: Option<&str>,
        amount: i64,
        message: Option<&str>,
        is_anonymous: bool,
        transaction_id: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO donations (id, project_id, donor_id, amount, message, is_anonymous, status, transaction_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'completed', ?7)",
                rusqlite::params![id, project_id, donor_id, amount, message, is_anonymous, transaction_id],
            )?;
            Ok(())
        })
    }

    /// Idempotency lookup: a retried submission with the same transaction_id
    /// resolves to the original donation.
    pub fn donation_by_transaction(&self, transaction_id: &str) -> Result<Option<DonationRow>> {
        self.with_conn(|conn| {
            conn.prepare(&format!("{} WHERE transaction_id = ?1", SELECT_DONATION))?
                .query_row([transaction_id], map_donation)
                .optional()
        })
    }

    pub fn donations_for_project(&self, project_id: &str) -> Result<Vec<DonationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE project_id = ?1 ORDER BY created_at DESC",
                SELECT_DONATION
            ))?;
            let rows = stmt
                .query_map([project_id], map_donation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Expenses --

    pub fn insert_expense(
        &self,
        id: &str,
        project_id: &str,
        amount: i64,
        purpose: &str,
        description: Option<&str>,
        expense_date: Option<&str>,
        proof_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO expenses (id, project_id, amount, purpose, description, expense_date, proof_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, project_id, amount, purpose, description, expense_date, proof_url],
            )?;
            Ok(())
        })
    }

    pub fn expenses_for_project(&self, project_id: &str) -> Result<Vec<ExpenseRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE project_id = ?1 ORDER BY created_at DESC",
                SELECT_EXPENSE
            ))?;
            let rows = stmt
                .query_map([project_id], map_expense)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn flagged_expenses(&self) -> Result<Vec<ExpenseRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE is_flagged = 1 ORDER BY created_at DESC",
                SELECT_EXPENSE
            ))?;
            let rows = stmt
                .query_map([], map_expense)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flag or clear an expense. Returns the updated row, None if missing.
    pub fn set_expense_flag(
        &self,
        id: &str,
        is_flagged: bool,
        admin_id: &str,
        reason: Option<&str>,
    ) -> Result<Option<ExpenseRow>> {
        self.with_conn(|conn| {
            let changed = if is_flagged {
                conn.execute(
                    "UPDATE expenses SET is_flagged = 1, flagged_by = ?2, flagged_reason = ?3
                     WHERE id = ?1",
                    rusqlite::params![id, admin_id, reason],
                )?
            } else {
                conn.execute(
                    "UPDATE expenses SET is_flagged = 0, flagged_by = NULL, flagged_reason = NULL
                     WHERE id = ?1",
                    [id],
                )?
            };
            if changed == 0 {
                return Ok(None);
            }
            conn.prepare(&format!("{} WHERE id = ?1", SELECT_EXPENSE))?
                .query_row([id], map_expense)
                .optional()
        })
    }
}

const SELECT_NGO: &str = "SELECT id, user_id, name, description, registration_number, is_verified, \
                          verified_at, verified_by, created_at FROM ngos";

const SELECT_PROJECT: &str =
    "SELECT id, ngo_id, name, description, target_amount, status, created_at FROM projects";

const SELECT_DONATION: &str = "SELECT id, project_id, donor_id, amount, message, is_anonymous, \
                               status, transaction_id, created_at FROM donations";

const SELECT_EXPENSE: &str = "SELECT id, project_id, amount, purpose, description, expense_date, \
                              proof_url, is_flagged, flagged_by, flagged_reason, created_at FROM expenses";

fn map_user(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_ngo(row: &Row) -> rusqlite::Result<NgoRow> {
    Ok(NgoRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        registration_number: row.get(4)?,
        is_verified: row.get(5)?,
        verified_at: row.get(6)?,
        verified_by: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_project(row: &Row) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        ngo_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        target_amount: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_donation(row: &Row) -> rusqlite::Result<DonationRow> {
    Ok(DonationRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        donor_id: row.get(2)?,
        amount: row.get(3)?,
        message: row.get(4)?,
        is_anonymous: row.get(5)?,
        status: row.get(6)?,
        transaction_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_expense(row: &Row) -> rusqlite::Result<ExpenseRow> {
    Ok(ExpenseRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        amount: row.get(2)?,
        purpose: row.get(3)?,
        description: row.get(4)?,
        expense_date: row.get(5)?,
        proof_url: row.get(6)?,
        is_flagged: row.get(7)?,
        flagged_by: row.get(8)?,
        flagged_reason: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn seed_user(db: &Database, role: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let email = format!("{}@example.org", &id[..8]);
        db.create_identity(&id, &email, "hash", "Test User").unwrap();
        db.assign_role(&id, role).unwrap();
        id
    }

    fn seed_ngo(db: &Database, owner: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_ngo(&id, owner, "Clean Water Trust", None, None).unwrap();
        id
    }

    fn seed_project(db: &Database, ngo_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_project(&id, ngo_id, "Well Drilling", None, 500_000).unwrap();
        id
    }

    #[test]
    fn role_is_persisted_with_user() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, "donor");

        assert_eq!(db.get_role(&user_id).unwrap().as_deref(), Some("donor"));
        assert_eq!(db.get_role("nonexistent").unwrap(), None);
    }

    #[test]
    fn duplicate_email_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_identity("u1", "dup@example.org", "h", "A").unwrap();
        let err = db.create_identity("u2", "dup@example.org", "h", "B");
        assert!(err.is_err());
        // The failed transaction must not leave a partial profile behind.
        assert!(db.get_user_by_email("dup@example.org").unwrap().unwrap().id == "u1");
    }

    #[test]
    fn second_role_assignment_rejected() {
        let db = Database::open_in_memory().unwrap();
        let user_id = seed_user(&db, "ngo");
        assert!(db.assign_role(&user_id, "admin").is_err());
        assert_eq!(db.get_role(&user_id).unwrap().as_deref(), Some("ngo"));
    }

    #[test]
    fn ngo_for_project_resolves_owner() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "ngo");
        let ngo_id = seed_ngo(&db, &owner);
        let project_id = seed_project(&db, &ngo_id);

        let (resolved_ngo, name) = db.ngo_for_project(&project_id).unwrap().unwrap();
        assert_eq!(resolved_ngo, ngo_id);
        assert_eq!(name, "Well Drilling");
        assert!(db.ngo_for_project("missing").unwrap().is_none());

        let owned = db.ngo_owned_by(&owner).unwrap().unwrap();
        assert_eq!(owned.id, ngo_id);
    }

    #[test]
    fn verification_returns_before_and_after() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "ngo");
        let admin = seed_user(&db, "admin");
        let ngo_id = seed_ngo(&db, &owner);

        let (old, new) = db.set_ngo_verification(&ngo_id, true, &admin).unwrap().unwrap();
        assert!(!old.is_verified);
        assert!(new.is_verified);
        assert_eq!(new.verified_by.as_deref(), Some(admin.as_str()));

        let (old, new) = db.set_ngo_verification(&ngo_id, false, &admin).unwrap().unwrap();
        assert!(old.is_verified);
        assert!(!new.is_verified);
        assert!(new.verified_by.is_none());

        assert!(db.set_ngo_verification("missing", true, &admin).unwrap().is_none());
    }

    #[test]
    fn donation_totals_and_idempotency_key() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "ngo");
        let donor = seed_user(&db, "donor");
        let ngo_id = seed_ngo(&db, &owner);
        let project_id = seed_project(&db, &ngo_id);

        db.insert_donation("d1", &project_id, Some(&donor), 1500, None, false, Some("tx-1"))
            .unwrap();
        db.insert_donation("d2", &project_id, None, 500, None, true, None).unwrap();

        assert_eq!(db.total_donated(&project_id).unwrap(), 2000);

        // Same transaction_id again violates the unique constraint.
        let dup = db.insert_donation("d3", &project_id, Some(&donor), 1500, None, false, Some("tx-1"));
        assert!(dup.is_err());
        let existing = db.donation_by_transaction("tx-1").unwrap().unwrap();
        assert_eq!(existing.id, "d1");
        assert_eq!(db.donations_for_project(&project_id).unwrap().len(), 2);
    }

    #[test]
    fn expense_flagging() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "ngo");
        let admin = seed_user(&db, "admin");
        let ngo_id = seed_ngo(&db, &owner);
        let project_id = seed_project(&db, &ngo_id);

        db.insert_expense("e1", &project_id, 800, "Pipes", None, None, None).unwrap();

        let flagged = db
            .set_expense_flag("e1", true, &admin, Some("No receipt attached"))
            .unwrap()
            .unwrap();
        assert!(flagged.is_flagged);
        assert_eq!(flagged.flagged_reason.as_deref(), Some("No receipt attached"));
        assert_eq!(db.flagged_expenses().unwrap().len(), 1);

        let cleared = db.set_expense_flag("e1", false, &admin, None).unwrap().unwrap();
        assert!(!cleared.is_flagged);
        assert!(db.flagged_expenses().unwrap().is_empty());
        assert!(db.set_expense_flag("missing", true, &admin, None).unwrap().is_none());
    }
}
