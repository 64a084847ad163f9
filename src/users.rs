use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;

use crate::db;
use crate::error::{is_unique_violation, CoreError, CoreResult};
use crate::model::{double_option, Role, UserAccount};
use crate::policy::{authorize, Operation, Principal};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub national_id: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub tutor_id: Option<String>,
}

/// Absent keys leave a field alone; an explicit `null` clears `phone` or
/// `tutorId`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "dni")]
    pub national_id: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "double_option")]
    pub tutor_id: Option<Option<String>>,
}

impl AccountPatch {
    /// Profile fields any user may change on their own account.
    fn is_self_service(&self) -> bool {
        self.role.is_none() && self.national_id.is_none() && self.tutor_id.is_none()
    }
}

const ACCOUNT_COLUMNS: &str = "u.id, u.name, u.email, u.national_id, u.phone, u.role, u.created_at, g.tutor_id";

fn row_to_account(r: &Row<'_>) -> rusqlite::Result<UserAccount> {
    let role_raw: String = r.get(5)?;
    let role = role_raw.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    Ok(UserAccount {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        national_id: r.get(3)?,
        phone: r.get(4)?,
        role,
        created_at: r.get(6)?,
        tutor_id: r.get(7)?,
        children_ids: Vec::new(),
    })
}

pub fn find_account(conn: &Connection, id: &str) -> CoreResult<Option<UserAccount>> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS}
         FROM users u
         LEFT JOIN guardianships g ON g.student_id = u.id
         WHERE u.id = ?"
    );
    let account = conn.query_row(&sql, [id], row_to_account).optional()?;
    match account {
        Some(mut a) => {
            if a.role == Role::Tutor {
                a.children_ids = children_ids(conn, &a.id)?;
            }
            Ok(Some(a))
        }
        None => Ok(None),
    }
}

pub fn get_account(conn: &Connection, id: &str) -> CoreResult<UserAccount> {
    find_account(conn, id)?.ok_or_else(|| CoreError::not_found("user", id))
}

/// Loads an account and checks it holds `role`; `field` names the
/// offending input in the validation message.
pub fn require_role(conn: &Connection, id: &str, role: Role, field: &str) -> CoreResult<UserAccount> {
    let account = get_account(conn, id)?;
    if account.role != role {
        return Err(CoreError::validation_with(
            format!("{} must reference a {} account", field, role),
            serde_json::json!({ "field": field, "id": id, "role": account.role.as_str() }),
        ));
    }
    Ok(account)
}

pub fn account_role(conn: &Connection, id: &str) -> CoreResult<Option<Role>> {
    let raw: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    Ok(raw.and_then(|s| s.parse::<Role>().ok()))
}

pub(crate) fn children_ids(conn: &Connection, tutor_id: &str) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT g.student_id
         FROM guardianships g
         JOIN users u ON u.id = g.student_id
         WHERE g.tutor_id = ?
         ORDER BY u.name, u.id",
    )?;
    let ids = stmt
        .query_map([tutor_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn list_accounts(conn: &Connection, actor: &Principal, role: Option<Role>) -> CoreResult<Vec<UserAccount>> {
    authorize(actor, Operation::ReadAccounts)?;
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS}
         FROM users u
         LEFT JOIN guardianships g ON g.student_id = u.id
         WHERE (?1 IS NULL OR u.role = ?1)
         ORDER BY u.name, u.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut accounts = stmt
        .query_map([role.map(|r| r.as_str())], row_to_account)?
        .collect::<Result<Vec<_>, _>>()?;
    for a in accounts.iter_mut().filter(|a| a.role == Role::Tutor) {
        a.children_ids = children_ids(conn, &a.id)?;
    }
    Ok(accounts)
}

/// Students ordered by name; shared by enrollment and promotion listings.
pub(crate) fn list_students(conn: &Connection) -> CoreResult<Vec<UserAccount>> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS}
         FROM users u
         LEFT JOIN guardianships g ON g.student_id = u.id
         WHERE u.role = 'STUDENT'
         ORDER BY u.name, u.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map([], row_to_account)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

fn clean_name(raw: &str) -> CoreResult<String> {
    let name = raw.trim().to_string();
    if name.is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }
    Ok(name)
}

fn clean_email(raw: &str) -> CoreResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(CoreError::validation_with(
            "email must be a valid address",
            serde_json::json!({ "field": "email" }),
        ));
    }
    Ok(email)
}

fn clean_national_id(raw: &str) -> CoreResult<String> {
    let national_id = raw.trim().to_string();
    if national_id.is_empty() {
        return Err(CoreError::validation("nationalId must not be empty"));
    }
    Ok(national_id)
}

fn clean_optional(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn ensure_tutor_allowed(role: Role, tutor_id: &Option<String>) -> CoreResult<()> {
    if tutor_id.is_some() && role != Role::Student {
        return Err(CoreError::validation("tutorId is only allowed for STUDENT accounts"));
    }
    Ok(())
}

fn normalize(input: &NewAccount) -> CoreResult<NewAccount> {
    let tutor_id = clean_optional(input.tutor_id.as_deref());
    ensure_tutor_allowed(input.role, &tutor_id)?;
    Ok(NewAccount {
        name: clean_name(&input.name)?,
        email: clean_email(&input.email)?,
        national_id: clean_national_id(&input.national_id)?,
        phone: clean_optional(input.phone.as_deref()),
        role: input.role,
        tutor_id,
    })
}

/// Proctors manage student and tutor accounts only.
fn ensure_proctor_target(actor: &Principal, role: Role) -> CoreResult<()> {
    if actor.role == Role::Proctor && !matches!(role, Role::Student | Role::Tutor) {
        return Err(CoreError::Permission {
            role: actor.role,
            operation: Operation::ManageAccounts,
        });
    }
    Ok(())
}

/// `except_id` skips the account being edited.
fn ensure_unique(conn: &Connection, email: &str, national_id: &str, except_id: Option<&str>) -> CoreResult<()> {
    let taken = |sql: &str, value: &str| -> CoreResult<bool> {
        Ok(conn
            .query_row(sql, (value, except_id), |r| r.get::<_, i64>(0))
            .optional()?
            .is_some())
    };
    if taken("SELECT 1 FROM users WHERE email = ?1 AND (?2 IS NULL OR id <> ?2)", email)? {
        return Err(CoreError::Conflict("email-taken"));
    }
    if taken("SELECT 1 FROM users WHERE national_id = ?1 AND (?2 IS NULL OR id <> ?2)", national_id)? {
        return Err(CoreError::Conflict("national-id-taken"));
    }
    Ok(())
}

/// Grades, enrollments, promotion statuses, subject staffing and programs
/// pin an account to its role.
fn has_records(conn: &Connection, id: &str) -> CoreResult<bool> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM enrollments WHERE student_id = ?1)
             OR EXISTS(SELECT 1 FROM grades WHERE student_id = ?1 OR teacher_id = ?1)
             OR EXISTS(SELECT 1 FROM promotion_statuses WHERE student_id = ?1)
             OR EXISTS(SELECT 1 FROM subjects
                       WHERE lead_staff_id = ?1 OR substitute_staff_id = ?1 OR aide_staff_id = ?1)
             OR EXISTS(SELECT 1 FROM programs WHERE teacher_id = ?1)",
        [id],
        |r| r.get(0),
    )?;
    Ok(found != 0)
}

fn map_unique(e: rusqlite::Error) -> CoreError {
    if is_unique_violation(&e) {
        CoreError::Conflict("account-exists")
    } else {
        CoreError::Db(e)
    }
}

pub fn create_account(conn: &Connection, actor: &Principal, input: &NewAccount) -> CoreResult<UserAccount> {
    authorize(actor, Operation::ManageAccounts)?;
    ensure_proctor_target(actor, input.role)?;
    let account = normalize(input)?;

    let tx = db::write_tx(conn)?;
    ensure_unique(&tx, &account.email, &account.national_id, None)?;
    if let Some(tutor_id) = &account.tutor_id {
        require_role(&tx, tutor_id, Role::Tutor, "tutorId")?;
    }

    let id = db::new_id();
    let now = db::now_rfc3339();
    tx.execute(
        "INSERT INTO users(id, name, email, national_id, phone, role, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &account.name,
            &account.email,
            &account.national_id,
            &account.phone,
            account.role.as_str(),
            &now,
        ),
    )
    .map_err(map_unique)?;
    if let Some(tutor_id) = &account.tutor_id {
        tx.execute(
            "INSERT INTO guardianships(student_id, tutor_id, linked_at) VALUES(?, ?, ?)",
            (&id, tutor_id, &now),
        )?;
    }
    let created = get_account(&tx, &id)?;
    tx.commit()?;

    tracing::info!(actor = %actor.id, user = %id, role = %created.role, "account created");
    Ok(created)
}

/// Applies a partial edit. A user may change their own name, email and
/// phone; role, national id and tutor changes need account management
/// rights. The guardianship row follows the edit in the same transaction.
pub fn update_account(conn: &Connection, actor: &Principal, user_id: &str, patch: &AccountPatch) -> CoreResult<UserAccount> {
    let self_service = actor.id == user_id && patch.is_self_service();
    if !self_service {
        authorize(actor, Operation::ManageAccounts)?;
    }

    let tx = db::write_tx(conn)?;
    let current = get_account(&tx, user_id)?;
    if !self_service {
        ensure_proctor_target(actor, current.role)?;
        if let Some(role) = patch.role {
            ensure_proctor_target(actor, role)?;
        }
    }

    let name = match &patch.name {
        Some(v) => clean_name(v)?,
        None => current.name.clone(),
    };
    let email = match &patch.email {
        Some(v) => clean_email(v)?,
        None => current.email.clone(),
    };
    let national_id = match &patch.national_id {
        Some(v) => clean_national_id(v)?,
        None => current.national_id.clone(),
    };
    let phone = match &patch.phone {
        Some(v) => clean_optional(v.as_deref()),
        None => current.phone.clone(),
    };
    let role = patch.role.unwrap_or(current.role);
    let tutor_id = match &patch.tutor_id {
        Some(v) => clean_optional(v.as_deref()),
        None if role == Role::Student => current.tutor_id.clone(),
        None => None,
    };
    ensure_tutor_allowed(role, &tutor_id)?;
    ensure_unique(&tx, &email, &national_id, Some(user_id))?;

    if role != current.role {
        if has_records(&tx, user_id)? {
            return Err(CoreError::Conflict("account-has-records"));
        }
        if current.role == Role::Tutor {
            let released = tx.execute("DELETE FROM guardianships WHERE tutor_id = ?", [user_id])?;
            tracing::info!(user = %user_id, released, "tutor re-roled, children released");
        }
    }

    match &tutor_id {
        Some(t) if current.tutor_id.as_deref() == Some(t.as_str()) => {}
        Some(t) => {
            require_role(&tx, t, Role::Tutor, "tutorId")?;
            tx.execute(
                "INSERT INTO guardianships(student_id, tutor_id, linked_at) VALUES(?, ?, ?)
                 ON CONFLICT(student_id) DO UPDATE SET
                   tutor_id = excluded.tutor_id,
                   linked_at = excluded.linked_at",
                (user_id, t, db::now_rfc3339()),
            )?;
        }
        None => {
            tx.execute("DELETE FROM guardianships WHERE student_id = ?", [user_id])?;
        }
    }

    tx.execute(
        "UPDATE users SET name = ?, email = ?, national_id = ?, phone = ?, role = ? WHERE id = ?",
        (&name, &email, &national_id, &phone, role.as_str(), user_id),
    )
    .map_err(map_unique)?;
    let updated = get_account(&tx, user_id)?;
    tx.commit()?;

    tracing::info!(actor = %actor.id, user = %user_id, role = %updated.role, "account updated");
    Ok(updated)
}

/// Removes an account that nothing references, together with its
/// guardianship rows on either side.
pub fn delete_account(conn: &Connection, actor: &Principal, user_id: &str) -> CoreResult<()> {
    authorize(actor, Operation::ManageAccounts)?;
    if actor.id == user_id {
        return Err(CoreError::Conflict("cannot-delete-self"));
    }
    let tx = db::write_tx(conn)?;
    let account = get_account(&tx, user_id)?;
    ensure_proctor_target(actor, account.role)?;
    if has_records(&tx, user_id)? {
        return Err(CoreError::Conflict("account-has-records"));
    }
    let links = tx.execute(
        "DELETE FROM guardianships WHERE student_id = ?1 OR tutor_id = ?1",
        [user_id],
    )?;
    tx.execute("DELETE FROM users WHERE id = ?", [user_id])?;
    tx.commit()?;

    tracing::info!(actor = %actor.id, user = %user_id, role = %account.role, links, "account deleted");
    Ok(())
}
