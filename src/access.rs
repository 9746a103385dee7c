//! Role and ownership rules applied before any write.
//!
//! Every operation first resolves a [`Caller`] from the bearer token and the
//! current user row, then checks one of the predicates below. A failed check
//! aborts the surrounding transaction with no partial effect.

use std::collections::HashSet;

use diesel::{prelude::*, PgConnection};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Brief, Comment, Task, User};
use crate::schema::{brand_managers, brief_teams, briefs, tasks, user_teams, users};
use crate::utils::string_enum::string_enum;

string_enum! {
    pub enum Role {
        Admin => "admin",
        Manager => "manager",
        Employee => "employee",
    }
}

/// The acting user, with the role as currently stored.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn resolve(conn: &mut PgConnection, user: &AuthenticatedUser) -> AppResult<Self> {
        let row: User = users::table
            .find(user.user_id)
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;
        Self::from_user(&row)
    }

    pub fn from_user(user: &User) -> AppResult<Self> {
        let role = Role::parse(&user.role)
            .ok_or_else(|| AppError::internal(format!("unknown role '{}'", user.role)))?;
        Ok(Self {
            id: user.id,
            name: user.name.clone(),
            role,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Manager)
    }
}

pub fn ensure(allowed: bool) -> AppResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

pub fn require_admin(caller: &Caller) -> AppResult<()> {
    ensure(caller.is_admin())
}

pub fn require_staff(caller: &Caller) -> AppResult<()> {
    ensure(caller.is_staff())
}

/// Admin, or the manager assigned to the brief.
pub fn can_manage_brief(caller: &Caller, brief: &Brief) -> bool {
    caller.is_admin() || (caller.is_manager() && brief.assigned_manager_id == Some(caller.id))
}

/// Brief managers, or the task's own assignee.
pub fn can_update_task(caller: &Caller, brief: &Brief, task: &Task) -> bool {
    can_manage_brief(caller, brief) || task.assignee_id == caller.id
}

pub fn can_edit_comment(caller: &Caller, comment: &Comment) -> bool {
    caller.is_admin() || comment.author_id == caller.id
}

pub fn is_brand_manager(conn: &mut PgConnection, brand_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let found = brand_managers::table
        .filter(brand_managers::brand_id.eq(brand_id))
        .filter(brand_managers::user_id.eq(user_id))
        .select(brand_managers::user_id)
        .first::<Uuid>(conn)
        .optional()?;
    Ok(found.is_some())
}

/// Admin, or a manager linked to the brand.
pub fn can_manage_brand(conn: &mut PgConnection, caller: &Caller, brand_id: Uuid) -> AppResult<bool> {
    if caller.is_admin() {
        return Ok(true);
    }
    if !caller.is_manager() {
        return Ok(false);
    }
    is_brand_manager(conn, brand_id, caller.id)
}

/// Briefs a caller may read.
#[derive(Debug, Clone)]
pub enum BriefScope {
    All,
    Only(HashSet<Uuid>),
}

impl BriefScope {
    pub fn contains(&self, brief_id: Uuid) -> bool {
        match self {
            BriefScope::All => true,
            BriefScope::Only(ids) => ids.contains(&brief_id),
        }
    }

    pub fn ids(&self) -> Option<Vec<Uuid>> {
        match self {
            BriefScope::All => None,
            BriefScope::Only(ids) => Some(ids.iter().copied().collect()),
        }
    }
}

/// Admins see every brief. Managers see briefs assigned to or created by
/// them and briefs of brands they manage. Employees see briefs holding one of
/// their tasks or linked to one of their teams.
pub fn brief_scope(conn: &mut PgConnection, caller: &Caller) -> AppResult<BriefScope> {
    match caller.role {
        Role::Admin => Ok(BriefScope::All),
        Role::Manager => {
            let managed_brands: Vec<Uuid> = brand_managers::table
                .filter(brand_managers::user_id.eq(caller.id))
                .select(brand_managers::brand_id)
                .load(conn)?;
            let mut ids: HashSet<Uuid> = briefs::table
                .filter(
                    briefs::assigned_manager_id
                        .eq(caller.id)
                        .or(briefs::created_by.eq(caller.id)),
                )
                .select(briefs::id)
                .load::<Uuid>(conn)?
                .into_iter()
                .collect();
            if !managed_brands.is_empty() {
                let brand_briefs: Vec<Uuid> = briefs::table
                    .filter(briefs::brand_id.eq_any(&managed_brands))
                    .select(briefs::id)
                    .load(conn)?;
                ids.extend(brand_briefs);
            }
            Ok(BriefScope::Only(ids))
        }
        Role::Employee => {
            let mut ids: HashSet<Uuid> = tasks::table
                .filter(tasks::assignee_id.eq(caller.id))
                .select(tasks::brief_id)
                .load::<Uuid>(conn)?
                .into_iter()
                .collect();
            let team_ids: Vec<Uuid> = user_teams::table
                .filter(user_teams::user_id.eq(caller.id))
                .select(user_teams::team_id)
                .load(conn)?;
            if !team_ids.is_empty() {
                let team_briefs: Vec<Uuid> = brief_teams::table
                    .filter(brief_teams::team_id.eq_any(&team_ids))
                    .select(brief_teams::brief_id)
                    .load(conn)?;
                ids.extend(team_briefs);
            }
            Ok(BriefScope::Only(ids))
        }
    }
}

pub fn ensure_brief_visible(conn: &mut PgConnection, caller: &Caller, brief: &Brief) -> AppResult<()> {
    if can_manage_brief(caller, brief) {
        return Ok(());
    }
    ensure(brief_scope(conn, caller)?.contains(brief.id))
}
