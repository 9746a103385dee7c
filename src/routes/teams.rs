use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{require_staff, Caller};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::BriefStatus;
use crate::models::{NewTeam, NewUserTeam, Team};
use crate::schema::{brief_teams, briefs, teams, user_teams, users};
use crate::state::AppState;
use crate::utils::json::{double_option, non_empty};
use crate::utils::time::{now, to_iso};

#[derive(Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub lead_id: Option<Option<Uuid>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = teams)]
struct TeamChangeset {
    name: Option<String>,
    description: Option<Option<String>>,
    lead_id: Option<Option<Uuid>>,
}

#[derive(Deserialize)]
pub struct SetMembersRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Serialize, Clone)]
pub struct TeamMember {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub designation: Option<String>,
}

#[derive(Serialize)]
pub struct TeamResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub created_by: Uuid,
    pub members: Vec<TeamMember>,
    pub created_at: String,
    pub updated_at: String,
}

fn load_team(conn: &mut PgConnection, team_id: Uuid) -> AppResult<Team> {
    teams::table
        .find(team_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("team"))
}

fn ensure_users_exist(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let found: i64 = users::table
        .filter(users::id.eq_any(ids))
        .select(count_star())
        .first(conn)?;
    if found != ids.len() as i64 {
        return Err(AppError::entity_not_found("user"));
    }
    Ok(())
}

fn build_responses(conn: &mut PgConnection, rows: Vec<Team>) -> AppResult<Vec<TeamResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|t| t.id).collect();
    let mut members: HashMap<Uuid, Vec<TeamMember>> = HashMap::new();
    if !ids.is_empty() {
        let member_rows: Vec<(Uuid, Uuid, String, String, String, Option<String>)> =
            user_teams::table
                .inner_join(users::table)
                .filter(user_teams::team_id.eq_any(&ids))
                .order(users::name.asc())
                .select((
                    user_teams::team_id,
                    users::id,
                    users::name,
                    users::email,
                    users::role,
                    users::designation,
                ))
                .load(conn)?;
        for (team_id, id, name, email, role, designation) in member_rows {
            members.entry(team_id).or_default().push(TeamMember {
                id,
                name,
                email,
                role,
                designation,
            });
        }
    }

    Ok(rows
        .into_iter()
        .map(|team| TeamResponse {
            members: members.remove(&team.id).unwrap_or_default(),
            id: team.id,
            name: team.name,
            description: team.description,
            lead_id: team.lead_id,
            created_by: team.created_by,
            created_at: to_iso(team.created_at),
            updated_at: to_iso(team.updated_at),
        })
        .collect())
}

fn team_response(conn: &mut PgConnection, team_id: Uuid) -> AppResult<TeamResponse> {
    let team = load_team(conn, team_id)?;
    build_responses(conn, vec![team])?
        .pop()
        .ok_or_else(|| AppError::entity_not_found("team"))
}

pub async fn list_teams(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TeamResponse>>> {
    let mut conn = state.db()?;
    Caller::resolve(&mut conn, &user)?;
    let rows: Vec<Team> = teams::table.order(teams::name.asc()).load(&mut conn)?;
    Ok(Json(build_responses(&mut conn, rows)?))
}

pub async fn create_team(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTeamRequest>,
) -> AppResult<(StatusCode, Json<TeamResponse>)> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let response = conn.transaction::<TeamResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;
        if let Some(lead) = payload.lead_id {
            ensure_users_exist(conn, &[lead])?;
        }

        let new_team = NewTeam {
            id: Uuid::new_v4(),
            name,
            description: non_empty(payload.description),
            lead_id: payload.lead_id,
            created_by: caller.id,
        };
        diesel::insert_into(teams::table)
            .values(&new_team)
            .execute(conn)?;
        team_response(conn, new_team.id)
    })?;

    info!(team_id = %response.id, "team created");
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn update_team(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateTeamRequest>,
) -> AppResult<Json<TeamResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<TeamResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;
        load_team(conn, team_id)?;

        let mut changes = TeamChangeset::default();
        if let Some(name) = payload.name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            changes.name = Some(trimmed.to_string());
        }
        changes.description = payload.description.map(non_empty);
        if let Some(Some(lead)) = payload.lead_id {
            ensure_users_exist(conn, &[lead])?;
        }
        changes.lead_id = payload.lead_id;

        if changes.name.is_some() || changes.description.is_some() || changes.lead_id.is_some() {
            diesel::update(teams::table.find(team_id))
                .set((&changes, teams::updated_at.eq(now())))
                .execute(conn)?;
        }
        team_response(conn, team_id)
    })?;

    info!(team_id = %team_id, "team updated");
    Ok(Json(response))
}

pub async fn delete_team(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;
        load_team(conn, team_id)?;

        let active: i64 = brief_teams::table
            .inner_join(briefs::table)
            .filter(brief_teams::team_id.eq(team_id))
            .filter(briefs::status.ne_all(BriefStatus::closed_values()))
            .select(count_star())
            .first(conn)?;
        if active > 0 {
            return Err(AppError::bad_request(format!(
                "cannot delete team assigned to {active} active briefs"
            )));
        }

        diesel::delete(teams::table.find(team_id)).execute(conn)?;
        Ok(())
    })?;

    info!(team_id = %team_id, "team deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_members(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<SetMembersRequest>,
) -> AppResult<Json<TeamResponse>> {
    let members: Vec<Uuid> = payload
        .user_ids
        .iter()
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let mut conn = state.db()?;
    let response = conn.transaction::<TeamResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;
        load_team(conn, team_id)?;
        ensure_users_exist(conn, &members)?;

        diesel::delete(user_teams::table.filter(user_teams::team_id.eq(team_id))).execute(conn)?;
        if !members.is_empty() {
            let rows: Vec<NewUserTeam> = members
                .iter()
                .map(|user_id| NewUserTeam {
                    user_id: *user_id,
                    team_id,
                })
                .collect();
            diesel::insert_into(user_teams::table)
                .values(&rows)
                .execute(conn)?;
        }
        team_response(conn, team_id)
    })?;

    info!(team_id = %team_id, members = response.members.len(), "team members replaced");
    Ok(Json(response))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Path((team_id, user_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;

        let removed = diesel::delete(
            user_teams::table
                .filter(user_teams::team_id.eq(team_id))
                .filter(user_teams::user_id.eq(user_id)),
        )
        .execute(conn)?;
        if removed == 0 {
            return Err(AppError::entity_not_found("team member"));
        }
        Ok(())
    })?;

    info!(team_id = %team_id, user_id = %user_id, "team member removed");
    Ok(StatusCode::NO_CONTENT)
}
