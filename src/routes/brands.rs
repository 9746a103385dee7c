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

use crate::access::{can_manage_brand, ensure, require_admin, Caller, Role};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lifecycle::BriefStatus;
use crate::models::{Brand, BrandDocument, NewBrand, NewBrandDocument, NewBrandManager};
use crate::routes::files::{ensure_file_exists, load_files, presigned_urls};
use crate::schema::{brand_documents, brand_managers, brands, briefs, stored_files, tasks, users};
use crate::state::AppState;
use crate::utils::json::{double_option, non_empty};
use crate::utils::time::{now, to_iso};

#[derive(Deserialize)]
pub struct CreateBrandRequest {
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub manager_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateBrandRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub color: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = brands)]
struct BrandChangeset {
    name: Option<String>,
    color: Option<Option<String>>,
    description: Option<Option<String>>,
}

#[derive(Deserialize)]
pub struct SetManagersRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct AddDocumentRequest {
    pub file_id: Uuid,
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct BrandResponse {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub manager_ids: Vec<Uuid>,
    pub active_brief_count: i64,
    pub archived_brief_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct BrandDocumentResponse {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub file_id: Uuid,
    pub name: String,
    pub uploaded_by: Uuid,
    pub url: Option<String>,
    pub created_at: String,
}

pub(crate) fn load_brand(conn: &mut PgConnection, brand_id: Uuid) -> AppResult<Brand> {
    brands::table
        .find(brand_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("brand"))
}

/// Brand ids the caller may see; `None` means every brand.
pub(crate) fn visible_brand_ids(
    conn: &mut PgConnection,
    caller: &Caller,
) -> AppResult<Option<HashSet<Uuid>>> {
    match caller.role {
        Role::Admin => Ok(None),
        Role::Manager => Ok(Some(
            brand_managers::table
                .filter(brand_managers::user_id.eq(caller.id))
                .select(brand_managers::brand_id)
                .load::<Uuid>(conn)?
                .into_iter()
                .collect(),
        )),
        Role::Employee => {
            let brief_ids: Vec<Uuid> = tasks::table
                .filter(tasks::assignee_id.eq(caller.id))
                .select(tasks::brief_id)
                .distinct()
                .load(conn)?;
            if brief_ids.is_empty() {
                return Ok(Some(HashSet::new()));
            }
            Ok(Some(
                briefs::table
                    .filter(briefs::id.eq_any(&brief_ids))
                    .select(briefs::brand_id)
                    .load::<Option<Uuid>>(conn)?
                    .into_iter()
                    .flatten()
                    .collect(),
            ))
        }
    }
}

fn active_brief_count(conn: &mut PgConnection, brand_id: Uuid) -> AppResult<i64> {
    Ok(briefs::table
        .filter(briefs::brand_id.eq(brand_id))
        .filter(briefs::status.ne(BriefStatus::Archived.as_str()))
        .select(count_star())
        .first(conn)?)
}

/// Every id must belong to an admin or a manager.
fn validate_manager_ids(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
    let unique: Vec<Uuid> = ids
        .iter()
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if unique.is_empty() {
        return Ok(unique);
    }

    let eligible: HashSet<Uuid> = users::table
        .filter(users::id.eq_any(&unique))
        .filter(users::role.eq_any(vec![Role::Admin.as_str(), Role::Manager.as_str()]))
        .select(users::id)
        .load::<Uuid>(conn)?
        .into_iter()
        .collect();
    if let Some(missing) = unique.iter().find(|id| !eligible.contains(id)) {
        return Err(AppError::bad_request(format!(
            "user {missing} is not a manager or admin"
        )));
    }
    Ok(unique)
}

fn replace_managers(conn: &mut PgConnection, brand_id: Uuid, user_ids: &[Uuid]) -> AppResult<()> {
    diesel::delete(brand_managers::table.filter(brand_managers::brand_id.eq(brand_id)))
        .execute(conn)?;
    if user_ids.is_empty() {
        return Ok(());
    }
    let rows: Vec<NewBrandManager> = user_ids
        .iter()
        .map(|user_id| NewBrandManager {
            brand_id,
            user_id: *user_id,
        })
        .collect();
    diesel::insert_into(brand_managers::table)
        .values(&rows)
        .execute(conn)?;
    Ok(())
}

fn build_responses(conn: &mut PgConnection, rows: Vec<Brand>) -> AppResult<Vec<BrandResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|b| b.id).collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut managers: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let manager_rows: Vec<(Uuid, Uuid)> = brand_managers::table
        .filter(brand_managers::brand_id.eq_any(&ids))
        .select((brand_managers::brand_id, brand_managers::user_id))
        .load(conn)?;
    for (brand_id, user_id) in manager_rows {
        managers.entry(brand_id).or_default().push(user_id);
    }

    let status_rows: Vec<(Option<Uuid>, String)> = briefs::table
        .filter(briefs::brand_id.eq_any(&ids))
        .select((briefs::brand_id, briefs::status))
        .load(conn)?;
    let mut counts: HashMap<Uuid, (i64, i64)> = HashMap::new();
    for (brand_id, status) in status_rows {
        let Some(brand_id) = brand_id else { continue };
        let entry = counts.entry(brand_id).or_default();
        if status == BriefStatus::Archived.as_str() {
            entry.1 += 1;
        } else {
            entry.0 += 1;
        }
    }

    Ok(rows
        .into_iter()
        .map(|brand| {
            let (active, archived) = counts.get(&brand.id).copied().unwrap_or_default();
            BrandResponse {
                id: brand.id,
                manager_ids: managers.remove(&brand.id).unwrap_or_default(),
                active_brief_count: active,
                archived_brief_count: archived,
                name: brand.name,
                color: brand.color,
                description: brand.description,
                created_at: to_iso(brand.created_at),
                updated_at: to_iso(brand.updated_at),
            }
        })
        .collect())
}

fn brand_response(conn: &mut PgConnection, brand_id: Uuid) -> AppResult<BrandResponse> {
    let brand = load_brand(conn, brand_id)?;
    build_responses(conn, vec![brand])?
        .pop()
        .ok_or_else(|| AppError::entity_not_found("brand"))
}

pub async fn list_brands(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<BrandResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let rows: Vec<Brand> = match visible_brand_ids(&mut conn, &caller)? {
        None => brands::table.order(brands::name.asc()).load(&mut conn)?,
        Some(ids) if ids.is_empty() => Vec::new(),
        Some(ids) => {
            let ids: Vec<Uuid> = ids.into_iter().collect();
            brands::table
                .filter(brands::id.eq_any(&ids))
                .order(brands::name.asc())
                .load(&mut conn)?
        }
    };

    Ok(Json(build_responses(&mut conn, rows)?))
}

pub async fn get_brand(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<BrandResponse>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    load_brand(&mut conn, brand_id)?;
    if let Some(visible) = visible_brand_ids(&mut conn, &caller)? {
        ensure(visible.contains(&brand_id))?;
    }
    Ok(Json(brand_response(&mut conn, brand_id)?))
}

pub async fn create_brand(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateBrandRequest>,
) -> AppResult<(StatusCode, Json<BrandResponse>)> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let response = conn.transaction::<BrandResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;
        let manager_ids = validate_manager_ids(conn, &payload.manager_ids)?;

        let new_brand = NewBrand {
            id: Uuid::new_v4(),
            name,
            color: non_empty(payload.color),
            description: non_empty(payload.description),
            created_by: caller.id,
        };
        diesel::insert_into(brands::table)
            .values(&new_brand)
            .execute(conn)?;
        replace_managers(conn, new_brand.id, &manager_ids)?;

        brand_response(conn, new_brand.id)
    })?;

    info!(brand_id = %response.id, "brand created");
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn update_brand(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateBrandRequest>,
) -> AppResult<Json<BrandResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BrandResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        load_brand(conn, brand_id)?;
        ensure(can_manage_brand(conn, &caller, brand_id)?)?;

        let mut changes = BrandChangeset::default();
        if let Some(name) = payload.name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            changes.name = Some(trimmed.to_string());
        }
        changes.color = payload.color.map(non_empty);
        changes.description = payload.description.map(non_empty);

        if changes.name.is_some() || changes.color.is_some() || changes.description.is_some() {
            diesel::update(brands::table.find(brand_id))
                .set((&changes, brands::updated_at.eq(now())))
                .execute(conn)?;
        }

        brand_response(conn, brand_id)
    })?;

    info!(brand_id = %brand_id, "brand updated");
    Ok(Json(response))
}

pub async fn delete_brand(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;
        load_brand(conn, brand_id)?;

        let active = active_brief_count(conn, brand_id)?;
        if active > 0 {
            return Err(AppError::bad_request(format!(
                "cannot delete brand with {active} active briefs"
            )));
        }

        diesel::delete(brands::table.find(brand_id)).execute(conn)?;
        Ok(())
    })?;

    info!(brand_id = %brand_id, "brand deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_managers(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<SetManagersRequest>,
) -> AppResult<Json<BrandResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BrandResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;
        load_brand(conn, brand_id)?;

        let manager_ids = validate_manager_ids(conn, &payload.user_ids)?;
        replace_managers(conn, brand_id, &manager_ids)?;
        brand_response(conn, brand_id)
    })?;

    info!(brand_id = %brand_id, managers = response.manager_ids.len(), "brand managers replaced");
    Ok(Json(response))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<BrandDocumentResponse>>> {
    let (documents, files) = {
        let mut conn = state.db()?;
        let caller = Caller::resolve(&mut conn, &user)?;
        load_brand(&mut conn, brand_id)?;
        if let Some(visible) = visible_brand_ids(&mut conn, &caller)? {
            ensure(visible.contains(&brand_id))?;
        }

        let documents: Vec<BrandDocument> = brand_documents::table
            .filter(brand_documents::brand_id.eq(brand_id))
            .order(brand_documents::created_at.desc())
            .load(&mut conn)?;
        let file_ids: Vec<Uuid> = documents.iter().map(|d| d.file_id).collect();
        let files = load_files(&mut conn, &file_ids)?;
        (documents, files)
    };

    let urls = presigned_urls(&state, &files).await?;
    Ok(Json(
        documents
            .into_iter()
            .map(|doc| BrandDocumentResponse {
                url: urls.get(&doc.file_id).cloned(),
                id: doc.id,
                brand_id: doc.brand_id,
                file_id: doc.file_id,
                name: doc.name,
                uploaded_by: doc.uploaded_by,
                created_at: to_iso(doc.created_at),
            })
            .collect(),
    ))
}

pub async fn add_document(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<AddDocumentRequest>,
) -> AppResult<(StatusCode, Json<BrandDocumentResponse>)> {
    let mut conn = state.db()?;
    let document = conn.transaction::<BrandDocument, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        load_brand(conn, brand_id)?;
        ensure(can_manage_brand(conn, &caller, brand_id)?)?;
        ensure_file_exists(conn, payload.file_id)?;

        let name = match non_empty(payload.name) {
            Some(name) => name,
            None => stored_files::table
                .find(payload.file_id)
                .select(stored_files::original_name)
                .first(conn)?,
        };

        diesel::insert_into(brand_documents::table)
            .values(&NewBrandDocument {
                id: Uuid::new_v4(),
                brand_id,
                file_id: payload.file_id,
                name,
                uploaded_by: caller.id,
            })
            .get_result(conn)
            .map_err(AppError::from)
    })?;
    let files = load_files(&mut conn, &[document.file_id])?;
    drop(conn);

    let urls = presigned_urls(&state, &files).await?;

    info!(brand_id = %brand_id, document_id = %document.id, "brand document added");
    Ok((
        StatusCode::CREATED,
        Json(BrandDocumentResponse {
            url: urls.get(&document.file_id).cloned(),
            id: document.id,
            brand_id: document.brand_id,
            file_id: document.file_id,
            name: document.name,
            uploaded_by: document.uploaded_by,
            created_at: to_iso(document.created_at),
        }),
    ))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path((brand_id, document_id)): Path<(Uuid, Uuid)>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        ensure(can_manage_brand(conn, &caller, brand_id)?)?;

        let removed = diesel::delete(
            brand_documents::table
                .filter(brand_documents::id.eq(document_id))
                .filter(brand_documents::brand_id.eq(brand_id)),
        )
        .execute(conn)?;
        if removed == 0 {
            return Err(AppError::entity_not_found("document"));
        }
        Ok(())
    })?;

    info!(brand_id = %brand_id, document_id = %document_id, "brand document removed");
    Ok(StatusCode::NO_CONTENT)
}
