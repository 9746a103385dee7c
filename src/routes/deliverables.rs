use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::access::{can_manage_brief, ensure, Caller};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::fanout::{
    log_activity, notify_user, Notice, NotificationType, ACTIVITY_DELIVERABLE_APPROVED,
    ACTIVITY_DELIVERABLE_REJECTED, ACTIVITY_DELIVERABLE_SUBMITTED,
};
use crate::lifecycle::{
    assignee_transition_error, review_outcome, BriefStatus, DeliverableStatus, TaskStatus,
};
use crate::models::{Deliverable, NewDeliverable};
use crate::routes::briefs::{brief_status, load_brief, load_visible_brief};
use crate::routes::files::{ensure_file_exists, load_files, presigned_urls};
use crate::routes::tasks::{apply_task_status, load_task, task_status};
use crate::schema::deliverables;
use crate::state::AppState;
use crate::utils::json::non_empty;
use crate::utils::time::{now, to_iso, to_iso_opt};

#[derive(Deserialize)]
pub struct SubmitDeliverableRequest {
    pub message: Option<String>,
    pub link: Option<String>,
    pub file_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct ReviewDeliverableRequest {
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct DeliverableResponse {
    pub id: Uuid,
    pub task_id: Uuid,
    pub submitted_by: Uuid,
    pub message: Option<String>,
    pub link: Option<String>,
    pub file_id: Option<Uuid>,
    pub file_url: Option<String>,
    pub status: String,
    pub reviewed_by: Option<Uuid>,
    pub review_note: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ReviewResponse {
    pub deliverable: DeliverableResponse,
    pub task_status: String,
    pub brief_status: String,
}

fn to_response(deliverable: Deliverable, file_url: Option<String>) -> DeliverableResponse {
    DeliverableResponse {
        id: deliverable.id,
        task_id: deliverable.task_id,
        submitted_by: deliverable.submitted_by,
        message: deliverable.message,
        link: deliverable.link,
        file_id: deliverable.file_id,
        file_url,
        status: deliverable.status,
        reviewed_by: deliverable.reviewed_by,
        review_note: deliverable.review_note,
        reviewed_at: to_iso_opt(deliverable.reviewed_at),
        created_at: to_iso(deliverable.created_at),
    }
}

fn load_deliverable(conn: &mut PgConnection, deliverable_id: Uuid) -> AppResult<Deliverable> {
    deliverables::table
        .find(deliverable_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("deliverable"))
}

pub async fn submit_deliverable(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<SubmitDeliverableRequest>,
) -> AppResult<(StatusCode, Json<DeliverableResponse>)> {
    let message = non_empty(payload.message);
    let link = non_empty(payload.link);
    if message.is_none() && link.is_none() && payload.file_id.is_none() {
        return Err(AppError::bad_request(
            "a deliverable needs a message, a link or a file",
        ));
    }

    let mut conn = state.db()?;
    let deliverable = conn.transaction::<Deliverable, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let task = load_task(conn, task_id)?;
        if task.assignee_id != caller.id {
            return Err(AppError::forbidden_because(
                "only the assignee can submit deliverables",
            ));
        }
        let brief = load_brief(conn, task.brief_id)?;
        if brief_status(&brief)? == BriefStatus::Archived {
            return Err(AppError::bad_request("brief is archived"));
        }
        let previous = task_status(&task)?;
        if !can_manage_brief(&caller, &brief) {
            if let Some(reason) = assignee_transition_error(previous, TaskStatus::Review) {
                return Err(AppError::forbidden_because(reason));
            }
        }
        if let Some(file_id) = payload.file_id {
            ensure_file_exists(conn, file_id)?;
        }

        let deliverable: Deliverable = diesel::insert_into(deliverables::table)
            .values(&NewDeliverable {
                id: Uuid::new_v4(),
                task_id,
                submitted_by: caller.id,
                message,
                link,
                file_id: payload.file_id,
                status: DeliverableStatus::Pending.as_str().to_string(),
            })
            .get_result(conn)?;

        if previous != TaskStatus::Review {
            apply_task_status(conn, &brief, &task, TaskStatus::Review)?;
        }

        log_activity(
            conn,
            brief.id,
            Some(caller.id),
            ACTIVITY_DELIVERABLE_SUBMITTED,
            json!({
                "deliverable_id": deliverable.id,
                "task_id": task_id,
                "task_status": { "from": previous, "to": TaskStatus::Review },
            }),
        )?;
        notify_user(
            conn,
            task.assigned_by,
            caller.id,
            &Notice::new(
                NotificationType::DeliverableSubmitted,
                "Deliverable submitted",
                format!("{} submitted work for \"{}\"", caller.name, task.title),
            )
            .task(brief.id, task_id),
        )?;

        Ok(deliverable)
    })?;
    let files = match deliverable.file_id {
        Some(file_id) => load_files(&mut conn, &[file_id])?,
        None => Vec::new(),
    };
    drop(conn);

    let urls = presigned_urls(&state, &files).await?;
    info!(deliverable_id = %deliverable.id, task_id = %task_id, "deliverable submitted");
    let file_url = deliverable.file_id.and_then(|id| urls.get(&id).cloned());
    Ok((StatusCode::CREATED, Json(to_response(deliverable, file_url))))
}

pub async fn list_deliverables(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DeliverableResponse>>> {
    let (rows, files) = {
        let mut conn = state.db()?;
        let caller = Caller::resolve(&mut conn, &user)?;
        let task = load_task(&mut conn, task_id)?;
        if task.assignee_id != caller.id {
            load_visible_brief(&mut conn, &caller, task.brief_id)?;
        }

        let rows: Vec<Deliverable> = deliverables::table
            .filter(deliverables::task_id.eq(task_id))
            .order(deliverables::created_at.desc())
            .load(&mut conn)?;
        let file_ids: Vec<Uuid> = rows.iter().filter_map(|d| d.file_id).collect();
        let files = load_files(&mut conn, &file_ids)?;
        (rows, files)
    };

    let urls = presigned_urls(&state, &files).await?;
    Ok(Json(
        rows.into_iter()
            .map(|d| {
                let url = d.file_id.and_then(|id| urls.get(&id).cloned());
                to_response(d, url)
            })
            .collect(),
    ))
}

/// Shared by approve and reject. The deliverable takes the review outcome
/// and never returns to pending. Reviewing an already reviewed deliverable
/// still notifies the submitter.
fn review(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    deliverable_id: Uuid,
    approve: bool,
    note: Option<String>,
) -> AppResult<ReviewResponse> {
    let caller = Caller::resolve(conn, user)?;
    let deliverable = load_deliverable(conn, deliverable_id)?;
    let task = load_task(conn, deliverable.task_id)?;
    let brief = load_brief(conn, task.brief_id)?;
    ensure(can_manage_brief(&caller, &brief))?;
    if brief_status(&brief)? == BriefStatus::Archived {
        return Err(AppError::bad_request("brief is archived"));
    }

    let (deliverable_status, target_task_status) = review_outcome(approve);
    let note = non_empty(note);
    let reviewed: Deliverable = diesel::update(deliverables::table.find(deliverable_id))
        .set((
            deliverables::status.eq(deliverable_status.as_str()),
            deliverables::reviewed_by.eq(Some(caller.id)),
            deliverables::review_note.eq(note.clone()),
            deliverables::reviewed_at.eq(Some(now())),
        ))
        .get_result(conn)?;

    let previous_task_status = task_status(&task)?;
    let (task_now, brief_now) = if previous_task_status != target_task_status {
        let (updated, brief_now, _) = apply_task_status(conn, &brief, &task, target_task_status)?;
        (updated.status, brief_now)
    } else {
        (task.status.clone(), brief_status(&brief)?)
    };

    let (action, kind, title, verb) = if approve {
        (
            ACTIVITY_DELIVERABLE_APPROVED,
            NotificationType::DeliverableApproved,
            "Deliverable approved",
            "approved",
        )
    } else {
        (
            ACTIVITY_DELIVERABLE_REJECTED,
            NotificationType::DeliverableRejected,
            "Deliverable rejected",
            "rejected",
        )
    };

    log_activity(
        conn,
        brief.id,
        Some(caller.id),
        action,
        json!({
            "deliverable_id": deliverable_id,
            "task_id": task.id,
            "previous_status": deliverable.status,
            "note": note,
            "task_status": { "from": previous_task_status, "to": task_now },
            "brief_status": brief_now,
        }),
    )?;
    notify_user(
        conn,
        deliverable.submitted_by,
        caller.id,
        &Notice::new(
            kind,
            title,
            format!("{} {verb} your work on \"{}\"", caller.name, task.title),
        )
        .task(brief.id, task.id),
    )?;

    Ok(ReviewResponse {
        deliverable: to_response(reviewed, None),
        task_status: task_now,
        brief_status: brief_now.as_str().to_string(),
    })
}

pub async fn approve_deliverable(
    State(state): State<AppState>,
    Path(deliverable_id): Path<Uuid>,
    user: AuthenticatedUser,
    payload: Option<Json<ReviewDeliverableRequest>>,
) -> AppResult<Json<ReviewResponse>> {
    let note = payload.and_then(|Json(body)| body.note);
    let mut conn = state.db()?;
    let response =
        conn.transaction::<_, AppError, _>(|conn| review(conn, &user, deliverable_id, true, note))?;

    info!(
        deliverable_id = %deliverable_id,
        brief_status = %response.brief_status,
        "deliverable approved"
    );
    Ok(Json(response))
}

pub async fn reject_deliverable(
    State(state): State<AppState>,
    Path(deliverable_id): Path<Uuid>,
    user: AuthenticatedUser,
    payload: Option<Json<ReviewDeliverableRequest>>,
) -> AppResult<Json<ReviewResponse>> {
    let note = payload.and_then(|Json(body)| body.note);
    let mut conn = state.db()?;
    let response =
        conn.transaction::<_, AppError, _>(|conn| review(conn, &user, deliverable_id, false, note))?;

    info!(deliverable_id = %deliverable_id, "deliverable rejected");
    Ok(Json(response))
}
