use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod brands;
pub mod briefs;
pub mod comments;
pub mod deliverables;
pub mod files;
pub mod health;
pub mod invites;
pub mod jsr;
pub mod messages;
pub mod notifications;
pub mod search;
pub mod tasks;
pub mod teams;
pub mod templates;
pub mod time_entries;
pub mod users;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(err) => {
                        warn!(origin = %value, error = %err, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/accept-invite", post(auth::accept_invite))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let public_routes = Router::new()
        .route("/jsr/:token", get(jsr::get_jsr_by_token))
        .route("/jsr/:token/client-tasks", post(jsr::submit_client_task));

    let users_routes = Router::new()
        .route("/", get(users::list_users))
        .route("/me", patch(users::update_profile))
        .route("/:id", get(users::get_user).delete(users::delete_user))
        .route("/:id/role", patch(users::update_role));

    let invites_routes = Router::new()
        .route("/", get(invites::list_invites).post(invites::create_invite))
        .route("/:id", delete(invites::delete_invite));

    let files_routes = Router::new()
        .route("/", post(files::upload_file))
        .route("/:id", delete(files::delete_file))
        .route("/:id/url", get(files::file_url));

    let brands_routes = Router::new()
        .route("/", get(brands::list_brands).post(brands::create_brand))
        .route(
            "/:id",
            get(brands::get_brand)
                .patch(brands::update_brand)
                .delete(brands::delete_brand),
        )
        .route("/:id/managers", put(brands::set_managers))
        .route(
            "/:id/documents",
            get(brands::list_documents).post(brands::add_document),
        )
        .route(
            "/:id/documents/:document_id",
            delete(brands::delete_document),
        )
        .route(
            "/:id/jsr-link",
            get(jsr::get_jsr_link).post(jsr::generate_jsr_link),
        )
        .route("/:id/client-tasks", get(jsr::list_client_tasks));

    let briefs_routes = Router::new()
        .route("/", get(briefs::list_briefs).post(briefs::create_brief))
        .route("/archived", get(briefs::list_archived_briefs))
        .route("/reorder", post(briefs::reorder_briefs))
        .route(
            "/:id",
            get(briefs::get_brief)
                .patch(briefs::update_brief)
                .delete(briefs::delete_brief),
        )
        .route("/:id/archive", post(briefs::archive_brief))
        .route("/:id/restore", post(briefs::restore_brief))
        .route("/:id/teams", put(briefs::set_brief_teams))
        .route("/:id/activity", get(briefs::brief_activity))
        .route(
            "/:id/tasks",
            get(tasks::list_brief_tasks).post(tasks::create_task),
        )
        .route("/:id/tasks/reorder", post(tasks::reorder_tasks))
        .route(
            "/:id/comments",
            get(comments::list_comments).post(comments::create_comment),
        );

    let tasks_routes = Router::new()
        .route("/mine", get(tasks::my_tasks))
        .route(
            "/:id",
            get(tasks::get_task)
                .patch(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/:id/status", patch(tasks::update_task_status))
        .route("/:id/dependencies", put(tasks::set_dependencies))
        .route(
            "/:id/deliverables",
            get(deliverables::list_deliverables).post(deliverables::submit_deliverable),
        );

    let deliverables_routes = Router::new()
        .route("/:id/approve", post(deliverables::approve_deliverable))
        .route("/:id/reject", post(deliverables::reject_deliverable));

    let comments_routes = Router::new().route(
        "/:id",
        patch(comments::update_comment).delete(comments::delete_comment),
    );

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/unread-count", get(notifications::unread_count))
        .route("/read-all", post(notifications::mark_all_read))
        .route("/:id", delete(notifications::delete_notification))
        .route("/:id/read", post(notifications::mark_read));

    let teams_routes = Router::new()
        .route("/", get(teams::list_teams).post(teams::create_team))
        .route(
            "/:id",
            patch(teams::update_team).delete(teams::delete_team),
        )
        .route("/:id/members", put(teams::set_members))
        .route("/:id/members/:user_id", delete(teams::remove_member));

    let messages_routes = Router::new()
        .route("/", post(messages::send_message))
        .route("/conversations", get(messages::list_conversations))
        .route("/with/:user_id", get(messages::thread))
        .route("/with/:user_id/read", post(messages::mark_thread_read));

    let time_routes = Router::new()
        .route(
            "/",
            get(time_entries::list_entries).post(time_entries::create_manual_entry),
        )
        .route("/start", post(time_entries::start_timer))
        .route("/stop", post(time_entries::stop_timer))
        .route("/active", get(time_entries::active_timer))
        .route("/:id", delete(time_entries::delete_entry));

    let templates_routes = Router::new()
        .route(
            "/",
            get(templates::list_templates).post(templates::create_template),
        )
        .route("/:id", delete(templates::delete_template))
        .route("/:id/instantiate", post(templates::instantiate_template));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/invites", invites_routes)
        .nest("/api/files", files_routes)
        .nest("/api/brands", brands_routes)
        .nest("/api/briefs", briefs_routes)
        .nest("/api/tasks", tasks_routes)
        .nest("/api/deliverables", deliverables_routes)
        .nest("/api/comments", comments_routes)
        .nest("/api/notifications", notifications_routes)
        .nest("/api/teams", teams_routes)
        .nest("/api/messages", messages_routes)
        .nest("/api/time-entries", time_routes)
        .nest("/api/templates", templates_routes)
        .route("/api/jsr-links/:id/deactivate", post(jsr::deactivate_jsr_link))
        .route("/api/client-tasks/:id", patch(jsr::update_client_task))
        .route("/api/search", get(search::search))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/public", public_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
