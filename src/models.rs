use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub designation: Option<String>,
    pub avatar_file_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub designation: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = invites)]
pub struct Invite {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub token_hash: String,
    pub invited_by: Uuid,
    pub accepted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = invites)]
pub struct NewInvite {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub token_hash: String,
    pub invited_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = stored_files)]
pub struct StoredFile {
    pub id: Uuid,
    pub storage_key: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub uploaded_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = stored_files)]
pub struct NewStoredFile {
    pub id: Uuid,
    pub storage_key: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub uploaded_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = brands)]
pub struct Brand {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = brands)]
pub struct NewBrand {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = brand_managers)]
pub struct NewBrandManager {
    pub brand_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = brand_documents)]
#[diesel(belongs_to(Brand))]
pub struct BrandDocument {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub file_id: Uuid,
    pub name: String,
    pub uploaded_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = brand_documents)]
pub struct NewBrandDocument {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub file_id: Uuid,
    pub name: String,
    pub uploaded_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = teams)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = teams)]
pub struct NewTeam {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub created_by: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_teams)]
pub struct NewUserTeam {
    pub user_id: Uuid,
    pub team_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = briefs)]
pub struct Brief {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub assigned_manager_id: Option<Uuid>,
    pub global_priority: i32,
    pub deadline: Option<NaiveDateTime>,
    pub brand_id: Option<Uuid>,
    pub created_by: Uuid,
    pub archived_at: Option<NaiveDateTime>,
    pub archived_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = briefs)]
pub struct NewBrief {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub assigned_manager_id: Option<Uuid>,
    pub global_priority: i32,
    pub deadline: Option<NaiveDateTime>,
    pub brand_id: Option<Uuid>,
    pub created_by: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = brief_teams)]
pub struct NewBriefTeam {
    pub brief_id: Uuid,
    pub team_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = tasks)]
#[diesel(belongs_to(Brief))]
pub struct Task {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Uuid,
    pub assigned_by: Uuid,
    pub status: String,
    pub sort_order: i32,
    pub duration_minutes: i32,
    pub deadline: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Uuid,
    pub assigned_by: Uuid,
    pub status: String,
    pub sort_order: i32,
    pub duration_minutes: i32,
    pub deadline: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = task_dependencies)]
pub struct NewTaskDependency {
    pub task_id: Uuid,
    pub blocked_by_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = deliverables)]
#[diesel(belongs_to(Task))]
pub struct Deliverable {
    pub id: Uuid,
    pub task_id: Uuid,
    pub submitted_by: Uuid,
    pub message: Option<String>,
    pub link: Option<String>,
    pub file_id: Option<Uuid>,
    pub status: String,
    pub reviewed_by: Option<Uuid>,
    pub review_note: Option<String>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deliverables)]
pub struct NewDeliverable {
    pub id: Uuid,
    pub task_id: Uuid,
    pub submitted_by: Uuid,
    pub message: Option<String>,
    pub link: Option<String>,
    pub file_id: Option<Uuid>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub task_id: Option<Uuid>,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub task_id: Option<Uuid>,
    pub author_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub triggered_by: Option<Uuid>,
    pub brief_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub triggered_by: Option<Uuid>,
    pub brief_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = activity_logs)]
#[diesel(belongs_to(Brief))]
pub struct ActivityLog {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = activity_logs)]
pub struct NewActivityLog {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = direct_messages)]
pub struct DirectMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub file_id: Option<Uuid>,
    pub read_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = direct_messages)]
pub struct NewDirectMessage {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub file_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = time_entries)]
pub struct TimeEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub brief_id: Option<Uuid>,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub duration_minutes: Option<i32>,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = time_entries)]
pub struct NewTimeEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub brief_id: Option<Uuid>,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub duration_minutes: Option<i32>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = brief_templates)]
pub struct BriefTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tasks: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = brief_templates)]
pub struct NewBriefTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tasks: serde_json::Value,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jsr_links)]
pub struct JsrLink {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub token: String,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub deactivated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jsr_links)]
pub struct NewJsrLink {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub token: String,
    pub is_active: bool,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jsr_client_tasks)]
pub struct JsrClientTask {
    pub id: Uuid,
    pub jsr_link_id: Uuid,
    pub brand_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub requested_deadline: Option<NaiveDateTime>,
    pub final_deadline: Option<NaiveDateTime>,
    pub status: String,
    pub brief_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jsr_client_tasks)]
pub struct NewJsrClientTask {
    pub id: Uuid,
    pub jsr_link_id: Uuid,
    pub brand_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub requested_deadline: Option<NaiveDateTime>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
