use std::collections::HashSet;

use diesel::{prelude::*, PgConnection};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{NewActivityLog, NewNotification};
use crate::schema::{activity_logs, notifications};
use crate::utils::string_enum::string_enum;

string_enum! {
    pub enum NotificationType {
        BriefAssigned => "brief_assigned",
        TaskAssigned => "task_assigned",
        TaskUnassigned => "task_unassigned",
        TaskStatusChanged => "task_status_changed",
        DeliverableSubmitted => "deliverable_submitted",
        DeliverableApproved => "deliverable_approved",
        DeliverableRejected => "deliverable_rejected",
        CommentAdded => "comment_added",
        DirectMessage => "direct_message",
        TaskDeadlineSoon => "task_deadline_soon",
        TaskOverdue => "task_overdue",
        BriefDeadlineSoon => "brief_deadline_soon",
        ClientTaskSubmitted => "client_task_submitted",
    }
}

pub const ACTIVITY_BRIEF_CREATED: &str = "brief_created";
pub const ACTIVITY_BRIEF_UPDATED: &str = "brief_updated";
pub const ACTIVITY_BRIEF_STATUS_CHANGED: &str = "brief_status_changed";
pub const ACTIVITY_BRIEF_ARCHIVED: &str = "brief_archived";
pub const ACTIVITY_BRIEF_RESTORED: &str = "brief_restored";
pub const ACTIVITY_BRIEF_TEAMS_CHANGED: &str = "brief_teams_changed";
pub const ACTIVITY_TASK_CREATED: &str = "task_created";
pub const ACTIVITY_TASK_UPDATED: &str = "task_updated";
pub const ACTIVITY_TASK_STATUS_CHANGED: &str = "task_status_changed";
pub const ACTIVITY_TASK_DELETED: &str = "task_deleted";
pub const ACTIVITY_TASKS_REORDERED: &str = "tasks_reordered";
pub const ACTIVITY_DEPENDENCIES_CHANGED: &str = "task_dependencies_changed";
pub const ACTIVITY_DELIVERABLE_SUBMITTED: &str = "deliverable_submitted";
pub const ACTIVITY_DELIVERABLE_APPROVED: &str = "deliverable_approved";
pub const ACTIVITY_DELIVERABLE_REJECTED: &str = "deliverable_rejected";
pub const ACTIVITY_COMMENT_ADDED: &str = "comment_added";
pub const ACTIVITY_COMMENT_UPDATED: &str = "comment_updated";
pub const ACTIVITY_COMMENT_DELETED: &str = "comment_deleted";

/// Deduplicated notification targets. The acting user is never included.
#[derive(Debug, Default)]
pub struct Recipients {
    actor: Option<Uuid>,
    seen: HashSet<Uuid>,
    ordered: Vec<Uuid>,
}

impl Recipients {
    pub fn excluding(actor: Option<Uuid>) -> Self {
        Self {
            actor,
            ..Self::default()
        }
    }

    pub fn add(&mut self, user_id: Uuid) -> &mut Self {
        if self.actor != Some(user_id) && self.seen.insert(user_id) {
            self.ordered.push(user_id);
        }
        self
    }

    pub fn extend<I: IntoIterator<Item = Uuid>>(&mut self, ids: I) -> &mut Self {
        for id in ids {
            self.add(id);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ordered
    }
}

pub struct Notice {
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub brief_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
}

impl Notice {
    pub fn new(kind: NotificationType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            brief_id: None,
            task_id: None,
        }
    }

    pub fn brief(mut self, brief_id: Uuid) -> Self {
        self.brief_id = Some(brief_id);
        self
    }

    pub fn task(mut self, brief_id: Uuid, task_id: Uuid) -> Self {
        self.brief_id = Some(brief_id);
        self.task_id = Some(task_id);
        self
    }
}

/// Inserts one notification row per recipient.
pub fn notify(
    conn: &mut PgConnection,
    recipients: &Recipients,
    triggered_by: Option<Uuid>,
    notice: &Notice,
) -> QueryResult<usize> {
    if recipients.is_empty() {
        return Ok(0);
    }

    let rows: Vec<NewNotification> = recipients
        .ids()
        .iter()
        .map(|recipient| NewNotification {
            id: Uuid::new_v4(),
            recipient_id: *recipient,
            notification_type: notice.kind.as_str().to_string(),
            title: notice.title.clone(),
            message: notice.message.clone(),
            triggered_by,
            brief_id: notice.brief_id,
            task_id: notice.task_id,
        })
        .collect();

    diesel::insert_into(notifications::table)
        .values(&rows)
        .execute(conn)
}

/// Notifies a single user unless they are the actor.
pub fn notify_user(
    conn: &mut PgConnection,
    recipient: Uuid,
    actor: Uuid,
    notice: &Notice,
) -> QueryResult<usize> {
    let mut recipients = Recipients::excluding(Some(actor));
    recipients.add(recipient);
    notify(conn, &recipients, Some(actor), notice)
}

/// Appends the audit row for one logical action.
pub fn log_activity(
    conn: &mut PgConnection,
    brief_id: Uuid,
    actor_id: Option<Uuid>,
    action: &str,
    details: Value,
) -> QueryResult<()> {
    let row = NewActivityLog {
        id: Uuid::new_v4(),
        brief_id,
        actor_id,
        action: action.to_string(),
        details,
    };
    diesel::insert_into(activity_logs::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}
