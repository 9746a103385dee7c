//! Deadline reminder sweep run by the background worker.
//!
//! There is no persisted "last sent" marker: a reminder is suppressed when the
//! recipient already holds a notification of the same type for the same task
//! (or brief) created inside the trailing window.

use chrono::{Duration, NaiveDateTime};
use diesel::{prelude::*, PgConnection};
use uuid::Uuid;

use crate::fanout::{notify, Notice, NotificationType, Recipients};
use crate::lifecycle::{BriefStatus, TaskStatus};
use crate::models::{Brief, Task};
use crate::schema::{briefs, notifications, tasks};

pub const LOOKAHEAD_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub recipient: Uuid,
    pub kind: NotificationType,
    pub brief_id: Uuid,
    pub task_id: Option<Uuid>,
    pub title: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderReport {
    pub sent: usize,
    pub suppressed: usize,
}

pub fn dedupe_window(kind: NotificationType) -> Duration {
    match kind {
        NotificationType::TaskDeadlineSoon => Duration::hours(12),
        _ => Duration::hours(24),
    }
}

/// Plans reminders for tasks paired with the stored status of their brief.
/// Tasks of completed or archived briefs are left alone.
pub fn plan_task_reminders(tasks: &[(Task, String)], now: NaiveDateTime) -> Vec<Reminder> {
    let horizon = now + Duration::hours(LOOKAHEAD_HOURS);
    let mut planned = Vec::new();

    for (task, brief_status) in tasks {
        let Some(deadline) = task.deadline else {
            continue;
        };
        if TaskStatus::parse(&task.status) == Some(TaskStatus::Done) {
            continue;
        }
        if BriefStatus::parse(brief_status).is_some_and(BriefStatus::is_closed) {
            continue;
        }

        if deadline < now {
            let mut recipients = Recipients::excluding(None);
            recipients.add(task.assignee_id).add(task.assigned_by);
            for recipient in recipients.ids() {
                planned.push(Reminder {
                    recipient: *recipient,
                    kind: NotificationType::TaskOverdue,
                    brief_id: task.brief_id,
                    task_id: Some(task.id),
                    title: task.title.clone(),
                });
            }
        } else if deadline <= horizon {
            planned.push(Reminder {
                recipient: task.assignee_id,
                kind: NotificationType::TaskDeadlineSoon,
                brief_id: task.brief_id,
                task_id: Some(task.id),
                title: task.title.clone(),
            });
        }
    }

    planned
}

pub fn plan_brief_reminders(briefs: &[Brief], now: NaiveDateTime) -> Vec<Reminder> {
    let horizon = now + Duration::hours(LOOKAHEAD_HOURS);

    briefs
        .iter()
        .filter(|brief| {
            let open = !matches!(
                BriefStatus::parse(&brief.status),
                Some(BriefStatus::Review | BriefStatus::Completed | BriefStatus::Archived)
            );
            let due_soon = brief
                .deadline
                .map(|deadline| deadline >= now && deadline <= horizon)
                .unwrap_or(false);
            open && due_soon
        })
        .filter_map(|brief| {
            brief.assigned_manager_id.map(|manager| Reminder {
                recipient: manager,
                kind: NotificationType::BriefDeadlineSoon,
                brief_id: brief.id,
                task_id: None,
                title: brief.title.clone(),
            })
        })
        .collect()
}

fn already_sent(conn: &mut PgConnection, reminder: &Reminder, now: NaiveDateTime) -> QueryResult<bool> {
    let since = now - dedupe_window(reminder.kind);
    let query = notifications::table
        .filter(notifications::recipient_id.eq(reminder.recipient))
        .filter(notifications::notification_type.eq(reminder.kind.as_str()))
        .filter(notifications::created_at.gt(since))
        .select(notifications::id)
        .into_boxed();

    let query = match reminder.task_id {
        Some(task_id) => query.filter(notifications::task_id.eq(task_id)),
        None => query
            .filter(notifications::brief_id.eq(reminder.brief_id))
            .filter(notifications::task_id.is_null()),
    };

    Ok(query.first::<Uuid>(conn).optional()?.is_some())
}

fn notice_for(reminder: &Reminder) -> Notice {
    let (title, message) = match reminder.kind {
        NotificationType::TaskOverdue => (
            "Task overdue",
            format!("\"{}\" is past its deadline", reminder.title),
        ),
        NotificationType::BriefDeadlineSoon => (
            "Brief due soon",
            format!("\"{}\" is due within {LOOKAHEAD_HOURS} hours", reminder.title),
        ),
        _ => (
            "Task due soon",
            format!("\"{}\" is due within {LOOKAHEAD_HOURS} hours", reminder.title),
        ),
    };

    let notice = Notice::new(reminder.kind, title, message);
    match reminder.task_id {
        Some(task_id) => notice.task(reminder.brief_id, task_id),
        None => notice.brief(reminder.brief_id),
    }
}

pub fn send_deadline_reminders(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<ReminderReport> {
    let horizon = now + Duration::hours(LOOKAHEAD_HOURS);

    conn.transaction(|conn| {
        let due_tasks: Vec<(Task, String)> = tasks::table
            .inner_join(briefs::table)
            .filter(tasks::status.ne(TaskStatus::Done.as_str()))
            .filter(tasks::deadline.is_not_null())
            .filter(tasks::deadline.le(horizon))
            .select((tasks::all_columns, briefs::status))
            .load(conn)?;
        let due_briefs: Vec<Brief> = briefs::table
            .filter(briefs::deadline.ge(now))
            .filter(briefs::deadline.le(horizon))
            .load(conn)?;

        let mut planned = plan_task_reminders(&due_tasks, now);
        planned.extend(plan_brief_reminders(&due_briefs, now));

        let mut report = ReminderReport::default();
        for reminder in &planned {
            if already_sent(conn, reminder, now)? {
                report.suppressed += 1;
                continue;
            }
            let mut recipients = Recipients::excluding(None);
            recipients.add(reminder.recipient);
            notify(conn, &recipients, None, &notice_for(reminder))?;
            report.sent += 1;
        }

        Ok(report)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::now;

    fn task(deadline: Option<NaiveDateTime>, status: TaskStatus, same_person: bool) -> Task {
        let ts = now();
        let assignee = Uuid::new_v4();
        Task {
            id: Uuid::new_v4(),
            brief_id: Uuid::new_v4(),
            title: "Design banner".into(),
            description: None,
            assignee_id: assignee,
            assigned_by: if same_person { assignee } else { Uuid::new_v4() },
            status: status.as_str().into(),
            sort_order: 1000,
            duration_minutes: 120,
            deadline,
            completed_at: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn in_open_brief(task: Task) -> (Task, String) {
        (task, BriefStatus::InProgress.as_str().to_string())
    }

    fn brief(deadline: Option<NaiveDateTime>, status: BriefStatus, manager: Option<Uuid>) -> Brief {
        let ts = now();
        Brief {
            id: Uuid::new_v4(),
            title: "Launch".into(),
            description: None,
            status: status.as_str().into(),
            assigned_manager_id: manager,
            global_priority: 1,
            deadline,
            brand_id: None,
            created_by: Uuid::new_v4(),
            archived_at: None,
            archived_by: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn windows_match_reminder_kind() {
        assert_eq!(dedupe_window(NotificationType::TaskDeadlineSoon), Duration::hours(12));
        assert_eq!(dedupe_window(NotificationType::TaskOverdue), Duration::hours(24));
        assert_eq!(dedupe_window(NotificationType::BriefDeadlineSoon), Duration::hours(24));
    }

    #[test]
    fn upcoming_task_reminds_assignee_only() {
        let now = now();
        let t = task(Some(now + Duration::hours(5)), TaskStatus::InProgress, false);
        let planned = plan_task_reminders(&[in_open_brief(t.clone())], now);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].recipient, t.assignee_id);
        assert_eq!(planned[0].kind, NotificationType::TaskDeadlineSoon);
    }

    #[test]
    fn overdue_task_reminds_assignee_and_assigner_once_each() {
        let now = now();
        let t = task(Some(now - Duration::hours(1)), TaskStatus::Pending, false);
        let planned = plan_task_reminders(&[in_open_brief(t.clone())], now);
        let recipients: Vec<Uuid> = planned.iter().map(|r| r.recipient).collect();
        assert_eq!(recipients, vec![t.assignee_id, t.assigned_by]);

        let self_assigned = task(Some(now - Duration::hours(1)), TaskStatus::Pending, true);
        assert_eq!(plan_task_reminders(&[in_open_brief(self_assigned)], now).len(), 1);
    }

    #[test]
    fn done_and_distant_tasks_are_skipped() {
        let now = now();
        let done = task(Some(now - Duration::hours(3)), TaskStatus::Done, false);
        let distant = task(Some(now + Duration::days(3)), TaskStatus::Pending, false);
        let undated = task(None, TaskStatus::Pending, false);
        let tasks: Vec<_> = [done, distant, undated].into_iter().map(in_open_brief).collect();
        assert!(plan_task_reminders(&tasks, now).is_empty());
    }

    #[test]
    fn tasks_of_closed_briefs_are_never_overdue() {
        let now = now();
        let overdue = task(Some(now - Duration::days(4)), TaskStatus::InProgress, false);
        let tasks = vec![
            (overdue.clone(), BriefStatus::Archived.as_str().to_string()),
            (overdue.clone(), BriefStatus::Completed.as_str().to_string()),
        ];
        assert!(plan_task_reminders(&tasks, now).is_empty());

        let reviewing = vec![(overdue, BriefStatus::Review.as_str().to_string())];
        assert_eq!(plan_task_reminders(&reviewing, now).len(), 2);
    }

    #[test]
    fn brief_reminders_need_a_manager_and_an_open_status() {
        let now = now();
        let manager = Uuid::new_v4();
        let soon = Some(now + Duration::hours(2));
        let briefs = vec![
            brief(soon, BriefStatus::Active, Some(manager)),
            brief(soon, BriefStatus::Review, Some(manager)),
            brief(soon, BriefStatus::Active, None),
            brief(Some(now + Duration::days(2)), BriefStatus::Active, Some(manager)),
        ];
        let planned = plan_brief_reminders(&briefs, now);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].brief_id, briefs[0].id);
        assert_eq!(planned[0].task_id, None);
    }
}
