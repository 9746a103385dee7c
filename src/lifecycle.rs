//! Brief, task and deliverable status vocabularies and the transition rules
//! shared by every handler that touches them.

use uuid::Uuid;

use crate::models::Task;
use crate::utils::string_enum::string_enum;

string_enum! {
    pub enum BriefStatus {
        Draft => "draft",
        Active => "active",
        InProgress => "in-progress",
        Review => "review",
        Completed => "completed",
        Archived => "archived",
    }
}

string_enum! {
    pub enum TaskStatus {
        Pending => "pending",
        InProgress => "in-progress",
        Review => "review",
        Done => "done",
    }
}

string_enum! {
    pub enum DeliverableStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl BriefStatus {
    /// Briefs in these states are closed to automatic transitions, reminders
    /// and the team delete guard.
    pub const CLOSED: [BriefStatus; 2] = [BriefStatus::Completed, BriefStatus::Archived];

    pub fn is_closed(self) -> bool {
        Self::CLOSED.contains(&self)
    }

    /// Stored values of [`BriefStatus::CLOSED`], for `ne_all` filters.
    pub fn closed_values() -> Vec<&'static str> {
        Self::CLOSED.iter().map(|status| status.as_str()).collect()
    }
}

/// Rejects manual status edits that must go through a dedicated operation.
pub fn check_manual_brief_transition(
    from: BriefStatus,
    to: BriefStatus,
) -> Result<(), &'static str> {
    if to == BriefStatus::Archived {
        return Err("use the archive operation to archive a brief");
    }
    if from == BriefStatus::Archived {
        return Err("archived briefs must be restored before changing status");
    }
    Ok(())
}

/// Task statuses of a brief as they will be once `updated` moves to
/// `new_status`. The stored row for `updated` is stale inside the writing
/// transaction, so it is substituted rather than re-read.
pub fn prospective_statuses(tasks: &[Task], updated: Uuid, new_status: TaskStatus) -> Vec<TaskStatus> {
    tasks
        .iter()
        .map(|task| {
            if task.id == updated {
                new_status
            } else {
                TaskStatus::parse(&task.status).unwrap_or(TaskStatus::Pending)
            }
        })
        .collect()
}

/// Brief status implied by a task moving to `changed_to`, if it differs from
/// the current one.
///
/// Every task done moves the brief to review. The first task picked up moves
/// a draft or active brief to in-progress. Nothing is reverted when a task
/// leaves done.
pub fn next_brief_status(
    current: BriefStatus,
    statuses: &[TaskStatus],
    changed_to: TaskStatus,
) -> Option<BriefStatus> {
    if current.is_closed() {
        return None;
    }

    let all_done = !statuses.is_empty() && statuses.iter().all(|s| *s == TaskStatus::Done);
    if all_done {
        return (current != BriefStatus::Review).then_some(BriefStatus::Review);
    }

    if changed_to == TaskStatus::InProgress
        && matches!(current, BriefStatus::Draft | BriefStatus::Active)
    {
        return Some(BriefStatus::InProgress);
    }

    None
}

/// Why a task status change is refused for a caller who is the assignee but
/// does not manage the brief.
pub fn assignee_transition_error(from: TaskStatus, to: TaskStatus) -> Option<&'static str> {
    if to == TaskStatus::Done {
        return Some("employees cannot mark tasks done");
    }
    if from == TaskStatus::Done {
        return Some("completed tasks can only be reopened by a manager");
    }
    None
}

/// Outcome of reviewing a deliverable: its new status and the status the
/// parent task moves to. A reviewed deliverable never returns to pending.
pub fn review_outcome(approve: bool) -> (DeliverableStatus, TaskStatus) {
    if approve {
        (DeliverableStatus::Approved, TaskStatus::Done)
    } else {
        (DeliverableStatus::Rejected, TaskStatus::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::now;

    fn task(status: TaskStatus) -> Task {
        let ts = now();
        Task {
            id: Uuid::new_v4(),
            brief_id: Uuid::new_v4(),
            title: "t".into(),
            description: None,
            assignee_id: Uuid::new_v4(),
            assigned_by: Uuid::new_v4(),
            status: status.as_str().to_string(),
            sort_order: 1000,
            duration_minutes: 60,
            deadline: None,
            completed_at: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn status_strings_round_trip() {
        assert_eq!(BriefStatus::parse("in-progress"), Some(BriefStatus::InProgress));
        assert_eq!(TaskStatus::Done.as_str(), "done");
        assert_eq!(BriefStatus::parse("in_progress"), None);
    }

    #[test]
    fn only_completed_and_archived_briefs_are_closed() {
        assert_eq!(BriefStatus::closed_values(), vec!["completed", "archived"]);
        assert!(BriefStatus::Archived.is_closed());
        assert!(!BriefStatus::Review.is_closed());
    }

    #[test]
    fn last_task_done_moves_brief_to_review() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Review)];
        let statuses = prospective_statuses(&tasks, tasks[1].id, TaskStatus::Done);
        assert_eq!(
            next_brief_status(BriefStatus::InProgress, &statuses, TaskStatus::Done),
            Some(BriefStatus::Review)
        );
    }

    #[test]
    fn stale_row_is_replaced_by_prospective_status() {
        let tasks = vec![task(TaskStatus::Done)];
        let statuses = prospective_statuses(&tasks, tasks[0].id, TaskStatus::InProgress);
        assert_eq!(statuses, vec![TaskStatus::InProgress]);
        assert_eq!(
            next_brief_status(BriefStatus::Review, &statuses, TaskStatus::InProgress),
            None
        );
    }

    #[test]
    fn partial_completion_does_not_move_to_review() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Pending)];
        let statuses = prospective_statuses(&tasks, tasks[0].id, TaskStatus::Done);
        assert_eq!(
            next_brief_status(BriefStatus::InProgress, &statuses, TaskStatus::Done),
            None
        );
    }

    #[test]
    fn closed_briefs_are_never_moved() {
        let statuses = vec![TaskStatus::Done];
        assert_eq!(
            next_brief_status(BriefStatus::Archived, &statuses, TaskStatus::Done),
            None
        );
        assert_eq!(
            next_brief_status(BriefStatus::Completed, &statuses, TaskStatus::Done),
            None
        );
    }

    #[test]
    fn first_pickup_starts_a_draft_brief() {
        let statuses = vec![TaskStatus::InProgress, TaskStatus::Pending];
        assert_eq!(
            next_brief_status(BriefStatus::Draft, &statuses, TaskStatus::InProgress),
            Some(BriefStatus::InProgress)
        );
        assert_eq!(
            next_brief_status(BriefStatus::Review, &statuses, TaskStatus::InProgress),
            None
        );
    }

    #[test]
    fn archive_and_restore_are_not_manual_transitions() {
        assert!(check_manual_brief_transition(BriefStatus::Active, BriefStatus::Archived).is_err());
        assert!(check_manual_brief_transition(BriefStatus::Archived, BriefStatus::Draft).is_err());
        assert!(check_manual_brief_transition(BriefStatus::Review, BriefStatus::Completed).is_ok());
    }

    #[test]
    fn assignees_cannot_finish_or_reopen() {
        assert_eq!(
            assignee_transition_error(TaskStatus::Review, TaskStatus::Done),
            Some("employees cannot mark tasks done")
        );
        assert!(assignee_transition_error(TaskStatus::Done, TaskStatus::InProgress).is_some());
        assert!(assignee_transition_error(TaskStatus::Pending, TaskStatus::InProgress).is_none());
    }

    #[test]
    fn rejection_reopens_to_in_progress() {
        assert_eq!(
            review_outcome(false),
            (DeliverableStatus::Rejected, TaskStatus::InProgress)
        );
        assert_eq!(
            review_outcome(true),
            (DeliverableStatus::Approved, TaskStatus::Done)
        );
    }
}
