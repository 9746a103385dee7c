//! Public share links ("JSR"): token format, client task vocabulary and the
//! combined status summary shown to external clients.

use chrono::NaiveDateTime;
use rand::Rng;
use serde::Serialize;

use crate::lifecycle::TaskStatus;
use crate::utils::string_enum::string_enum;

pub const TOKEN_LENGTH: usize = 24;
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

string_enum! {
    pub enum ClientTaskStatus {
        PendingReview => "pending_review",
        Accepted => "accepted",
        InProgress => "in_progress",
        Completed => "completed",
        Declined => "declined",
    }
}

pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.bytes().all(|b| TOKEN_ALPHABET.contains(&b))
}

/// Internal bucket a client task counts toward. Requests not yet accepted
/// and declined requests are left out of the combined counts.
pub fn client_bucket(status: ClientTaskStatus) -> Option<TaskStatus> {
    match status {
        ClientTaskStatus::Accepted => Some(TaskStatus::Pending),
        ClientTaskStatus::InProgress => Some(TaskStatus::InProgress),
        ClientTaskStatus::Completed => Some(TaskStatus::Done),
        ClientTaskStatus::PendingReview | ClientTaskStatus::Declined => None,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: usize,
    pub in_progress: usize,
    pub review: usize,
    pub done: usize,
    pub total: usize,
    pub percent_done: u8,
}

impl StatusSummary {
    /// Counts for internal tasks only, as shown on brief listings.
    pub fn of_tasks<I: IntoIterator<Item = TaskStatus>>(statuses: I) -> Self {
        summarize(statuses, std::iter::empty())
    }

    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Review => self.review += 1,
            TaskStatus::Done => self.done += 1,
        }
        self.total += 1;
    }
}

pub fn summarize<I, C>(internal: I, client: C) -> StatusSummary
where
    I: IntoIterator<Item = TaskStatus>,
    C: IntoIterator<Item = ClientTaskStatus>,
{
    let mut summary = StatusSummary::default();
    for status in internal {
        summary.record(status);
    }
    for status in client.into_iter().filter_map(client_bucket) {
        summary.record(status);
    }
    if summary.total > 0 {
        summary.percent_done = ((summary.done * 100) / summary.total) as u8;
    }
    summary
}

/// Latest of all known deadlines; `None` only when neither side has one.
pub fn overall_deadline<I, C>(task_deadlines: I, client_deadlines: C) -> Option<NaiveDateTime>
where
    I: IntoIterator<Item = Option<NaiveDateTime>>,
    C: IntoIterator<Item = Option<NaiveDateTime>>,
{
    let internal = task_deadlines.into_iter().flatten().max();
    let client = client_deadlines.into_iter().flatten().max();
    internal.max(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn day(n: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, n)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn tokens_are_24_lowercase_alphanumerics() {
        for _ in 0..50 {
            let token = generate_token();
            assert_eq!(token.len(), 24);
            assert!(token
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
            assert!(is_well_formed_token(&token));
        }
        assert!(!is_well_formed_token("ABCDEFGHIJKLMNOPQRSTUVWX"));
        assert!(!is_well_formed_token("short"));
    }

    #[test]
    fn client_statuses_collapse_into_internal_buckets() {
        let summary = summarize(
            [TaskStatus::Done, TaskStatus::Review],
            [
                ClientTaskStatus::Accepted,
                ClientTaskStatus::InProgress,
                ClientTaskStatus::Completed,
                ClientTaskStatus::PendingReview,
                ClientTaskStatus::Declined,
            ],
        );
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.in_progress, 1);
        assert_eq!(summary.review, 1);
        assert_eq!(summary.done, 2);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.percent_done, 40);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let summary = summarize(Vec::new(), Vec::new());
        assert_eq!(summary, StatusSummary::default());
    }

    #[test]
    fn internal_only_summary_rounds_down() {
        let summary =
            StatusSummary::of_tasks([TaskStatus::Done, TaskStatus::Pending, TaskStatus::Pending]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.percent_done, 33);
    }

    #[test]
    fn overall_deadline_takes_the_latest_of_both_sides() {
        let tasks = [Some(day(3)), None, Some(day(10))];
        let client = [Some(day(7)), Some(day(12))];
        assert_eq!(overall_deadline(tasks, client), Some(day(12)));

        let later_internal = [Some(day(20))];
        assert_eq!(overall_deadline(later_internal, [Some(day(1))]), Some(day(20)));
    }

    #[test]
    fn overall_deadline_uses_whichever_side_exists() {
        assert_eq!(overall_deadline([Some(day(2))], []), Some(day(2)));
        assert_eq!(overall_deadline([None], [Some(day(4))]), Some(day(4)));
        assert_eq!(overall_deadline([None, None], [None]), None);
        assert_eq!(
            overall_deadline([Some(day(1) + Duration::hours(1))], [Some(day(1))]),
            Some(day(1) + Duration::hours(1))
        );
    }
}
