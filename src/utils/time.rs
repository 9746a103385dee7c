use chrono::{DateTime, NaiveDateTime, Utc};

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

pub fn to_iso_opt(dt: Option<NaiveDateTime>) -> Option<String> {
    dt.map(to_iso)
}

/// Whole minutes between two instants, never negative.
pub fn elapsed_minutes(started_at: NaiveDateTime, ended_at: NaiveDateTime) -> i32 {
    let minutes = (ended_at - started_at).num_minutes().max(0);
    i32::try_from(minutes).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn elapsed_minutes_truncates_partial_minutes() {
        let start = now();
        assert_eq!(elapsed_minutes(start, start + Duration::seconds(119)), 1);
        assert_eq!(elapsed_minutes(start, start + Duration::minutes(90)), 90);
    }

    #[test]
    fn elapsed_minutes_clamps_clock_skew() {
        let start = now();
        assert_eq!(elapsed_minutes(start, start - Duration::minutes(5)), 0);
    }

    #[test]
    fn iso_output_is_utc() {
        let dt = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .naive_utc();
        assert_eq!(to_iso(dt), "2025-03-01T10:00:00+00:00");
    }
}
