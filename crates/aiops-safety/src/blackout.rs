use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

use aiops_persistence::models::BlackoutWindow;
use aiops_types::{AppliesTo, Recurrence};

/// spec.md §4.6 step 3. `runbook_id` is used only for `applies_to =
/// auto_only`'s narrower targeting list; pass `None` for manual executions,
/// which are always exempt from that list-based restriction but still
/// subject to a window whose `applies_to = all`.
pub fn is_active(window: &BlackoutWindow, now: DateTime<Utc>, runbook_id: Option<&str>) -> bool {
    if !window.enabled {
        return false;
    }
    if window.applies_to == AppliesTo::AutoOnly {
        if let Some(id) = runbook_id {
            if !window.applies_to_runbook_ids.is_empty()
                && !window.applies_to_runbook_ids.iter().any(|r| r == id)
            {
                return false;
            }
        }
    }

    match window.recurrence {
        Recurrence::Once => match (window.start_time, window.end_time) {
            (Some(start), Some(end)) => now >= start && now <= end,
            _ => false,
        },
        Recurrence::Daily => in_daily_window(window, now),
        Recurrence::Weekly => {
            in_daily_window(window, now) && {
                let weekday = local_time(window, now).weekday().num_days_from_sunday() as i64;
                window.days_of_week.contains(&weekday)
            }
        }
        Recurrence::Monthly => {
            in_daily_window(window, now) && {
                let day = local_time(window, now).day() as i64;
                window.days_of_month.contains(&day)
            }
        }
    }
}

fn local_time(window: &BlackoutWindow, now: DateTime<Utc>) -> chrono::DateTime<Tz> {
    let tz: Tz = window.timezone.parse().unwrap_or(chrono_tz::UTC);
    now.with_timezone(&tz)
}

fn in_daily_window(window: &BlackoutWindow, now: DateTime<Utc>) -> bool {
    let (Some(start_raw), Some(end_raw)) = (&window.daily_start, &window.daily_end) else {
        return false;
    };
    let (Ok(start), Ok(end)) = (
        NaiveTime::parse_from_str(start_raw, "%H:%M"),
        NaiveTime::parse_from_str(end_raw, "%H:%M"),
    ) else {
        return false;
    };
    let local = local_time(window, now).time();
    if start <= end {
        local >= start && local <= end
    } else {
        // window spans midnight, e.g. 22:00-06:00
        local >= start || local <= end
    }
}

pub fn any_active<'a>(
    windows: &'a [BlackoutWindow],
    now: DateTime<Utc>,
    runbook_id: Option<&str>,
) -> Option<&'a BlackoutWindow> {
    windows.iter().find(|w| is_active(w, now, runbook_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(recurrence: Recurrence) -> BlackoutWindow {
        BlackoutWindow {
            id: "w1".to_string(),
            name: "maintenance".to_string(),
            enabled: true,
            recurrence,
            start_time: None,
            end_time: None,
            daily_start: None,
            daily_end: None,
            days_of_week: vec![],
            days_of_month: vec![],
            timezone: "UTC".to_string(),
            applies_to: AppliesTo::All,
            applies_to_runbook_ids: vec![],
        }
    }

    #[test]
    fn once_window_is_active_only_within_bounds() {
        let now = Utc::now();
        let mut w = window(Recurrence::Once);
        w.start_time = Some(now - chrono::Duration::hours(1));
        w.end_time = Some(now + chrono::Duration::hours(1));
        assert!(is_active(&w, now, None));
        assert!(!is_active(&w, now + chrono::Duration::hours(2), None));
    }

    #[test]
    fn daily_window_spanning_midnight() {
        let mut w = window(Recurrence::Daily);
        w.daily_start = Some("22:00".to_string());
        w.daily_end = Some("06:00".to_string());
        let at_23 = Utc::now().date_naive().and_hms_opt(23, 0, 0).unwrap().and_utc();
        let at_12 = Utc::now().date_naive().and_hms_opt(12, 0, 0).unwrap().and_utc();
        assert!(is_active(&w, at_23, None));
        assert!(!is_active(&w, at_12, None));
    }

    #[test]
    fn disabled_window_is_never_active() {
        let mut w = window(Recurrence::Once);
        w.enabled = false;
        w.start_time = Some(Utc::now() - chrono::Duration::hours(1));
        w.end_time = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!is_active(&w, Utc::now(), None));
    }

    #[test]
    fn auto_only_window_restricted_to_listed_runbooks() {
        let mut w = window(Recurrence::Once);
        w.applies_to = AppliesTo::AutoOnly;
        w.applies_to_runbook_ids = vec!["rb-1".to_string()];
        w.start_time = Some(Utc::now() - chrono::Duration::hours(1));
        w.end_time = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(is_active(&w, Utc::now(), Some("rb-1")));
        assert!(!is_active(&w, Utc::now(), Some("rb-2")));
    }
}
