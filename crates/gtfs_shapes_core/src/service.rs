use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use gtfs_shapes_model::ExceptionType;
use rustc_hash::FxHashMap;

use crate::feed::GtfsFeed;

/// Materialised active dates of one service id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    dates: BTreeSet<NaiveDate>,
}

impl Service {
    pub fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    pub fn first_active_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_active_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    /// Steps one day at a time from the first to the last active date and
    /// yields the days the service runs on.
    pub fn active_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let mut current = self.first_active_date();
        let last = self.last_active_date();
        std::iter::from_fn(move || loop {
            let day = current?;
            if Some(day) > last {
                return None;
            }
            current = day.succ_opt();
            if self.is_active_on(day) {
                return Some(day);
            }
        })
    }

    pub fn active_day_count(&self) -> usize {
        self.dates.len()
    }
}

/// Active dates for every service id of a feed, built from the weekly
/// patterns of `calendar.txt` and the exceptions of `calendar_dates.txt`.
#[derive(Debug, Clone, Default)]
pub struct ServiceCalendar {
    services: FxHashMap<String, Service>,
}

impl ServiceCalendar {
    pub fn from_feed(feed: &GtfsFeed) -> Self {
        let mut services: FxHashMap<String, Service> = FxHashMap::default();

        if let Some(calendar) = &feed.calendar {
            for row in &calendar.rows {
                let (Some(mut current), Some(mut end_date)) =
                    (row.start_date.to_naive(), row.end_date.to_naive())
                else {
                    continue;
                };
                if current > end_date {
                    end_date = current;
                }
                let service_id = row.service_id.trim();
                if service_id.is_empty() {
                    continue;
                }

                let entry = services.entry(service_id.to_string()).or_default();
                while current <= end_date {
                    if row.runs_on(current.weekday()) {
                        entry.dates.insert(current);
                    }
                    match current.succ_opt() {
                        Some(next) => current = next,
                        None => break,
                    }
                }
            }
        }

        if let Some(calendar_dates) = &feed.calendar_dates {
            for row in &calendar_dates.rows {
                let Some(date) = row.date.to_naive() else {
                    continue;
                };
                let service_id = row.service_id.trim();
                if service_id.is_empty() {
                    continue;
                }
                let entry = services.entry(service_id.to_string()).or_default();
                match row.exception_type {
                    ExceptionType::Added => {
                        entry.dates.insert(date);
                    }
                    ExceptionType::Removed => {
                        entry.dates.remove(&date);
                    }
                    ExceptionType::Other => {}
                }
            }
        }

        Self { services }
    }

    pub fn insert(&mut self, service_id: impl Into<String>, service: Service) {
        self.services.insert(service_id.into(), service);
    }

    pub fn get(&self, service_id: &str) -> Option<&Service> {
        self.services.get(service_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_reader::read_csv_table;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn feed_with(calendar: &str, calendar_dates: Option<&str>) -> GtfsFeed {
        GtfsFeed {
            calendar: Some(read_csv_table("calendar.txt", calendar.as_bytes()).unwrap()),
            calendar_dates: calendar_dates
                .map(|data| read_csv_table("calendar_dates.txt", data.as_bytes()).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn expands_weekly_pattern_with_exceptions() {
        // 2024-01-01 is a Monday.
        let feed = feed_with(
            "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
             WK,1,1,1,1,1,0,0,20240101,20240114\n",
            Some("service_id,date,exception_type\nWK,20240102,2\nWK,20240106,1\n"),
        );
        let calendar = ServiceCalendar::from_feed(&feed);
        let service = calendar.get("WK").unwrap();

        assert_eq!(service.active_day_count(), 10);
        assert!(!service.is_active_on(date(2024, 1, 2)));
        assert!(service.is_active_on(date(2024, 1, 6)));
        assert!(!service.is_active_on(date(2024, 1, 7)));
        assert_eq!(service.first_active_date(), Some(date(2024, 1, 1)));
        assert_eq!(service.last_active_date(), Some(date(2024, 1, 12)));
        assert_eq!(service.active_days().count(), 10);
    }

    #[test]
    fn calendar_dates_alone_define_a_service() {
        let feed = GtfsFeed {
            calendar_dates: Some(
                read_csv_table(
                    "calendar_dates.txt",
                    b"service_id,date,exception_type\nHOL,20241225,1\nHOL,20241226,1\n",
                )
                .unwrap(),
            ),
            ..Default::default()
        };
        let calendar = ServiceCalendar::from_feed(&feed);
        let days: Vec<_> = calendar.get("HOL").unwrap().active_days().collect();
        assert_eq!(days, vec![date(2024, 12, 25), date(2024, 12, 26)]);
        assert!(calendar.get("NONE").is_none());
    }

    #[test]
    fn empty_service_has_no_active_days() {
        let service = Service::default();
        assert_eq!(service.first_active_date(), None);
        assert_eq!(service.active_days().count(), 0);
    }
}
