//! Grouping - partition records into print groups and jobs
//!
//! Tallies combine with an associative, commutative merge so records can be
//! folded in any order (and across rayon workers) with the same result.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::print::{PrintAuthority, PrinterAssignment};
use crate::records::SourceRecord;

pub const NO_WINDOW: &str = "no-window";
pub const NO_DATE: &str = "no-date";
pub const NO_ROUTE: &str = "no-route";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    #[default]
    Printer,
    SalesWindow,
    PickupTime,
    Route,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub key: String,
    pub name: String,
}

/// Derives group keys for records of one batch
#[derive(Debug, Clone)]
pub struct Grouper {
    by: GroupBy,
    template_printer: Option<String>,
    default_printer: String,
    printer_names: HashMap<String, String>,
}

impl Grouper {
    pub fn new(
        by: GroupBy,
        template_printer: Option<String>,
        default_printer: impl Into<String>,
    ) -> Self {
        Self {
            by,
            template_printer,
            default_printer: default_printer.into(),
            printer_names: HashMap::new(),
        }
    }

    /// Display names for printer groups; unknown printers show their id
    pub fn with_printer_names(mut self, names: HashMap<String, String>) -> Self {
        self.printer_names = names;
        self
    }

    pub fn by(&self) -> GroupBy {
        self.by
    }

    pub fn printer_for(&self, record: &SourceRecord) -> PrinterAssignment {
        PrinterAssignment::resolve(
            record.printer_id.as_deref(),
            self.template_printer.as_deref(),
            &self.default_printer,
        )
    }

    /// Printer used for groups that are not keyed by printer
    pub fn batch_printer(&self) -> PrinterAssignment {
        PrinterAssignment::resolve(None, self.template_printer.as_deref(), &self.default_printer)
    }

    pub fn key_for(&self, record: &SourceRecord) -> GroupKey {
        match self.by {
            GroupBy::Printer => {
                let printer = self.printer_for(record).printer_id;
                let name = self
                    .printer_names
                    .get(&printer)
                    .cloned()
                    .unwrap_or_else(|| printer.clone());
                GroupKey { key: printer, name }
            }
            GroupBy::SalesWindow => match non_empty(record.sales_window_id.as_deref()) {
                Some(id) => GroupKey { key: id.to_string(), name: format!("Sales Window: {}", id) },
                None => GroupKey { key: NO_WINDOW.into(), name: "No Sales Window".into() },
            },
            GroupBy::PickupTime => match non_empty(record.expected_delivery_date.as_deref()) {
                Some(date) => {
                    let day = date_portion(date);
                    GroupKey { key: day.to_string(), name: format!("Pickup: {}", day) }
                }
                None => GroupKey { key: NO_DATE.into(), name: "No Pickup Date".into() },
            },
            GroupBy::Route => {
                let city = record.shipping_address.as_ref().and_then(|a| a.city.as_deref());
                match non_empty(city) {
                    Some(city) => GroupKey { key: city.to_string(), name: city.to_string() },
                    None => GroupKey { key: NO_ROUTE.into(), name: "No Route".into() },
                }
            }
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// `2026-10-17T09:00:00Z` -> `2026-10-17`
fn date_portion(date: &str) -> &str {
    date.split(|c| c == 'T' || c == ' ').next().unwrap_or(date)
}

/// Running totals for one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTally {
    pub key: String,
    pub name: String,
    /// Kept sorted so merge order never shows
    pub record_ids: Vec<String>,
    pub label_count: u32,
}

impl GroupTally {
    pub fn single(key: GroupKey, record_id: &str, label_count: u32) -> Self {
        Self {
            key: key.key,
            name: key.name,
            record_ids: vec![record_id.to_string()],
            label_count,
        }
    }

    pub fn merge(mut self, other: GroupTally) -> GroupTally {
        self.record_ids.extend(other.record_ids);
        self.record_ids.sort();
        self.label_count = self.label_count.saturating_add(other.label_count);
        self
    }
}

pub type GroupTallies = BTreeMap<String, GroupTally>;

/// Union of two tally maps, merging groups that share a key
pub fn merge_tallies(mut a: GroupTallies, b: GroupTallies) -> GroupTallies {
    for (key, tally) in b {
        let merged = match a.remove(&key) {
            Some(existing) => existing.merge(tally),
            None => tally,
        };
        a.insert(key, merged);
    }
    a
}

/// One slice of a group sent to one printer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub group_key: String,
    pub printer_id: String,
    pub authority: PrintAuthority,
    pub label_count: u32,
    pub estimated_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub key: String,
    pub name: String,
    pub record_ids: Vec<String>,
    pub label_count: u32,
    pub jobs: Vec<PrintJob>,
}

/// Split a group into jobs of at most `max_per_job` labels
pub fn plan_jobs(
    tally: GroupTally,
    printer: &PrinterAssignment,
    max_per_job: u32,
    seconds_per_label: f64,
) -> Group {
    let max = max_per_job.max(1);
    let mut jobs = vec![];
    let mut remaining = tally.label_count;
    while remaining > 0 {
        let n = remaining.min(max);
        jobs.push(PrintJob {
            group_key: tally.key.clone(),
            printer_id: printer.printer_id.clone(),
            authority: printer.authority,
            label_count: n,
            estimated_seconds: (n as f64 * seconds_per_label).ceil().max(0.0) as u64,
        });
        remaining -= n;
    }
    Group {
        key: tally.key,
        name: tally.name,
        record_ids: tally.record_ids,
        label_count: tally.label_count,
        jobs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Address;

    fn record(id: &str) -> SourceRecord {
        SourceRecord { id: id.into(), ..Default::default() }
    }

    #[test]
    fn test_keys_and_names() {
        let mut r = record("o-1");
        r.sales_window_id = Some("w-7".into());
        r.expected_delivery_date = Some("2026-10-17T09:00:00Z".into());
        r.shipping_address = Some(Address { city: Some("Salem".into()), ..Default::default() });

        let key = |by| Grouper::new(by, None, "default-printer").key_for(&r);
        assert_eq!(
            key(GroupBy::SalesWindow),
            GroupKey { key: "w-7".into(), name: "Sales Window: w-7".into() }
        );
        assert_eq!(
            key(GroupBy::PickupTime),
            GroupKey { key: "2026-10-17".into(), name: "Pickup: 2026-10-17".into() }
        );
        assert_eq!(key(GroupBy::Route).name, "Salem");

        let empty = record("o-2");
        let key = |by| Grouper::new(by, None, "default-printer").key_for(&empty);
        assert_eq!(key(GroupBy::SalesWindow).key, NO_WINDOW);
        assert_eq!(key(GroupBy::PickupTime).name, "No Pickup Date");
        assert_eq!(key(GroupBy::Route).name, "No Route");
        assert_eq!(key(GroupBy::Printer).key, "default-printer");
    }

    #[test]
    fn test_printer_authority() {
        let names: HashMap<String, String> =
            [("zebra".to_string(), "Zebra ZD420".to_string())].into();
        let grouper = Grouper::new(GroupBy::Printer, Some("zebra".into()), "default-printer")
            .with_printer_names(names);

        let plain = record("o-1");
        assert_eq!(
            grouper.key_for(&plain),
            GroupKey { key: "zebra".into(), name: "Zebra ZD420".into() }
        );
        assert_eq!(grouper.printer_for(&plain).authority, PrintAuthority::Template);

        let mut chosen = record("o-2");
        chosen.printer_id = Some("dymo".into());
        assert_eq!(grouper.key_for(&chosen).name, "dymo");
        assert_eq!(grouper.printer_for(&chosen).authority, PrintAuthority::Record);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let key = |k: &str| GroupKey { key: k.into(), name: k.into() };
        let parts = vec![
            GroupTally::single(key("a"), "o-3", 2),
            GroupTally::single(key("b"), "o-1", 5),
            GroupTally::single(key("a"), "o-2", 1),
        ];
        let fold = |order: Vec<usize>| {
            order.into_iter().fold(GroupTallies::new(), |acc, i| {
                let t = parts[i].clone();
                merge_tallies(acc, GroupTallies::from([(t.key.clone(), t)]))
            })
        };
        let forward = fold(vec![0, 1, 2]);
        let backward = fold(vec![2, 1, 0]);
        assert_eq!(forward, backward);
        assert_eq!(forward["a"].label_count, 3);
        assert_eq!(forward["a"].record_ids, vec!["o-2".to_string(), "o-3".to_string()]);
    }

    #[test]
    fn test_merge_saturates_label_count() {
        let key = || GroupKey { key: "a".into(), name: "A".into() };
        let merged =
            GroupTally::single(key(), "o-1", u32::MAX).merge(GroupTally::single(key(), "o-2", 1));
        assert_eq!(merged.label_count, u32::MAX);
        assert_eq!(merged.record_ids.len(), 2);
    }

    fn system_printer() -> PrinterAssignment {
        PrinterAssignment { printer_id: "p".into(), authority: PrintAuthority::System }
    }

    #[test]
    fn test_plan_jobs_splits_large_groups() {
        let tally = GroupTally {
            key: "g".into(),
            name: "G".into(),
            record_ids: vec!["o-1".into()],
            label_count: 250,
        };
        let printer = system_printer();
        let group = plan_jobs(tally, &printer, 100, 2.0);
        let counts: Vec<u32> = group.jobs.iter().map(|j| j.label_count).collect();
        assert_eq!(counts, vec![100, 100, 50]);
        assert_eq!(group.jobs[2].estimated_seconds, 100);
    }

    #[test]
    fn test_empty_group_has_no_jobs() {
        let tally = GroupTally::single(GroupKey { key: "g".into(), name: "G".into() }, "o-1", 0);
        let printer = system_printer();
        assert!(plan_jobs(tally, &printer, 100, 2.0).jobs.is_empty());
    }
}
