use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{not_available, ClassifiedRecord, KpiSummary, RankingEntry, RankingSet};

/// Record attributes the rollups group by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Seller,
    Zone,
    PostalCode,
    /// Calendar month of the order date, `YYYY-MM`.
    Month,
    OrderDate,
    StatusDate,
}

impl GroupField {
    /// Text fields and the status date group missing values under the sentinel
    /// label, so per-key counts add up to the whole. Order-date fields feed SLA
    /// trends and leave undated records out.
    pub fn key(self, record: &ClassifiedRecord) -> Option<String> {
        let text = |value: Option<&str>| Some(not_available::label(value).to_string());
        match self {
            GroupField::Seller => text(record.seller()),
            GroupField::Zone => text(record.zone()),
            GroupField::PostalCode => text(record.postal_code()),
            GroupField::Month => record.order_date().map(|date| date.format("%Y-%m").to_string()),
            GroupField::OrderDate => record.order_date().map(|date| date.to_string()),
            GroupField::StatusDate => Some(
                record
                    .record
                    .delivery
                    .status_date
                    .map_or_else(|| not_available::SENTINEL.to_string(), |date| date.to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupTally {
    pub total: usize,
    pub on_time: usize,
    pub delays: usize,
    pub delay_day_sum: f64,
    pub max_delay_days: f64,
}

impl GroupTally {
    fn add(&mut self, record: &ClassifiedRecord) {
        let days = delay_days(record);
        self.total += 1;
        self.delay_day_sum += days;
        if record.is_on_time() {
            self.on_time += 1;
        }
        if record.is_delayed() {
            self.delays += 1;
            self.max_delay_days = self.max_delay_days.max(days);
        }
    }

    pub fn outside(&self) -> usize {
        self.total - self.on_time
    }

    pub fn sla_percentage(&self) -> f64 {
        percentage(self.on_time, self.total)
    }

    /// Mean delay over every record in the group.
    pub fn average_delay(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.delay_day_sum / self.total as f64
        }
    }
}

/// Groups in ascending key order; groups only exist for keys that occur.
pub fn tally(records: &[ClassifiedRecord], field: GroupField) -> BTreeMap<String, GroupTally> {
    let mut groups: BTreeMap<String, GroupTally> = BTreeMap::new();
    for record in records {
        if let Some(key) = field.key(record) {
            groups.entry(key).or_default().add(record);
        }
    }
    groups
}

pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Numeric delay of a record. Missing or non-numeric values count as zero.
pub fn delay_days(record: &ClassifiedRecord) -> f64 {
    record
        .record
        .delivery
        .delay_days
        .as_deref()
        .and_then(|raw| raw.trim().replace(',', ".").parse::<f64>().ok())
        .filter(|days| days.is_finite())
        .unwrap_or(0.0)
}

pub fn global_kpis(records: &[ClassifiedRecord]) -> KpiSummary {
    let total_orders = records.len();
    let on_time = records.iter().filter(|record| record.is_on_time()).count();
    KpiSummary {
        total_orders,
        on_time,
        late: total_orders - on_time,
        sla_percentage: percentage(on_time, total_orders),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSla {
    pub key: String,
    pub total: usize,
    pub on_time: usize,
    pub sla_percentage: f64,
}

pub fn sla_by_group(records: &[ClassifiedRecord], field: GroupField) -> Vec<GroupSla> {
    tally(records, field)
        .into_iter()
        .map(|(key, group)| GroupSla {
            sla_percentage: round_to(group.sla_percentage(), 2),
            key,
            total: group.total,
            on_time: group.on_time,
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DelayStats {
    pub total_delays: usize,
    pub average_delay_days: f64,
    pub max_delay_days: f64,
}

pub fn delay_stats(records: &[ClassifiedRecord]) -> DelayStats {
    let mut delayed = GroupTally::default();
    for record in records.iter().filter(|record| record.is_delayed()) {
        delayed.add(record);
    }
    DelayStats {
        total_delays: delayed.delays,
        average_delay_days: delayed.average_delay(),
        max_delay_days: delayed.max_delay_days,
    }
}

/// Delayed-record counts per key, ascending by key; keys without delays are absent.
pub fn delay_counts(records: &[ClassifiedRecord], field: GroupField) -> Vec<(String, usize)> {
    tally(records, field)
        .into_iter()
        .filter(|(_, group)| group.delays > 0)
        .map(|(key, group)| (key, group.delays))
        .collect()
}

/// Stable descending sort on `rank_by`, truncated to `limit`.
pub fn top_by<T, K, F>(mut entries: Vec<T>, limit: usize, rank_by: F) -> Vec<T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    entries.sort_by(|a, b| rank_by(b).cmp(&rank_by(a)));
    entries.truncate(limit);
    entries
}

fn ranking_entries(records: &[ClassifiedRecord], field: GroupField) -> Vec<RankingEntry> {
    tally(records, field)
        .into_iter()
        .map(|(name, group)| RankingEntry {
            volume: group.total,
            delays: group.delays,
            sla_percentage: round_to(group.sla_percentage(), 2),
            name,
        })
        .collect()
}

pub fn rankings(records: &[ClassifiedRecord], limit: usize) -> RankingSet {
    let sellers = ranking_entries(records, GroupField::Seller);
    let zones = ranking_entries(records, GroupField::Zone);
    let with_delays =
        |entries: &[RankingEntry]| entries.iter().filter(|e| e.delays > 0).cloned().collect::<Vec<_>>();

    RankingSet {
        sellers_most_delays: top_by(with_delays(&sellers), limit, |e| e.delays),
        zones_most_delays: top_by(with_delays(&zones), limit, |e| e.delays),
        sellers_highest_volume: top_by(sellers, limit, |e| e.volume),
    }
}
