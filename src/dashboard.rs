//! Views the dashboard renders, each a composition of the `analytics`
//! primitives over one job's classified records.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::analytics::{
    self, delay_counts, round_to, tally, top_by, DelayStats, GroupField,
};
use crate::error::ViewError;
use crate::models::{ClassifiedRecord, JobRecord, KpiSummary, RankingEntry, RankingSet};
use crate::store::Repositories;

const OVERVIEW_TOP: usize = 5;
const CHART_TOP: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: String,
    pub value: f64,
}

fn chart(points: Vec<(String, usize)>) -> Vec<ChartPoint> {
    points
        .into_iter()
        .map(|(label, value)| ChartPoint {
            label,
            value: value as f64,
        })
        .collect()
}

fn delay_chart(records: &[ClassifiedRecord], field: GroupField, limit: usize) -> Vec<ChartPoint> {
    chart(top_by(delay_counts(records, field), limit, |(_, delays)| *delays))
}

fn sla_trend(records: &[ClassifiedRecord], field: GroupField, decimals: i32) -> Vec<TrendPoint> {
    analytics::sla_by_group(records, field)
        .into_iter()
        .map(|group| TrendPoint {
            value: round_to(analytics::percentage(group.on_time, group.total), decimals),
            date: group.key,
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaMetrics {
    pub total_packages: usize,
    pub within_sla: usize,
    pub outside_sla: usize,
    pub within_sla_percentage: f64,
    pub outside_sla_percentage: f64,
    pub total_delays: usize,
    pub total_sellers: usize,
    pub total_zones: usize,
}

impl From<&KpiSummary> for SlaMetrics {
    fn from(kpis: &KpiSummary) -> Self {
        Self {
            total_packages: kpis.total_orders,
            within_sla: kpis.on_time,
            outside_sla: kpis.late,
            within_sla_percentage: kpis.sla_percentage,
            outside_sla_percentage: 100.0 - kpis.sla_percentage,
            total_delays: kpis.late,
            total_sellers: 0,
            total_zones: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub metrics: SlaMetrics,
    pub sla_by_period: Vec<ChartPoint>,
    pub top_delayed_sellers: Vec<ChartPoint>,
    pub top_critical_zones: Vec<ChartPoint>,
    pub top_problematic_ceps: Vec<ChartPoint>,
}

pub fn overview(records: &[ClassifiedRecord]) -> Overview {
    let kpis = analytics::global_kpis(records);
    let distinct = |value: fn(&ClassifiedRecord) -> Option<&str>| {
        records.iter().filter_map(value).collect::<BTreeSet<_>>().len()
    };

    let metrics = SlaMetrics {
        total_delays: analytics::delay_stats(records).total_delays,
        total_sellers: distinct(ClassifiedRecord::seller),
        total_zones: distinct(ClassifiedRecord::zone),
        ..SlaMetrics::from(&kpis)
    };

    Overview {
        metrics,
        sla_by_period: sla_trend(records, GroupField::Month, 1)
            .into_iter()
            .map(|point| ChartPoint {
                label: point.date,
                value: point.value,
            })
            .collect(),
        top_delayed_sellers: delay_chart(records, GroupField::Seller, OVERVIEW_TOP),
        top_critical_zones: delay_chart(records, GroupField::Zone, OVERVIEW_TOP),
        top_problematic_ceps: delay_chart(records, GroupField::PostalCode, OVERVIEW_TOP),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelaysView {
    pub metrics: DelayStats,
    pub delays_by_day: Vec<ChartPoint>,
    pub delays_by_zone: Vec<ChartPoint>,
    pub delays_by_cep: Vec<ChartPoint>,
    pub delays_by_seller: Vec<ChartPoint>,
}

pub fn delays(records: &[ClassifiedRecord]) -> DelaysView {
    DelaysView {
        metrics: analytics::delay_stats(records),
        delays_by_day: chart(delay_counts(records, GroupField::StatusDate)),
        delays_by_zone: delay_chart(records, GroupField::Zone, usize::MAX),
        delays_by_cep: delay_chart(records, GroupField::PostalCode, usize::MAX),
        delays_by_seller: delay_chart(records, GroupField::Seller, usize::MAX),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetrics {
    pub id: String,
    pub name: String,
    pub total_packages: usize,
    pub total_delays: usize,
    pub within_sla: usize,
    pub outside_sla: usize,
    pub sla_percentage: f64,
    pub average_delay: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
}

/// Per-group counts in ascending key order.
pub fn group_metrics(records: &[ClassifiedRecord], field: GroupField) -> Vec<GroupMetrics> {
    tally(records, field)
        .into_iter()
        .map(|(name, group)| GroupMetrics {
            id: name.clone(),
            name,
            total_packages: group.total,
            total_delays: group.delays,
            within_sla: group.on_time,
            outside_sla: group.outside(),
            sla_percentage: group.sla_percentage(),
            average_delay: group.average_delay(),
            rank: None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellersView {
    pub sellers: Vec<GroupMetrics>,
    pub volume_chart: Vec<ChartPoint>,
    pub delays_chart: Vec<ChartPoint>,
    pub sla_chart: Vec<ChartPoint>,
}

pub fn sellers(records: &[ClassifiedRecord]) -> SellersView {
    let mut sellers = group_metrics(records, GroupField::Seller);
    sellers.sort_by(|a, b| b.sla_percentage.total_cmp(&a.sla_percentage));
    for (index, seller) in sellers.iter_mut().enumerate() {
        seller.rank = Some(index + 1);
    }

    let top = &sellers[..sellers.len().min(CHART_TOP)];
    let series = |value: fn(&GroupMetrics) -> f64| {
        top.iter()
            .map(|seller| ChartPoint {
                label: seller.name.clone(),
                value: value(seller),
            })
            .collect::<Vec<_>>()
    };

    SellersView {
        volume_chart: series(|s| s.total_packages as f64),
        delays_chart: series(|s| s.total_delays as f64),
        sla_chart: series(|s| s.sla_percentage),
        sellers,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonesView {
    pub zones: Vec<GroupMetrics>,
    pub ceps: Vec<GroupMetrics>,
    pub zone_delays_chart: Vec<ChartPoint>,
    pub cep_delays_chart: Vec<ChartPoint>,
}

pub fn zones(records: &[ClassifiedRecord]) -> ZonesView {
    let zones = group_metrics(records, GroupField::Zone);
    let ceps = group_metrics(records, GroupField::PostalCode);
    let delays_chart = |groups: &[GroupMetrics]| {
        let points: Vec<(String, usize)> = groups
            .iter()
            .map(|group| (group.name.clone(), group.total_delays))
            .collect();
        chart(top_by(points, usize::MAX, |(_, delays)| *delays))
    };

    ZonesView {
        zone_delays_chart: delays_chart(&zones),
        cep_delays_chart: delays_chart(&ceps),
        zones,
        ceps,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub name: String,
    pub value: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingsView {
    pub sellers_by_delays: Vec<RankedEntry>,
    pub zones_by_delays: Vec<RankedEntry>,
    pub sellers_by_volume: Vec<RankedEntry>,
}

pub fn rankings(set: &RankingSet) -> RankingsView {
    let ranked = |entries: &[RankingEntry], value: fn(&RankingEntry) -> usize| {
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| RankedEntry {
                rank: index + 1,
                name: entry.name.clone(),
                value: value(entry),
                percentage: entry.sla_percentage,
            })
            .collect::<Vec<_>>()
    };

    RankingsView {
        sellers_by_delays: ranked(&set.sellers_most_delays, |e| e.delays),
        zones_by_delays: ranked(&set.zones_most_delays, |e| e.delays),
        sellers_by_volume: ranked(&set.sellers_highest_volume, |e| e.volume),
    }
}

/// Narrowing applied before the SLA performance view. Text filters are
/// case-insensitive substring matches; date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub zone: Option<String>,
    pub seller: Option<String>,
    pub cost_center: Option<String>,
}

fn contains_ignore_case(value: Option<&str>, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => value.map_or(false, |value| {
            value.to_lowercase().contains(&needle.to_lowercase())
        }),
    }
}

impl RecordFilter {
    pub fn matches(&self, record: &ClassifiedRecord) -> bool {
        let date = record.order_date();
        let after_start = self
            .start_date
            .map_or(true, |start| date.map_or(false, |date| date >= start));
        let before_end = self
            .end_date
            .map_or(true, |end| date.map_or(false, |date| date <= end));

        after_start
            && before_end
            && contains_ignore_case(record.zone(), self.zone.as_deref())
            && contains_ignore_case(record.seller(), self.seller.as_deref())
            && contains_ignore_case(record.cost_center(), self.cost_center.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaPerformance {
    pub sla_trend: Vec<TrendPoint>,
    pub records: Vec<ClassifiedRecord>,
    pub total_records: usize,
}

pub fn sla_performance(records: &[ClassifiedRecord], filter: &RecordFilter) -> SlaPerformance {
    let records: Vec<ClassifiedRecord> = records
        .iter()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect();

    SlaPerformance {
        sla_trend: sla_trend(&records, GroupField::OrderDate, 2),
        total_records: records.len(),
        records,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodComparison {
    pub current: SlaMetrics,
    pub previous: SlaMetrics,
    pub percentage_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSla {
    pub period: String,
    pub sla_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerPerformance {
    pub seller: String,
    pub periods: Vec<PeriodSla>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Historical {
    pub sla_evolution: Vec<TrendPoint>,
    pub delay_trend: Vec<TrendPoint>,
    pub period_comparison: PeriodComparison,
    pub seller_performance: Vec<SellerPerformance>,
}

pub fn historical(
    current: &KpiSummary,
    previous: &KpiSummary,
    current_records: &[ClassifiedRecord],
) -> Historical {
    let current = SlaMetrics::from(current);
    let previous = SlaMetrics::from(previous);

    Historical {
        sla_evolution: sla_trend(current_records, GroupField::OrderDate, 2),
        delay_trend: delay_counts(current_records, GroupField::StatusDate)
            .into_iter()
            .map(|(date, delays)| TrendPoint {
                date,
                value: delays as f64,
            })
            .collect(),
        period_comparison: PeriodComparison {
            percentage_change: current.within_sla_percentage - previous.within_sla_percentage,
            current,
            previous,
        },
        seller_performance: tally(current_records, GroupField::Seller)
            .into_iter()
            .map(|(seller, group)| SellerPerformance {
                seller,
                periods: vec![PeriodSla {
                    period: "current".to_string(),
                    sla_percentage: group.sla_percentage(),
                }],
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub zones: Vec<String>,
    pub sellers: Vec<String>,
    pub cost_centers: Vec<String>,
    pub date_range: Option<DateRange>,
}

pub fn filter_options(records: &[ClassifiedRecord]) -> FilterOptions {
    let distinct = |value: fn(&ClassifiedRecord) -> Option<&str>| {
        records
            .iter()
            .filter_map(value)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
    };
    let dates = records.iter().filter_map(ClassifiedRecord::order_date);
    let date_range = dates
        .clone()
        .min()
        .zip(dates.max())
        .map(|(min, max)| DateRange { min, max });

    FilterOptions {
        zones: distinct(ClassifiedRecord::zone),
        sellers: distinct(ClassifiedRecord::seller),
        cost_centers: distinct(ClassifiedRecord::cost_center),
        date_range,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortField {
    OrderDate,
    OrderId,
    Seller,
    Zone,
    PostalCode,
    PromisedDelivery,
    DeliveredOn,
    Outcome,
}

impl SortField {
    fn value(self, record: &ClassifiedRecord) -> Option<String> {
        let order = &record.record.order;
        let delivery = &record.record.delivery;
        match self {
            SortField::OrderDate => order.order_date.map(|date| date.to_string()),
            SortField::OrderId => order.order_id.clone(),
            SortField::Seller => delivery.seller.clone(),
            SortField::Zone => order.zone.clone(),
            SortField::PostalCode => delivery.postal_code.clone(),
            SortField::PromisedDelivery => delivery.promised_delivery.map(|date| date.to_string()),
            SortField::DeliveredOn => delivery.delivered_on.map(|date| date.to_string()),
            SortField::Outcome => Some(record.sla_outcome.label().to_string()),
        }
    }

    /// Ascending, numeric where both sides are integers, missing values last.
    fn compare(self, a: &ClassifiedRecord, b: &ClassifiedRecord) -> Ordering {
        match (self.value(a), self.value(b)) {
            (Some(a), Some(b)) => match (a.parse::<u64>(), b.parse::<u64>()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(&b),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedQuery {
    pub page: usize,
    pub page_size: usize,
    pub sort_by: Option<SortField>,
    pub seller: Option<String>,
    pub zone: Option<String>,
}

impl Default for ConsolidatedQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
            sort_by: None,
            seller: None,
            zone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedPage {
    pub records: Vec<ClassifiedRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

pub fn consolidated(records: &[ClassifiedRecord], query: &ConsolidatedQuery) -> ConsolidatedPage {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 1000);

    let mut matching: Vec<&ClassifiedRecord> = records
        .iter()
        .filter(|record| contains_ignore_case(record.seller(), query.seller.as_deref()))
        .filter(|record| contains_ignore_case(record.zone(), query.zone.as_deref()))
        .collect();
    if let Some(field) = query.sort_by {
        matching.sort_by(|a, b| field.compare(a, b));
    }

    ConsolidatedPage {
        total: matching.len(),
        records: matching
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .cloned()
            .collect(),
        page,
        page_size,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobComparison {
    pub period1: Uuid,
    pub period2: Uuid,
    pub sla_period1: f64,
    pub sla_period2: f64,
    pub difference: f64,
}

pub fn compare(first: (Uuid, &KpiSummary), second: (Uuid, &KpiSummary)) -> JobComparison {
    JobComparison {
        period1: first.0,
        period2: second.0,
        sla_period1: first.1.sla_percentage,
        sla_period2: second.1.sla_percentage,
        difference: second.1.sla_percentage - first.1.sla_percentage,
    }
}

/// Loads the stored artifacts the views are built from.
pub struct Dashboard {
    repos: Repositories,
}

impl Dashboard {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn latest_job(&self) -> Result<JobRecord, ViewError> {
        self.repos
            .latest_completed_job()
            .await?
            .ok_or(ViewError::NoCompletedJob)
    }

    pub async fn job(&self, job_id: Uuid) -> Result<JobRecord, ViewError> {
        self.repos
            .job(job_id)
            .await?
            .ok_or(ViewError::JobNotFound(job_id))
    }

    pub async fn records(&self, job_id: Uuid) -> Result<Vec<ClassifiedRecord>, ViewError> {
        let data = self
            .repos
            .data(job_id)
            .await?
            .ok_or(ViewError::ArtifactMissing {
                job_id,
                artifact: "data",
            })?;
        if data.data.is_empty() {
            return Err(ViewError::NoRecords(job_id));
        }
        Ok(data.data)
    }

    pub async fn kpis(&self, job_id: Uuid) -> Result<KpiSummary, ViewError> {
        self.repos
            .kpis(job_id)
            .await?
            .ok_or(ViewError::ArtifactMissing {
                job_id,
                artifact: "kpis",
            })
    }

    pub async fn ranking_set(&self, job_id: Uuid) -> Result<RankingSet, ViewError> {
        self.repos
            .rankings(job_id)
            .await?
            .ok_or(ViewError::ArtifactMissing {
                job_id,
                artifact: "rankings",
            })
    }

    pub async fn latest_records(&self) -> Result<Vec<ClassifiedRecord>, ViewError> {
        let job = self.latest_job().await?;
        self.records(job.id).await
    }

    pub async fn historical(&self) -> Result<Historical, ViewError> {
        let (current, previous) = self
            .repos
            .last_two_completed()
            .await?
            .ok_or(ViewError::NoCompletedJob)?;
        let current_kpis = self.kpis(current.id).await?;
        let previous_kpis = self.kpis(previous.id).await?;
        let records = self.records(current.id).await?;
        Ok(historical(&current_kpis, &previous_kpis, &records))
    }

    pub async fn compare(&self, first: Uuid, second: Uuid) -> Result<JobComparison, ViewError> {
        let first_kpis = self.kpis(first).await?;
        let second_kpis = self.kpis(second).await?;
        Ok(compare((first, &first_kpis), (second, &second_kpis)))
    }
}
