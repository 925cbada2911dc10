use std::fmt::Write;

use crate::analytics;
use crate::models::{not_available, ClassifiedRecord, JobRecord, KpiSummary, RankingEntry, RankingSet};
use crate::sla::SlaOutcome;

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeSummary {
    pub outcome: SlaOutcome,
    pub count: usize,
    pub avg_delay: f64,
}

pub fn summarize_by_outcome(records: &[ClassifiedRecord]) -> Vec<OutcomeSummary> {
    let mut summaries: Vec<OutcomeSummary> = SlaOutcome::ALL
        .iter()
        .filter_map(|outcome| {
            let matching: Vec<f64> = records
                .iter()
                .filter(|record| record.sla_outcome == *outcome)
                .map(analytics::delay_days)
                .collect();
            if matching.is_empty() {
                return None;
            }
            Some(OutcomeSummary {
                outcome: *outcome,
                count: matching.len(),
                avg_delay: matching.iter().sum::<f64>() / matching.len() as f64,
            })
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

fn write_ranking(output: &mut String, title: &str, entries: &[RankingEntry], empty: &str) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {title}");

    if entries.is_empty() {
        let _ = writeln!(output, "{empty}");
    } else {
        for entry in entries {
            let _ = writeln!(
                output,
                "- {}: {} delays across {} packages (SLA {:.2}%)",
                entry.name, entry.delays, entry.volume, entry.sla_percentage
            );
        }
    }
}

pub fn build_report(
    job: &JobRecord,
    records: &[ClassifiedRecord],
    kpis: &KpiSummary,
    rankings: &RankingSet,
) -> String {
    let summaries = summarize_by_outcome(records);
    let delays = analytics::delay_stats(records);

    let mut output = String::new();

    let _ = writeln!(output, "# Delivery SLA Report");
    let _ = writeln!(
        output,
        "Generated for job {} (processed {})",
        job.id,
        job.last_updated.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(
        output,
        "- {} packages, {} on time, {} outside SLA",
        kpis.total_orders, kpis.on_time, kpis.late
    );
    let _ = writeln!(output, "- SLA {:.2}%", kpis.sla_percentage);
    let _ = writeln!(
        output,
        "- {} delayed deliveries (avg {:.1} days late)",
        delays.total_delays, delays.average_delay_days
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Outcome Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No packages recorded for this job.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} packages (avg delay {:.1} days)",
                summary.outcome, summary.count, summary.avg_delay
            );
        }
    }

    write_ranking(
        &mut output,
        "Sellers With Most Delays",
        &rankings.sellers_most_delays,
        "No delayed sellers for this job.",
    );
    write_ranking(
        &mut output,
        "Zones With Most Delays",
        &rankings.zones_most_delays,
        "No delayed zones for this job.",
    );

    let mut late: Vec<&ClassifiedRecord> = records.iter().filter(|r| r.is_delayed()).collect();
    late.sort_by(|a, b| b.record.delivery.delivered_on.cmp(&a.record.delivery.delivered_on));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Late Deliveries");

    if late.is_empty() {
        let _ = writeln!(output, "No late deliveries for this job.");
    } else {
        for record in late.iter().take(5) {
            let delivery = &record.record.delivery;
            let _ = writeln!(
                output,
                "- order {} ({}, {}) promised {} delivered {}",
                not_available::label(record.record.order.order_id.as_deref()),
                not_available::label(record.seller()),
                not_available::label(record.zone()),
                delivery
                    .promised_delivery
                    .map_or_else(|| not_available::SENTINEL.to_string(), |d| d.to_string()),
                delivery
                    .delivered_on
                    .map_or_else(|| not_available::SENTINEL.to_string(), |d| d.to_string()),
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::tests::sample;
    use crate::models::JobStatus;
    use chrono::NaiveDate;

    #[test]
    fn outcome_mix_orders_by_count() {
        let records = vec![
            sample("A", "Norte", SlaOutcome::OnTime, None),
            sample("A", "Norte", SlaOutcome::DeliveredLate, Some("3")),
            sample("B", "Sul", SlaOutcome::DeliveredLate, Some("1")),
        ];
        let summaries = summarize_by_outcome(&records);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].outcome, SlaOutcome::DeliveredLate);
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].avg_delay, 2.0);
    }

    #[test]
    fn report_lists_sections_and_latest_late_deliveries() {
        let mut late = sample("Meli A", "Norte", SlaOutcome::DeliveredLate, Some("2"));
        late.record.delivery.promised_delivery = NaiveDate::from_ymd_opt(2024, 1, 10);
        late.record.delivery.delivered_on = NaiveDate::from_ymd_opt(2024, 1, 12);
        let records = vec![late, sample("Meli B", "Sul", SlaOutcome::OnTime, None)];

        let mut job = JobRecord::pending("m", "l");
        job.status = JobStatus::Completed;
        let kpis = analytics::global_kpis(&records);
        let rankings = analytics::rankings(&records, 10);

        let report = build_report(&job, &records, &kpis, &rankings);

        assert!(report.starts_with("# Delivery SLA Report"));
        assert!(report.contains("- 2 packages, 1 on time, 1 outside SLA"));
        assert!(report.contains("- SLA 50.00%"));
        assert!(report.contains("- Meli A: 1 delays across 1 packages (SLA 0.00%)"));
        assert!(report.contains("- order 1 (Meli A, Norte) promised 2024-01-10 delivered 2024-01-12"));
    }

    #[test]
    fn empty_job_renders_placeholders() {
        let job = JobRecord::pending("m", "l");
        let report = build_report(&job, &[], &KpiSummary::default(), &RankingSet::default());
        assert!(report.contains("No packages recorded for this job."));
        assert!(report.contains("No delayed sellers for this job."));
        assert!(report.contains("No late deliveries for this job."));
    }
}
