use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TableRole;
use crate::sla::SlaOutcome;

/// Persisted form of a missing value. Documents keep the literal, the
/// in-memory records use `None`.
pub mod not_available {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub const SENTINEL: &str = "N/A";

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_str(SENTINEL),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(text) if text.is_empty() || text == SENTINEL => Ok(None),
            Some(text) => text.parse().map(Some).map_err(de::Error::custom),
        }
    }

    pub fn label(value: Option<&str>) -> &str {
        value.unwrap_or(SENTINEL)
    }
}

/// One row of the mother manifest after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotherRow {
    #[serde(with = "not_available")]
    pub order_date: Option<NaiveDate>,
    #[serde(with = "not_available")]
    pub order_id: Option<String>,
    #[serde(with = "not_available")]
    pub daily_status: Option<String>,
    #[serde(with = "not_available")]
    pub daily_scan: Option<String>,
    #[serde(with = "not_available")]
    pub customer: Option<String>,
    #[serde(with = "not_available")]
    pub account: Option<String>,
    #[serde(with = "not_available")]
    pub zone: Option<String>,
    #[serde(with = "not_available")]
    pub responsibility: Option<String>,
}

/// One row of the carrier status export after filtering and normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LooseRow {
    #[serde(with = "not_available")]
    pub scan: Option<String>,
    #[serde(with = "not_available")]
    pub created_on: Option<NaiveDate>,
    #[serde(with = "not_available")]
    pub expected_delivery: Option<NaiveDate>,
    #[serde(with = "not_available")]
    pub package_id: Option<String>,
    #[serde(with = "not_available")]
    pub label_id: Option<String>,
    #[serde(with = "not_available")]
    pub marketplace_order_id: Option<String>,
    #[serde(with = "not_available")]
    pub freight: Option<String>,
    #[serde(with = "not_available")]
    pub seller: Option<String>,
    #[serde(with = "not_available")]
    pub cost_center: Option<String>,
    #[serde(with = "not_available")]
    pub carrier_status: Option<String>,
    #[serde(with = "not_available")]
    pub buyer_name: Option<String>,
    #[serde(with = "not_available")]
    pub postal_code: Option<String>,
    #[serde(with = "not_available")]
    pub street: Option<String>,
    #[serde(with = "not_available")]
    pub number: Option<String>,
    #[serde(with = "not_available")]
    pub neighborhood: Option<String>,
    #[serde(with = "not_available")]
    pub city: Option<String>,
    #[serde(with = "not_available")]
    pub complement: Option<String>,
    #[serde(with = "not_available")]
    pub status_date: Option<NaiveDate>,
    #[serde(with = "not_available")]
    pub promised_delivery: Option<NaiveDate>,
    #[serde(with = "not_available")]
    pub delivered_on: Option<NaiveDate>,
    #[serde(with = "not_available")]
    pub sla_text: Option<String>,
    #[serde(with = "not_available")]
    pub term_days: Option<String>,
    #[serde(with = "not_available")]
    pub delay_days: Option<String>,
}

/// A mother row joined with its carrier row. Unmatched orders carry an
/// all-missing `LooseRow`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    #[serde(flatten)]
    pub order: MotherRow,
    #[serde(flatten)]
    pub delivery: LooseRow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    #[serde(flatten)]
    pub record: MergedRecord,
    pub sla_outcome: SlaOutcome,
}

impl ClassifiedRecord {
    pub fn seller(&self) -> Option<&str> {
        self.record.delivery.seller.as_deref()
    }

    pub fn zone(&self) -> Option<&str> {
        self.record.order.zone.as_deref()
    }

    pub fn postal_code(&self) -> Option<&str> {
        self.record.delivery.postal_code.as_deref()
    }

    pub fn cost_center(&self) -> Option<&str> {
        self.record.delivery.cost_center.as_deref()
    }

    pub fn order_date(&self) -> Option<NaiveDate> {
        self.record.order.order_date
    }

    pub fn is_delayed(&self) -> bool {
        self.sla_outcome.is_delay()
    }

    pub fn is_on_time(&self) -> bool {
        self.sla_outcome == SlaOutcome::OnTime
    }
}

/// The `{job}_data` artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataDocument {
    pub data: Vec<ClassifiedRecord>,
}

/// The `{job}_kpis` artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub total_orders: usize,
    pub on_time: usize,
    pub late: usize,
    pub sla_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub name: String,
    pub volume: usize,
    pub delays: usize,
    pub sla_percentage: f64,
}

/// The `{job}_rankings` artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingSet {
    pub sellers_most_delays: Vec<RankingEntry>,
    pub zones_most_delays: Vec<RankingEntry>,
    pub sellers_highest_volume: Vec<RankingEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub mother_id: String,
    pub loose_id: String,
    #[serde(default)]
    pub message: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(mother_id: &str, loose_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            progress: 0,
            mother_id: mother_id.to_string(),
            loose_id: loose_id.to_string(),
            message: None,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: String,
    pub kind: UploadKind,
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Mother,
    Loose,
}

impl From<UploadKind> for TableRole {
    fn from(kind: UploadKind) -> Self {
        match kind {
            UploadKind::Mother => TableRole::Mother,
            UploadKind::Loose => TableRole::Loose,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: Uuid,
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
