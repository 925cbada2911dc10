use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ClassifiedRecord, MergedRecord};

/// Delivery timeliness verdict. The serialized labels are the ones the
/// dashboard consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlaOutcome {
    #[serde(rename = "Dentro do prazo")]
    OnTime,
    #[serde(rename = "Entregue com atraso")]
    DeliveredLate,
    /// Counted as a delay everywhere, never produced by `classify`.
    #[serde(rename = "Fora do prazo")]
    OutOfDeadline,
    #[serde(rename = "Não entregue")]
    NotDelivered,
    #[serde(rename = "Dados inválidos")]
    InvalidData,
}

impl SlaOutcome {
    pub const ALL: [SlaOutcome; 5] = [
        SlaOutcome::OnTime,
        SlaOutcome::DeliveredLate,
        SlaOutcome::OutOfDeadline,
        SlaOutcome::NotDelivered,
        SlaOutcome::InvalidData,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SlaOutcome::OnTime => "Dentro do prazo",
            SlaOutcome::DeliveredLate => "Entregue com atraso",
            SlaOutcome::OutOfDeadline => "Fora do prazo",
            SlaOutcome::NotDelivered => "Não entregue",
            SlaOutcome::InvalidData => "Dados inválidos",
        }
    }

    pub fn is_delay(self) -> bool {
        matches!(self, SlaOutcome::DeliveredLate | SlaOutcome::OutOfDeadline)
    }
}

impl fmt::Display for SlaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn classify(record: &MergedRecord) -> SlaOutcome {
    let delivery = &record.delivery;
    let (Some(promised), Some(delivered)) = (delivery.promised_delivery, delivery.delivered_on)
    else {
        return SlaOutcome::NotDelivered;
    };

    if delivery.term_days.as_deref().map_or(false, |term| parse_term(term).is_none()) {
        return SlaOutcome::InvalidData;
    }

    if delivered <= promised {
        SlaOutcome::OnTime
    } else {
        SlaOutcome::DeliveredLate
    }
}

pub fn classify_all(records: Vec<MergedRecord>) -> Vec<ClassifiedRecord> {
    records
        .into_iter()
        .map(|record| {
            let sla_outcome = classify(&record);
            ClassifiedRecord { record, sla_outcome }
        })
        .collect()
}

/// Whole days, accepting the `5.0` form spreadsheet exports give integers.
pub fn parse_term(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(days) = raw.parse::<i64>() {
        return Some(days);
    }
    match raw.parse::<f64>() {
        Ok(days) if days.is_finite() && days.fract() == 0.0 => Some(days as i64),
        _ => None,
    }
}
