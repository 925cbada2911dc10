use std::collections::HashMap;

use crate::models::{LooseRow, MergedRecord, MotherRow};

/// Left join of the manifest onto the carrier rows by order id. Repeated
/// marketplace ids fan out into one record per carrier row.
pub fn merge(mother: Vec<MotherRow>, loose: &[LooseRow]) -> Vec<MergedRecord> {
    let mut by_order: HashMap<&str, Vec<&LooseRow>> = HashMap::new();
    for row in loose {
        if let Some(order_id) = row.marketplace_order_id.as_deref() {
            by_order.entry(order_id).or_default().push(row);
        }
    }

    let duplicated = by_order.values().filter(|rows| rows.len() > 1).count();
    if duplicated > 0 {
        tracing::warn!(
            duplicated,
            "loose table repeats marketplace order ids; matching orders fan out"
        );
    }

    let mut merged = Vec::with_capacity(mother.len());
    for order in mother {
        let matches = order
            .order_id
            .as_deref()
            .and_then(|order_id| by_order.get(order_id));

        match matches {
            Some(rows) => merged.extend(rows.iter().map(|delivery| MergedRecord {
                order: order.clone(),
                delivery: (*delivery).clone(),
            })),
            None => merged.push(MergedRecord {
                order,
                delivery: LooseRow::default(),
            }),
        }
    }
    merged
}
