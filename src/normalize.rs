use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{PipelineError, Result, TableRole};
use crate::models::{not_available, LooseRow, MotherRow};
use crate::table::RawTable;

pub const MOTHER_COLUMNS: [&str; 8] = [
    "Data Pedido",
    "Pedido",
    "Status do Dia",
    "Beep do Dia",
    "Cliente",
    "Conta",
    "Zona",
    "Responsabilidade",
];

pub const LOOSE_COLUMNS: [&str; 23] = [
    "Bipagem",
    "criacao",
    "deveria_ser_entregue",
    "pacote",
    "etiqueta",
    "pedido_marketplace",
    "Frete",
    "Vendedor",
    "Centro de custo",
    "status_dia",
    "Nome Comprador",
    "CEP",
    "Logradouro",
    "Número",
    "Bairro",
    "Cidade",
    "Complemento",
    "data_status_dia",
    "PREVISÃO DE ENTREGA",
    "ENTREGA",
    "SLA",
    "Prazo",
    "Atraso",
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

const DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Positions of the required columns, in the order they were requested.
pub struct Columns(Vec<usize>);

impl Columns {
    fn cell<'a>(&self, row: &'a [String], slot: usize) -> &'a str {
        row.get(self.0[slot]).map(String::as_str).unwrap_or_default()
    }
}

/// Rejects empty tables, then resolves every required column or reports all
/// the ones that are absent.
pub fn validate(table: &RawTable, required: &[&str], role: TableRole) -> Result<Columns> {
    if table.is_empty() {
        return Err(PipelineError::EmptyInput(role));
    }

    let mut positions = Vec::with_capacity(required.len());
    let mut missing = Vec::new();
    for name in required {
        match table.column(name) {
            Some(position) => positions.push(position),
            None => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::Schema { role, missing });
    }
    Ok(Columns(positions))
}

pub fn normalize_mother(table: &RawTable) -> Result<Vec<MotherRow>> {
    let columns = validate(table, &MOTHER_COLUMNS, TableRole::Mother)?;

    Ok(table
        .rows
        .iter()
        .map(|row| MotherRow {
            order_date: parse_date(columns.cell(row, 0)),
            order_id: text(columns.cell(row, 1)),
            daily_status: text(columns.cell(row, 2)),
            daily_scan: text(columns.cell(row, 3)),
            customer: text(columns.cell(row, 4)),
            account: text(columns.cell(row, 5)),
            zone: text(columns.cell(row, 6)).map(|zone| title_case(&zone)),
            responsibility: text(columns.cell(row, 7)),
        })
        .collect())
}

/// Keeps only marketplace-partner rows with a numeric marketplace order id,
/// then cleans dates, postal code, status and seller name.
pub fn normalize_loose(table: &RawTable, marketplace_token: &str) -> Result<Vec<LooseRow>> {
    let columns = validate(table, &LOOSE_COLUMNS, TableRole::Loose)?;
    let token = marketplace_token.to_lowercase();

    let rows = table
        .rows
        .iter()
        .filter(|row| columns.cell(row, 7).to_lowercase().contains(&token))
        .filter(|row| is_numeric_id(columns.cell(row, 5).trim()))
        .map(|row| {
            let cell = |slot| columns.cell(row, slot);
            LooseRow {
                scan: text(cell(0)),
                created_on: parse_date(cell(1)),
                expected_delivery: parse_date(cell(2)),
                package_id: text(cell(3)),
                label_id: text(cell(4)),
                marketplace_order_id: text(cell(5)),
                freight: text(cell(6)),
                seller: text(cell(7)).map(|seller| title_case(&seller)),
                cost_center: text(cell(8)).map(|center| center.to_uppercase()),
                carrier_status: text(cell(9)).map(|status| status.to_lowercase()),
                buyer_name: text(cell(10)),
                postal_code: text(&digits_only(cell(11))),
                street: text(cell(12)),
                number: text(cell(13)),
                neighborhood: text(cell(14)),
                city: text(cell(15)),
                complement: text(cell(16)),
                status_date: parse_date(cell(17)),
                promised_delivery: parse_date(cell(18)),
                delivered_on: parse_date(cell(19)),
                sla_text: text(cell(20)),
                term_days: text(cell(21)),
                delay_days: text(cell(22)),
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        kept = rows.len(),
        dropped = table.rows.len() - rows.len(),
        "filtered loose table"
    );
    Ok(rows)
}

/// Permissive date parsing. Slashed dates are read day-first; anything that
/// matches no known layout is treated as missing.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() || raw == not_available::SENTINEL {
        return None;
    }

    if let Ok(moment) = DateTime::parse_from_rfc3339(raw) {
        return Some(moment.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|moment| moment.date())
        })
}

fn text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == not_available::SENTINEL {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_numeric_id(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit())
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest.
pub fn title_case(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let mut previous_is_letter = false;
    for c in raw.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                output.extend(c.to_lowercase());
            } else {
                output.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            output.push(c);
            previous_is_letter = false;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{sla_by_group, GroupField};
    use crate::merge::merge;
    use crate::sla::classify_all;

    fn loose_table(rows: &[[&str; 23]]) -> RawTable {
        RawTable {
            headers: LOOSE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    fn loose_row<'a>(seller: &'a str, order: &'a str) -> [&'a str; 23] {
        [
            "sim", "2024-01-02", "2024-01-09", "PK1", "ET1", order, "12,50", seller, "CC1",
            "  ENTREGUE ", "Ana", "01310-100", "Av. Paulista", "1000", "Bela Vista",
            "São Paulo", "", "2024-01-08", "10/01/2024", "2024-01-09 14:30:00", "ok", "7", "",
        ]
    }

    #[test]
    fn empty_table_is_rejected_before_schema_check() {
        let table = RawTable {
            headers: vec!["Pedido".to_string()],
            rows: Vec::new(),
        };
        let err = normalize_mother(&table).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput(TableRole::Mother)));
    }

    #[test]
    fn reports_all_missing_columns() {
        let table = RawTable {
            headers: vec!["Pedido".to_string(), "Zona".to_string()],
            rows: vec![vec!["1".to_string(), "Norte".to_string()]],
        };
        match normalize_mother(&table).unwrap_err() {
            PipelineError::Schema { role, missing } => {
                assert_eq!(role, TableRole::Mother);
                assert_eq!(missing.len(), 6);
                assert!(missing.contains(&"Data Pedido".to_string()));
                assert!(!missing.contains(&"Zona".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mother_dates_are_canonical_and_blanks_missing() {
        let table = RawTable {
            headers: MOTHER_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: vec![
                ["05/01/2024", " 100 ", "ok", "", "ACME", "C1", "Norte", "ops"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                ["not a date", "101", "", "", "", "", "", ""]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            ],
        };
        let rows = normalize_mother(&table).unwrap();
        assert_eq!(rows[0].order_date, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(rows[0].order_id.as_deref(), Some("100"));
        assert_eq!(rows[0].daily_scan, None);
        assert_eq!(rows[1].order_date, None);
        assert_eq!(rows[1].zone, None);
    }

    #[test]
    fn zone_spellings_collapse_into_one_group() {
        let table = RawTable {
            headers: MOTHER_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: ["Norte", "NORTE ", "norte"]
                .iter()
                .enumerate()
                .map(|(i, zone)| {
                    let id = (i + 1).to_string();
                    ["2024-01-05", id.as_str(), "", "", "", "", *zone, ""]
                        .iter()
                        .map(|c| c.to_string())
                        .collect()
                })
                .collect(),
        };
        let mother = normalize_mother(&table).unwrap();
        assert!(mother.iter().all(|row| row.zone.as_deref() == Some("Norte")));

        let records = classify_all(merge(mother, &[]));
        let groups = sla_by_group(&records, GroupField::Zone);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "Norte");
        assert_eq!(groups[0].total, 3);
    }

    #[test]
    fn cost_centers_are_upper_cased() {
        let mut lower = loose_row("Meli", "123");
        lower[8] = " cc1 ";
        let rows = normalize_loose(&loose_table(&[lower, loose_row("Meli", "124")]), "meli").unwrap();
        assert!(rows.iter().all(|row| row.cost_center.as_deref() == Some("CC1")));
    }

    #[test]
    fn loose_filters_drop_foreign_sellers_and_non_numeric_ids() {
        let table = loose_table(&[
            loose_row("MELI Store", "123"),
            loose_row("Other Shop", "124"),
            loose_row("meli outlet", "MLB-125"),
            loose_row("", "126"),
        ]);
        let rows = normalize_loose(&table, "meli").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].marketplace_order_id.as_deref(), Some("123"));
    }

    #[test]
    fn loose_cleanup_canonicalizes_fields() {
        let table = loose_table(&[loose_row("  MELI store-centro ", "123")]);
        let row = normalize_loose(&table, "MELI").unwrap().remove(0);
        assert_eq!(row.seller.as_deref(), Some("Meli Store-Centro"));
        assert_eq!(row.carrier_status.as_deref(), Some("entregue"));
        assert_eq!(row.postal_code.as_deref(), Some("01310100"));
        assert_eq!(row.promised_delivery, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert_eq!(row.delivered_on, NaiveDate::from_ymd_opt(2024, 1, 9));
        assert_eq!(row.complement, None);
        assert_eq!(row.delay_days, None);
    }

    #[test]
    fn parses_common_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7);
        for raw in [
            "2024-03-07",
            "07/03/2024",
            "2024-03-07 08:15:00",
            "2024-03-07T08:15:00.250",
            "2024-03-07T08:15:00-03:00",
            "07/03/2024 08:15",
        ] {
            assert_eq!(parse_date(raw), expected, "{raw}");
        }
        assert_eq!(parse_date("N/A"), None);
        assert_eq!(parse_date("31/02/2024"), None);
    }

    #[test]
    fn title_case_follows_word_boundaries() {
        assert_eq!(title_case("MELI o'neil"), "Meli O'Neil");
        assert_eq!(title_case("loja 2go"), "Loja 2Go");
    }
}
