//! Record parser for delimited transaction text.
//!
//! A message carries one or more comma-separated rows in the fixed
//! `transaction_id,Time,V1..V28,Amount,Class` layout, optionally preceded by
//! a header row. When a header is present, columns are located by name.
//!
//! The identifier is kept exactly as written (after unquoting); numeric and
//! label fields tolerate surrounding whitespace. Row numbers in errors count
//! from the first line of the payload, header included.

use crate::error::ParseError;
use crate::types::transaction::{
    TransactionRecord, COLUMN_NAMES, FIELD_COUNT, ID_COLUMN, V_FEATURE_COUNT,
};
use csv::{ReaderBuilder, StringRecord, Trim};

const TIME_COLUMN: usize = 1;
const FIRST_V_COLUMN: usize = 2;
const AMOUNT_COLUMN: usize = 30;
const CLASS_COLUMN: usize = 31;

/// Parses raw ingress payloads into [`TransactionRecord`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordParser;

impl RecordParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a payload that must contain exactly one data row.
    pub fn parse(&self, text: &str) -> Result<TransactionRecord, ParseError> {
        let mut records = self.parse_batch(text)?;
        if records.len() != 1 {
            return Err(ParseError::NotSingle(records.len()));
        }
        Ok(records.remove(0))
    }

    /// Parse every data row in a payload.
    ///
    /// Fails as a whole if any row is malformed.
    pub fn parse_batch(&self, text: &str) -> Result<Vec<TransactionRecord>, ParseError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::None)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| ParseError::Csv(e.to_string()))?;
            // whitespace-only line
            if row.len() == 1 && row[0].trim().is_empty() {
                continue;
            }
            rows.push(row);
        }

        let Some(first) = rows.first() else {
            return Err(ParseError::Empty);
        };

        let (layout, first_data_row) = if first.get(0).map(str::trim) == Some(ID_COLUMN) {
            (header_layout(first)?, 1)
        } else {
            (positional_layout(), 0)
        };
        let data = &rows[first_data_row..];

        if data.is_empty() {
            return Err(ParseError::Empty);
        }

        data.iter()
            .enumerate()
            .map(|(index, row)| parse_row(first_data_row + index, row, &layout))
            .collect()
    }
}

/// `layout[i]` is the row position holding `COLUMN_NAMES[i]`.
type Layout = [usize; FIELD_COUNT];

fn positional_layout() -> Layout {
    std::array::from_fn(|i| i)
}

fn header_layout(header: &StringRecord) -> Result<Layout, ParseError> {
    if header.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount {
            row: 0,
            expected: FIELD_COUNT,
            found: header.len(),
        });
    }

    let mut layout = [0usize; FIELD_COUNT];
    for (slot, name) in layout.iter_mut().zip(COLUMN_NAMES) {
        *slot = header
            .iter()
            .position(|column| column.trim() == name)
            .ok_or_else(|| ParseError::MissingColumn(name.to_string()))?;
    }
    Ok(layout)
}

fn parse_row(index: usize, row: &StringRecord, layout: &Layout) -> Result<TransactionRecord, ParseError> {
    if row.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount {
            row: index,
            expected: FIELD_COUNT,
            found: row.len(),
        });
    }

    let field = |column: usize| &row[layout[column]];
    let number = |column: usize| parse_number(index, column, field(column));

    let mut features = [0.0; V_FEATURE_COUNT];
    for (offset, value) in features.iter_mut().enumerate() {
        *value = number(FIRST_V_COLUMN + offset)?;
    }

    Ok(TransactionRecord {
        transaction_id: field(0).to_string(),
        time: number(TIME_COLUMN)?,
        features,
        amount: number(AMOUNT_COLUMN)?,
        class: parse_class(index, field(CLASS_COLUMN))?,
    })
}

fn parse_number(row: usize, column: usize, raw: &str) -> Result<f64, ParseError> {
    let value = raw.trim();
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber {
            row,
            field: COLUMN_NAMES[column].to_string(),
            value: value.to_string(),
        })
}

/// Empty means unlabeled; `1` and `1.0` are both accepted.
fn parse_class(row: usize, raw: &str) -> Result<Option<i64>, ParseError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(class) = value.parse::<i64>() {
        return Ok(Some(class));
    }
    match value.parse::<f64>() {
        Ok(v) if v.fract() == 0.0 && v.is_finite() => Ok(Some(v as i64)),
        _ => Err(ParseError::InvalidNumber {
            row,
            field: COLUMN_NAMES[CLASS_COLUMN].to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, fields: usize) -> String {
        let mut parts = vec![id.to_string()];
        parts.extend((1..fields).map(|i| format!("{}.5", i)));
        parts.join(",")
    }

    #[test]
    fn test_parse_single_record() {
        let parser = RecordParser::new();
        let text = format!("tx_1,406,{}100.50,0", "0.0,".repeat(28));

        let record = parser.parse(&text).unwrap();

        assert_eq!(record.transaction_id, "tx_1");
        assert_eq!(record.time, 406.0);
        assert_eq!(record.features, [0.0; 28]);
        assert_eq!(record.amount, 100.5);
        assert_eq!(record.class, Some(0));
    }

    #[test]
    fn test_field_count_boundaries() {
        let parser = RecordParser::new();

        let short = format!("{}", line("tx_1", 31));
        assert_eq!(
            parser.parse(&short),
            Err(ParseError::FieldCount {
                row: 0,
                expected: 32,
                found: 31
            })
        );

        let long = format!("{},", line("tx_1", 32));
        assert!(matches!(
            parser.parse(&long),
            Err(ParseError::FieldCount { found: 33, .. })
        ));

        // 32 fields where the last one is a non-integral label
        assert!(matches!(
            parser.parse(&line("tx_1", 32)),
            Err(ParseError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_empty_label_is_unlabeled() {
        let parser = RecordParser::new();
        let record = TransactionRecord::new("tx_9", 10.0, 5.0);

        let parsed = parser.parse(&record.to_csv_line().unwrap()).unwrap();

        assert_eq!(parsed, record);
        assert_eq!(parsed.class, None);
    }

    #[test]
    fn test_quoted_identifier() {
        let parser = RecordParser::new();
        let record = TransactionRecord::new("tx_7", 1.0, 2.0).with_class(1);
        let text = record.to_csv_line().unwrap().replacen("tx_7", "\"tx_7\"", 1);

        let parsed = parser.parse(&text).unwrap();
        assert_eq!(parsed.transaction_id, "tx_7");
        assert_eq!(parsed.class, Some(1));
    }

    #[test]
    fn test_header_row_is_skipped() {
        let parser = RecordParser::new();
        let record = TransactionRecord::new("tx_2", 55363.0, 100.5).with_class(0);
        let text = format!("{}\n{}", COLUMN_NAMES.join(","), record.to_csv_line().unwrap());

        let parsed = parser.parse(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_reordered_header_maps_by_name() {
        let parser = RecordParser::new();
        let mut header: Vec<&str> = COLUMN_NAMES.to_vec();
        header.swap(1, 30); // Amount before Time

        let mut fields = vec!["tx_3".to_string(), "12.5".to_string()];
        fields.extend((0..28).map(|i| i.to_string()));
        fields.push("900".to_string());
        fields.push("1".to_string());
        let text = format!("{}\n{}", header.join(","), fields.join(","));

        let parsed = parser.parse(&text).unwrap();
        assert_eq!(parsed.amount, 12.5);
        assert_eq!(parsed.time, 900.0);
        assert_eq!(parsed.features[27], 27.0);
    }

    #[test]
    fn test_header_missing_column() {
        let parser = RecordParser::new();
        let header = COLUMN_NAMES.join(",").replace("V13", "V99");
        let text = format!("{}\n{}", header, TransactionRecord::new("a", 0.0, 0.0).to_csv_line().unwrap());

        assert_eq!(
            parser.parse(&text),
            Err(ParseError::MissingColumn("V13".to_string()))
        );
    }

    #[test]
    fn test_batch_and_empty_inputs() {
        let parser = RecordParser::new();
        let text = format!(
            "{}\n\n{}\n",
            TransactionRecord::new("a", 1.0, 1.0).to_csv_line().unwrap(),
            TransactionRecord::new("b", 2.0, 2.0).to_csv_line().unwrap()
        );

        let batch = parser.parse_batch(&text).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].transaction_id, "b");
        assert_eq!(parser.parse(&text), Err(ParseError::NotSingle(2)));

        assert_eq!(parser.parse(""), Err(ParseError::Empty));
        assert_eq!(parser.parse(&COLUMN_NAMES.join(",")), Err(ParseError::Empty));
    }

    #[test]
    fn test_non_numeric_feature() {
        let parser = RecordParser::new();
        let text = TransactionRecord::new("tx_4", 1.0, 1.0)
            .to_csv_line().unwrap()
            .replacen(",0,", ",abc,", 1);

        let err = parser.parse(&text).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidNumber {
                row: 0,
                field: "V1".to_string(),
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_identifier_with_delimiters_round_trips() {
        let parser = RecordParser::new();

        for id in ["acct,42", "say \"hi\"", " tx 1 "] {
            let record = TransactionRecord::new(id, 3.0, 4.0).with_class(0);
            let parsed = parser.parse(&record.to_csv_line().unwrap()).unwrap();
            assert_eq!(parsed.transaction_id, id);
            assert_eq!(parsed, record);
        }
    }

    #[test]
    fn test_quoted_whitespace_in_identifier_is_kept() {
        let parser = RecordParser::new();
        let text = TransactionRecord::new("tx_5", 1.0, 2.0)
            .to_csv_line()
            .unwrap()
            .replacen("tx_5", "\" tx 1 \"", 1);

        let parsed = parser.parse(&text).unwrap();
        assert_eq!(parsed.transaction_id, " tx 1 ");
    }

    #[test]
    fn test_padded_numbers_are_accepted() {
        let parser = RecordParser::new();
        let text = format!("tx_6, 406 ,{} 100.50 , 1 ", "0.0,".repeat(28));

        let record = parser.parse(&text).unwrap();
        assert_eq!(record.time, 406.0);
        assert_eq!(record.amount, 100.5);
        assert_eq!(record.class, Some(1));
    }

    #[test]
    fn test_row_of_empty_fields_is_rejected() {
        let parser = RecordParser::new();
        let text = format!(
            "{}\n{}",
            TransactionRecord::new("a", 1.0, 1.0).to_csv_line().unwrap(),
            ",".repeat(FIELD_COUNT - 1)
        );

        assert_eq!(
            parser.parse_batch(&text),
            Err(ParseError::InvalidNumber {
                row: 1,
                field: "V1".to_string(),
                value: String::new()
            })
        );
    }

    #[test]
    fn test_error_rows_count_the_header() {
        let parser = RecordParser::new();
        let text = format!("{}\n{}", COLUMN_NAMES.join(","), line("tx_8", 31));

        assert_eq!(
            parser.parse(&text),
            Err(ParseError::FieldCount {
                row: 1,
                expected: 32,
                found: 31
            })
        );
    }
}
