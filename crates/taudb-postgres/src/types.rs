//! Converting simple-protocol result messages into rows.

use postgres::SimpleQueryMessage;
use taudb_core::{ColumnInfo, Row, Value};

/// Collect the row messages out of a simple-query response.
///
/// SQL NULL arrives as an absent field and maps to [`Value::Null`];
/// everything else is text. Command-completion messages are skipped, so a
/// multi-statement batch yields the concatenation of its result sets.
pub(crate) fn collect_rows(messages: Vec<SimpleQueryMessage>) -> Vec<Row> {
    let mut rows = Vec::new();
    let mut columns: Option<std::sync::Arc<ColumnInfo>> = None;

    for message in messages {
        match message {
            SimpleQueryMessage::Row(pg_row) => {
                let info = columns.get_or_insert_with(|| {
                    ColumnInfo::new(
                        pg_row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect(),
                    )
                });
                let values = (0..pg_row.len())
                    .map(|i| {
                        pg_row
                            .get(i)
                            .map_or(Value::Null, |text| Value::Text(text.to_string()))
                    })
                    .collect();
                rows.push(Row::new(info.clone(), values));
            }
            SimpleQueryMessage::CommandComplete(_) => {
                // A new statement's rows may have a different shape.
                columns = None;
            }
            _ => {}
        }
    }
    rows
}
