//! Projection of heterogeneous items onto one CSV column set.
//!
//! Rows are buffered until the table is fully read: the header is the union
//! of every attribute seen, key attributes first, then the rest in the order
//! they were first met. Rows lacking a column get an empty field.

use std::collections::HashMap;
use std::io;

use csv::{Terminator, WriterBuilder};

use crate::item::Item;

pub struct CsvProjector {
    columns: Vec<String>,
    positions: HashMap<String, usize>,
    rows: Vec<Vec<(usize, String)>>,
    null_sentinel: Option<String>,
}

impl CsvProjector {
    pub fn new(null_sentinel: Option<String>) -> Self {
        Self {
            columns: Vec::new(),
            positions: HashMap::new(),
            rows: Vec::new(),
            null_sentinel,
        }
    }

    /// Pin these columns to the front of the header, in this order.
    pub fn with_leading_columns(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        for column in columns {
            self.position(&column);
        }
        self
    }

    fn position(&mut self, column: &str) -> usize {
        if let Some(&index) = self.positions.get(column) {
            return index;
        }
        let index = self.columns.len();
        self.columns.push(column.to_string());
        self.positions.insert(column.to_string(), index);
        index
    }

    pub fn push(&mut self, item: &Item) {
        let sentinel = self.null_sentinel.clone();
        let row = item
            .iter()
            .map(|(name, value)| (self.position(name), value.to_field(sentinel.as_deref())))
            .collect();
        self.rows.push(row);
    }

    pub fn extend<'a>(&mut self, items: impl IntoIterator<Item = &'a Item>) {
        for item in items {
            self.push(item);
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Write the header and every row; returns the number of lines written.
    pub fn write_to<W: io::Write>(self, sink: W) -> Result<u64, csv::Error> {
        let mut writer = WriterBuilder::new()
            .terminator(Terminator::CRLF)
            .from_writer(sink);

        writer.write_record(&self.columns)?;
        let mut lines = 1;

        let mut record = vec![String::new(); self.columns.len()];
        for row in self.rows {
            record.iter_mut().for_each(String::clear);
            for (index, field) in row {
                record[index] = field;
            }
            writer.write_record(&record)?;
            lines += 1;
        }

        writer.flush()?;
        Ok(lines)
    }

    pub fn to_bytes(self) -> Result<(Vec<u8>, u64), csv::Error> {
        let mut buffer = Vec::new();
        let lines = self.write_to(&mut buffer)?;
        Ok((buffer, lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemValue;

    fn item(pairs: &[(&str, ItemValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn render(projector: CsvProjector) -> String {
        String::from_utf8(projector.to_bytes().unwrap().0).unwrap()
    }

    #[test]
    fn test_union_of_columns_with_keys_first() {
        let mut projector = CsvProjector::new(None).with_leading_columns(["id".to_string()]);
        projector.push(&item(&[
            ("id", ItemValue::string("1")),
            ("name", ItemValue::string("Kings")),
        ]));
        projector.push(&item(&[
            ("city", ItemValue::string("Sydney")),
            ("id", ItemValue::string("2")),
        ]));

        assert_eq!(projector.columns(), ["id", "name", "city"]);
        assert_eq!(render(projector), "id,name,city\r\n1,Kings,\r\n2,,Sydney\r\n");
    }

    #[test]
    fn test_fields_are_escaped() {
        let mut projector = CsvProjector::new(None);
        projector.push(&item(&[(
            "note",
            ItemValue::string("said \"hi\", then\nleft"),
        )]));
        assert_eq!(
            render(projector),
            "note\r\n\"said \"\"hi\"\", then\nleft\"\r\n"
        );
    }

    #[test]
    fn test_nested_values_and_nulls() {
        let mut projector = CsvProjector::new(Some("NULL".into()));
        projector.push(&item(&[
            ("a", ItemValue::L(vec![ItemValue::number(1), ItemValue::Bool(false)])),
            ("b", ItemValue::Null),
        ]));
        assert_eq!(render(projector), "a,b\r\n\"[1,false]\",NULL\r\n");
    }

    #[test]
    fn test_same_items_same_bytes() {
        let items = vec![
            item(&[("id", ItemValue::string("1")), ("x", ItemValue::number(3))]),
            item(&[("id", ItemValue::string("2")), ("y", ItemValue::Bool(true))]),
        ];
        let mut first = CsvProjector::new(None);
        first.extend(&items);
        let mut second = CsvProjector::new(None);
        second.extend(&items);

        let (bytes, lines) = first.to_bytes().unwrap();
        assert_eq!(lines, 3);
        assert_eq!(bytes, second.to_bytes().unwrap().0);
    }
}
