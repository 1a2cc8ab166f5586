use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::SaveFormat;

/// Trial-by-trial results of a run.
///
/// Cells are added to the current entry with [`ResultsTable::add_data`] and committed with
/// [`ResultsTable::next_entry`]. Columns keep the order in which they were first seen; extra-info
/// columns (participant, date, ...) are appended to every row on serialization.
#[derive(Debug, Clone, Default)]
pub struct ResultsTable {
    columns: Vec<String>,
    rows: Vec<HashMap<String, Value>>,
    current: HashMap<String, Value>,
    extra_info: Vec<(String, String)>,
    finished: bool,
    completed: bool,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a run-level value repeated on every row.
    pub fn with_extra_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_extra_info(key, value);
        self
    }

    pub fn set_extra_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.extra_info.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.extra_info.push((key, value)),
        }
    }

    pub fn extra_info(&self, key: &str) -> Option<&str> {
        self.extra_info
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a cell of the current entry, overwriting a previous value for the same key.
    pub fn add_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if !self.columns.contains(&key) {
            self.columns.push(key.clone());
        }
        self.current.insert(key, value.into());
    }

    /// Commit the current entry; an empty entry is not committed.
    pub fn next_entry(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let row = std::mem::take(&mut self.current);
        self.rows.push(row);
    }

    pub fn is_entry_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Number of committed rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.current.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Cells of `key` in the committed rows, `None` where a row has no such cell.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.rows.iter().map(move |row| row.get(key))
    }

    /// Mark the run as ended; `completed` tells whether the flow reached its end.
    pub fn set_finished(&mut self, completed: bool) {
        self.finished = true;
        self.completed = completed;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Serialize committed rows plus a non-empty pending entry.
    pub fn serialize(&self, format: SaveFormat) -> String {
        match format {
            SaveFormat::Csv => self.to_delimited(','),
            SaveFormat::Tsv => self.to_delimited('\t'),
            SaveFormat::Json => self.to_json(),
        }
    }

    fn header(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(String::as_str)
            .chain(self.extra_info.iter().map(|(k, _)| k.as_str()))
            .collect()
    }

    fn all_rows(&self) -> impl Iterator<Item = &HashMap<String, Value>> {
        let pending = (!self.current.is_empty()).then_some(&self.current);
        self.rows.iter().chain(pending)
    }

    fn to_delimited(&self, delimiter: char) -> String {
        let mut out = String::new();
        let header = self.header();
        push_line(&mut out, header.iter().map(|h| escape(h, delimiter)), delimiter);

        for row in self.all_rows() {
            let cells = self
                .columns
                .iter()
                .map(|col| row.get(col).map(cell_text).unwrap_or_default())
                .chain(self.extra_info.iter().map(|(_, v)| v.clone()))
                .map(|cell| escape(&cell, delimiter));
            push_line(&mut out, cells, delimiter);
        }
        out
    }

    fn to_json(&self) -> String {
        let rows: Vec<Value> = self
            .all_rows()
            .map(|row| {
                let mut obj = Map::new();
                for col in &self.columns {
                    obj.insert(col.clone(), row.get(col).cloned().unwrap_or(Value::Null));
                }
                for (k, v) in &self.extra_info {
                    obj.insert(k.clone(), Value::String(v.clone()));
                }
                Value::Object(obj)
            })
            .collect();
        Value::Array(rows).to_string()
    }
}

fn push_line<I>(out: &mut String, cells: I, delimiter: char)
where
    I: Iterator<Item = String>,
{
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(delimiter);
        }
        out.push_str(&cell);
        first = false;
    }
    out.push('\n');
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape(cell: &str, delimiter: char) -> String {
    if cell.contains(delimiter) || cell.contains('"') || cell.contains('\n') || cell.contains('\r')
    {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_trials() -> ResultsTable {
        let mut table = ResultsTable::new().with_extra_info("participant", "p01");
        table.add_data("word", "red");
        table.add_data("rt", 0.512);
        table.next_entry();
        table.add_data("word", "green, dark");
        table.add_data("correct", true);
        table.next_entry();
        table
    }

    #[test]
    fn csv_keeps_first_seen_column_order() {
        let csv = two_trials().serialize(SaveFormat::Csv);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "word,rt,correct,participant");
        assert_eq!(lines[1], "red,0.512,,p01");
        assert_eq!(lines[2], "\"green, dark\",,true,p01");
    }

    #[test]
    fn tsv_does_not_quote_commas() {
        let tsv = two_trials().serialize(SaveFormat::Tsv);
        assert!(tsv.lines().nth(2).unwrap().starts_with("green, dark\t"));
    }

    #[test]
    fn pending_entry_is_included() {
        let mut table = two_trials();
        table.add_data("word", "blue");
        assert!(!table.is_entry_empty());

        let csv = table.serialize(SaveFormat::Csv);
        assert_eq!(csv.lines().count(), 4);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn empty_entry_is_not_committed() {
        let mut table = ResultsTable::new();
        table.next_entry();
        assert!(table.is_empty());
    }

    #[test]
    fn json_rows_carry_extra_info() {
        let json = two_trials().serialize(SaveFormat::Json);
        let rows: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["participant"], "p01");
        assert_eq!(rows[1]["rt"], Value::Null);
    }

    #[test]
    fn quotes_are_doubled() {
        let mut table = ResultsTable::new();
        table.add_data("answer", "say \"hi\"");
        table.next_entry();
        let csv = table.serialize(SaveFormat::Csv);
        assert_eq!(csv.lines().nth(1), Some("\"say \"\"hi\"\"\""));
    }

    #[test]
    fn finished_flags() {
        let mut table = ResultsTable::new();
        assert!(!table.is_finished());
        table.set_finished(false);
        assert!(table.is_finished());
        assert!(!table.is_completed());
    }

    #[test]
    fn values_follow_committed_rows() {
        let table = two_trials();
        let correct: Vec<_> = table.values("correct").collect();
        assert_eq!(correct, vec![None, Some(&Value::Bool(true))]);
    }
}
