//! Columnar table used between ingestion, feature engineering and selection.
//!
//! Every row has a parsed timestamp; every other column is a named vector of
//! optional `f64` values, where `None` marks a missing cell. Column order is
//! insertion order.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    timestamps: Vec<NaiveDateTime>,
    columns: Vec<Column>,
}

impl Table {
    pub fn new(timestamps: Vec<NaiveDateTime>) -> Self {
        Self {
            timestamps,
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Like [`Table::column`] but absence is an error.
    pub fn require(&self, name: &str) -> PipelineResult<&[Option<f64>]> {
        self.column(name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    }

    /// Adds a column, replacing any existing column of the same name in place.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> PipelineResult<()> {
        if values.len() != self.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }
        let name = name.into();
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
        Ok(())
    }

    /// Convenience for columns without missing cells.
    pub fn insert_dense(&mut self, name: impl Into<String>, values: Vec<f64>) -> PipelineResult<()> {
        self.insert_column(name, values.into_iter().map(Some).collect())
    }

    /// Renames `from` to `to`. Returns whether `from` existed.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.columns.iter_mut().find(|c| c.name == from) {
            Some(column) => {
                column.name = to.to_string();
                true
            }
            None => false,
        }
    }

    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    /// New table holding the given rows, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Table {
        Table {
            timestamps: indices.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: indices.iter().map(|&i| c.values[i]).collect(),
                })
                .collect(),
        }
    }

    /// Stable sort by timestamp; rows with equal timestamps keep file order.
    pub fn sorted_by_timestamp(&self) -> Table {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        self.take_rows(&order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = Table::new(vec![ts(1), ts(2)]);
        table.insert_dense("a", vec![1.0, 2.0]).unwrap();
        table.insert_column("b", vec![None, Some(3.0)]).unwrap();

        assert_eq!(table.column_names(), vec!["a", "b"]);
        assert_eq!(table.column("b").unwrap(), &[None, Some(3.0)]);
        assert!(table.require("c").is_err());
    }

    #[test]
    fn test_insert_rejects_wrong_length() {
        let mut table = Table::new(vec![ts(1), ts(2)]);
        let err = table.insert_dense("a", vec![1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut table = Table::new(vec![ts(1)]);
        table.insert_dense("a", vec![1.0]).unwrap();
        table.insert_dense("b", vec![2.0]).unwrap();
        table.insert_dense("a", vec![9.0]).unwrap();
        assert_eq!(table.column_names(), vec!["a", "b"]);
        assert_eq!(table.column("a").unwrap(), &[Some(9.0)]);
    }

    #[test]
    fn test_rename_and_drop() {
        let mut table = Table::new(vec![ts(1)]);
        table.insert_dense("x", vec![1.0]).unwrap();
        assert!(table.rename_column("x", "y"));
        assert!(!table.rename_column("x", "z"));
        assert!(table.drop_column("y").is_some());
        assert!(table.column_names().is_empty());
    }

    #[test]
    fn test_sort_is_stable() {
        let mut table = Table::new(vec![ts(5), ts(1), ts(5), ts(3)]);
        table.insert_dense("v", vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let sorted = table.sorted_by_timestamp();
        assert_eq!(sorted.timestamps(), &[ts(1), ts(3), ts(5), ts(5)]);
        assert_eq!(
            sorted.column("v").unwrap(),
            &[Some(1.0), Some(3.0), Some(0.0), Some(2.0)]
        );
    }
}
