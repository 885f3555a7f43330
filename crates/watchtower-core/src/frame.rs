//! The numeric view over schema-flexible feature rows.
//!
//! Column eligibility is decided on the baseline alone: a column is numeric
//! when at least one baseline value is a number and none is text or a
//! boolean. The current batch is then aligned onto those columns.

use std::collections::BTreeSet;

use crate::{
  Error, Result,
  row::{FeatureMap, FieldValue},
};

/// A single named column; `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericColumn {
  pub name:   String,
  pub values: Vec<Option<f64>>,
}

impl NumericColumn {
  /// Values with missing entries dropped.
  pub fn present(&self) -> Vec<f64> { self.values.iter().flatten().copied().collect() }
}

/// Column-major numeric table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericFrame {
  columns: Vec<NumericColumn>,
  n_rows:  usize,
}

impl NumericFrame {
  /// Build the baseline view, selecting eligible columns.
  pub fn from_baseline<'a, I>(rows: I) -> Self
  where
    I: IntoIterator<Item = &'a FeatureMap>,
  {
    let rows: Vec<&FeatureMap> = rows.into_iter().collect();
    let mut names = BTreeSet::new();
    let mut rejected = BTreeSet::new();
    for row in &rows {
      for (name, value) in row.iter() {
        match value {
          FieldValue::Number(n) if n.is_finite() => {
            names.insert(name.as_str());
          }
          FieldValue::Text(_) | FieldValue::Bool(_) => {
            rejected.insert(name.as_str());
          }
          _ => {}
        }
      }
    }

    let columns = names
      .difference(&rejected)
      .map(|name| NumericColumn {
        name:   (*name).to_owned(),
        values: rows
          .iter()
          .map(|row| row.get(*name).and_then(FieldValue::as_number))
          .collect(),
      })
      .collect();
    Self { columns, n_rows: rows.len() }
  }

  /// Project `rows` onto this frame's columns.
  ///
  /// Fails when a column never appears in `rows` or carries a non-numeric
  /// value there.
  pub fn align<'a, I>(&self, rows: I) -> Result<Self>
  where
    I: IntoIterator<Item = &'a FeatureMap>,
  {
    let rows: Vec<&FeatureMap> = rows.into_iter().collect();
    let mut columns = Vec::with_capacity(self.columns.len());
    for column in &self.columns {
      let name = column.name.as_str();
      if !rows.iter().any(|row| row.contains_key(name)) {
        return Err(Error::SchemaMismatch {
          column: name.to_owned(),
          reason: "absent from the current batch".into(),
        });
      }
      let mut values = Vec::with_capacity(rows.len());
      for row in &rows {
        match row.get(name) {
          Some(FieldValue::Text(_) | FieldValue::Bool(_)) => {
            return Err(Error::SchemaMismatch {
              column: name.to_owned(),
              reason: "non-numeric value in the current batch".into(),
            });
          }
          Some(value) => values.push(value.as_number()),
          None => values.push(None),
        }
      }
      columns.push(NumericColumn { name: name.to_owned(), values });
    }
    Ok(Self { columns, n_rows: rows.len() })
  }

  pub fn columns(&self) -> &[NumericColumn] { &self.columns }

  pub fn column(&self, name: &str) -> Option<&NumericColumn> {
    self.columns.iter().find(|c| c.name == name)
  }

  pub fn column_names(&self) -> impl Iterator<Item = &str> {
    self.columns.iter().map(|c| c.name.as_str())
  }

  pub fn n_rows(&self) -> usize { self.n_rows }

  pub fn n_columns(&self) -> usize { self.columns.len() }

  /// Row-major matrix with missing values replaced by `fill`.
  pub fn to_rows(&self, fill: f64) -> Vec<Vec<f64>> {
    (0..self.n_rows)
      .map(|i| {
        self
          .columns
          .iter()
          .map(|c| c.values[i].unwrap_or(fill))
          .collect()
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(json: &str) -> FeatureMap { serde_json::from_str(json).unwrap() }

  #[test]
  fn baseline_selects_numeric_columns() {
    let rows = [
      row(r#"{"age": 30, "city": "Oslo", "flag": null}"#),
      row(r#"{"age": null, "city": "Rome", "mixed": 1}"#),
      row(r#"{"mixed": "x", "income": 5.5}"#),
    ];
    let frame = NumericFrame::from_baseline(&rows);
    let names: Vec<&str> = frame.column_names().collect();
    assert_eq!(names, ["age", "income"]);
    assert_eq!(frame.column("age").unwrap().values, [Some(30.0), None, None]);
    assert_eq!(frame.n_rows(), 3);
  }

  #[test]
  fn align_rejects_missing_and_textual_columns() {
    let base = NumericFrame::from_baseline(&[row(r#"{"age": 30}"#)]);

    let err = base.align(&[row(r#"{"height": 1.8}"#)]).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { ref column, .. } if column == "age"));

    let err = base.align(&[row(r#"{"age": "old"}"#)]).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));

    let current = base.align(&[row(r#"{"age": 31}"#), row("{}")]).unwrap();
    assert_eq!(current.column("age").unwrap().values, [Some(31.0), None]);
  }

  #[test]
  fn to_rows_fills_missing() {
    let frame = NumericFrame::from_baseline(&[
      row(r#"{"a": 1, "b": 2}"#),
      row(r#"{"a": 3}"#),
    ]);
    assert_eq!(frame.to_rows(0.0), vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
  }
}
