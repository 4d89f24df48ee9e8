use super::ModelError;

/// Dense row-major matrix of finite `f64` features.
///
/// Column set and order are fixed for the whole matrix; every row has
/// exactly `n_features()` values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Vec<f64>,
    n_rows: usize,
}

impl FeatureMatrix {
    /// Build from per-row vectors. Rejects an empty column set, ragged rows
    /// and `NaN`/`inf` values.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, ModelError> {
        if columns.is_empty() {
            return Err(ModelError::NoNumericColumns);
        }
        let width = columns.len();
        let n_rows = rows.len();
        let mut values = Vec::with_capacity(n_rows * width);

        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(ModelError::RaggedRow {
                    row: row_idx,
                    expected: width,
                    got: row.len(),
                });
            }
            if let Some(col) = row.iter().position(|v| !v.is_finite()) {
                return Err(ModelError::NonFiniteValue {
                    row: row_idx,
                    column: columns[col].clone(),
                });
            }
            values.extend(row);
        }

        Ok(Self {
            columns,
            values,
            n_rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        let w = self.n_features();
        &self.values[idx * w..(idx + 1) * w]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.n_features())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rows_preserve_order() {
        let m = FeatureMatrix::from_rows(
            cols(&["bytes", "duration"]),
            vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
        )
        .unwrap();
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.n_features(), 2);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        let collected: Vec<&[f64]> = m.rows().collect();
        assert_eq!(collected, vec![&[1.0, 2.0][..], &[3.0, 4.0][..], &[5.0, 6.0][..]]);
    }

    #[test]
    fn test_no_columns_rejected() {
        let err = FeatureMatrix::from_rows(vec![], vec![vec![], vec![]]).unwrap_err();
        assert_eq!(err, ModelError::NoNumericColumns);
    }

    #[test]
    fn test_non_finite_rejected_with_location() {
        let err = FeatureMatrix::from_rows(
            cols(&["bytes", "duration"]),
            vec![vec![1.0, 2.0], vec![3.0, f64::NAN]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::NonFiniteValue {
                row: 1,
                column: "duration".to_string()
            }
        );
    }

    #[test]
    fn test_ragged_row_rejected() {
        let err = FeatureMatrix::from_rows(cols(&["a", "b"]), vec![vec![1.0]]).unwrap_err();
        assert!(matches!(err, ModelError::RaggedRow { row: 0, expected: 2, got: 1 }));
    }

    #[test]
    fn test_zero_rows_allowed() {
        let m = FeatureMatrix::from_rows(cols(&["a"]), vec![]).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.rows().count(), 0);
    }
}
