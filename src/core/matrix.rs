//! Pairwise distance matrix over the shape population.
//!
//! The input is one row of coordinates per shape (the `SC.txt` connectivity
//! matrix in practice, N x N). Distances are Euclidean between rows and are
//! computed once; the catalog builder only reads them.

use crate::error::CatalogError;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    /// Euclidean distances between every pair of coordinate rows.
    pub fn from_coordinates(rows: &[Vec<f64>]) -> Result<Self, CatalogError> {
        let n = rows.len();
        if n == 0 {
            return Err(CatalogError::EmptyMatrix);
        }
        let dim = rows[0].len();
        for (row, r) in rows.iter().enumerate() {
            if r.len() != dim {
                return Err(CatalogError::RaggedRow {
                    row,
                    expected: dim,
                    found: r.len(),
                });
            }
        }

        let mut data = vec![0.0f64; n * n];

        #[cfg(feature = "parallel")]
        {
            data.par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, out)| fill_row(rows, i, out));
        }

        #[cfg(not(feature = "parallel"))]
        {
            data.chunks_mut(n)
                .enumerate()
                .for_each(|(i, out)| fill_row(rows, i, out));
        }

        Ok(Self { n, data })
    }

    /// Wrap an already computed square distance table (row-major).
    pub fn from_distances(n: usize, data: Vec<f64>) -> Result<Self, CatalogError> {
        if n == 0 {
            return Err(CatalogError::EmptyMatrix);
        }
        if data.len() != n * n {
            return Err(CatalogError::RaggedRow {
                row: data.len() / n,
                expected: n,
                found: data.len() % n,
            });
        }
        Ok(Self { n, data })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }
}

fn fill_row(rows: &[Vec<f64>], i: usize, out: &mut [f64]) {
    let a = &rows[i];
    for (j, slot) in out.iter_mut().enumerate() {
        if i == j {
            *slot = 0.0;
            continue;
        }
        let sq: f64 = a
            .iter()
            .zip(rows[j].iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        *slot = sq.sqrt();
    }
}

/// Parse comma-delimited rows of floats. Blank lines are skipped.
pub fn parse_coordinates(text: &str) -> Result<Vec<Vec<f64>>, CatalogError> {
    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split(',')
            .map(|v| {
                let v = v.trim();
                v.parse::<f64>().map_err(|_| CatalogError::BadNumber {
                    line: line_no + 1,
                    value: v.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(CatalogError::EmptyMatrix);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances_are_symmetric_with_zero_diagonal() {
        let rows = vec![vec![0.0, 0.0], vec![3.0, 4.0], vec![6.0, 8.0]];
        let d = DistanceMatrix::from_coordinates(&rows).unwrap();
        assert_eq!(d.len(), 3);
        for i in 0..3 {
            assert_eq!(d.get(i, i), 0.0);
            for j in 0..3 {
                assert_eq!(d.get(i, j), d.get(j, i));
                assert!(d.get(i, j) >= 0.0);
            }
        }
        assert!((d.get(0, 1) - 5.0).abs() < 1e-12);
        assert!((d.get(0, 2) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let rows = vec![vec![0.0, 1.0], vec![1.0]];
        assert!(matches!(
            DistanceMatrix::from_coordinates(&rows),
            Err(CatalogError::RaggedRow { row: 1, .. })
        ));
    }

    #[test]
    fn parses_comma_delimited_text() {
        let rows = parse_coordinates("0, 1.5,2\n\n3,4,5e-1\n").unwrap();
        assert_eq!(rows, vec![vec![0.0, 1.5, 2.0], vec![3.0, 4.0, 0.5]]);

        let err = parse_coordinates("1,2\n3,x\n").unwrap_err();
        assert!(matches!(err, CatalogError::BadNumber { line: 2, .. }));
    }
}
