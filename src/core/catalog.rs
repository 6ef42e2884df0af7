//! Stimulus catalog construction.
//!
//! Shapes are split into categories by index order (the caller arranges rows so
//! contiguous ranges are the intended categories). Each shape is scored by its
//! mean distance to every shape outside its own category: far from the other
//! categories means typical and easy, close means ambiguous and hard. Scores are
//! ranked per category and cut into difficulty levels; the top-scoring member of
//! each category becomes its prototype.

use crate::error::CatalogError;
use crate::matrix::DistanceMatrix;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

/// Shape IDs are 1-based and match the `shape_<id>` source file names.
pub type ShapeId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeInfo {
    pub id: ShapeId,
    pub category: u32,
    pub difficulty: u32,
    pub score: f64,
    #[serde(default)]
    pub is_prototype: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prototype {
    pub category: u32,
    pub shape: ShapeId,
}

/// Output of the builder; also the on-disk `manifest.json` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusCatalog {
    pub categories: u32,
    pub difficulty_levels: u32,
    pub shapes: Vec<ShapeInfo>,
    /// One entry per category, ordered by category.
    pub prototypes: Vec<Prototype>,
}

impl StimulusCatalog {
    pub fn shape(&self, id: ShapeId) -> Option<&ShapeInfo> {
        id.checked_sub(1)
            .and_then(|i| self.shapes.get(i as usize))
            .filter(|s| s.id == id)
    }

    pub fn prototype_of(&self, category: u32) -> Option<ShapeId> {
        category
            .checked_sub(1)
            .and_then(|i| self.prototypes.get(i as usize))
            .map(|p| p.shape)
    }

    /// Members of one (category, level) cell, prototype excluded.
    pub fn cell(&self, category: u32, difficulty: u32) -> impl Iterator<Item = &ShapeInfo> {
        self.shapes.iter().filter(move |s| {
            s.category == category && s.difficulty == difficulty && !s.is_prototype
        })
    }

    pub fn category_members(&self, category: u32) -> impl Iterator<Item = &ShapeInfo> {
        self.shapes.iter().filter(move |s| s.category == category)
    }
}

/// Split `0..n` into `categories` contiguous blocks with bounds `floor(i*n/c)`.
pub fn category_ranges(n: usize, categories: usize) -> Vec<Range<usize>> {
    if categories == 0 {
        return Vec::new();
    }
    (0..categories)
        .map(|i| (i * n / categories)..((i + 1) * n / categories))
        .collect()
}

/// Mean distance from every shape to all shapes outside its own category.
pub fn avg_dist_to_other_categories(d: &DistanceMatrix, ranges: &[Range<usize>]) -> Vec<f64> {
    let n = d.len();
    let mut out = vec![0.0f64; n];
    for (i, slot) in out.iter_mut().enumerate() {
        let row = d.row(i);
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for r in ranges.iter().filter(|r| !r.contains(&i)) {
            sum += row[r.clone()].iter().sum::<f64>();
            count += r.len();
        }
        *slot = if count == 0 { 0.0 } else { sum / count as f64 };
    }
    out
}

/// Sizes of `len` split into `parts` nearly-equal chunks, larger chunks first.
fn chunk_sizes(len: usize, parts: usize) -> impl Iterator<Item = usize> {
    let base = len / parts;
    let extra = len % parts;
    (0..parts).map(move |j| base + usize::from(j < extra))
}

/// Difficulty level (1-based) of every shape.
///
/// Within a category members are ranked by score, highest first; equal scores
/// keep index order. The ranking is cut into `levels` contiguous groups.
pub fn split_difficulty(scores: &[f64], ranges: &[Range<usize>], levels: usize) -> Vec<u32> {
    let mut out = vec![0u32; scores.len()];
    if levels == 0 {
        return out;
    }
    for r in ranges {
        let mut ranked: Vec<usize> = r.clone().collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut at = 0usize;
        for (level, size) in chunk_sizes(ranked.len(), levels).enumerate() {
            for &idx in &ranked[at..at + size] {
                out[idx] = level as u32 + 1;
            }
            at += size;
        }
    }
    out
}

/// Index of the prototype of every category.
///
/// The prototype is the first index whose score equals the category maximum.
/// If that index is outside the category the scores are inconsistent with the
/// row ordering and construction must stop.
pub fn category_prototypes(
    scores: &[f64],
    ranges: &[Range<usize>],
) -> Result<Vec<usize>, CatalogError> {
    let mut out = Vec::with_capacity(ranges.len());
    for (c, r) in ranges.iter().enumerate() {
        let max = scores[r.clone()]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let idx = scores.iter().position(|&s| s == max).unwrap_or(r.start);
        if !r.contains(&idx) {
            return Err(CatalogError::PrototypeOutsideCategory {
                category: c as u32 + 1,
                index: idx,
                start: r.start,
                end: r.end,
            });
        }
        out.push(idx);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogBuilder {
    categories: usize,
    levels: usize,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new(2, 5)
    }
}

impl CatalogBuilder {
    pub fn new(categories: usize, levels: usize) -> Self {
        Self {
            categories: categories.max(1),
            levels: levels.max(1),
        }
    }

    pub fn build(&self, d: &DistanceMatrix) -> Result<StimulusCatalog, CatalogError> {
        let n = d.len();
        if n < self.categories * self.levels {
            return Err(CatalogError::TooFewShapes {
                shapes: n,
                categories: self.categories,
                levels: self.levels,
            });
        }

        let ranges = category_ranges(n, self.categories);
        let scores = avg_dist_to_other_categories(d, &ranges);
        let diffs = split_difficulty(&scores, &ranges, self.levels);
        let protos = category_prototypes(&scores, &ranges)?;

        let mut shapes = Vec::with_capacity(n);
        for (c, r) in ranges.iter().enumerate() {
            for idx in r.clone() {
                shapes.push(ShapeInfo {
                    id: idx as ShapeId + 1,
                    category: c as u32 + 1,
                    difficulty: diffs[idx],
                    score: scores[idx],
                    is_prototype: protos[c] == idx,
                });
            }
        }

        let catalog = StimulusCatalog {
            categories: self.categories as u32,
            difficulty_levels: self.levels as u32,
            shapes,
            prototypes: protos
                .iter()
                .enumerate()
                .map(|(c, &idx)| Prototype {
                    category: c as u32 + 1,
                    shape: idx as ShapeId + 1,
                })
                .collect(),
        };

        for category in 1..=catalog.categories {
            for difficulty in 1..=catalog.difficulty_levels {
                let count = catalog.cell(category, difficulty).count();
                if count == 0 {
                    return Err(CatalogError::EmptyCell {
                        category,
                        difficulty,
                    });
                }
                debug!(category, difficulty, count, "catalog cell");
            }
        }

        info!(
            shapes = n,
            categories = self.categories,
            levels = self.levels,
            prototypes = ?catalog.prototypes.iter().map(|p| p.shape).collect::<Vec<_>>(),
            "catalog built"
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::Prng;

    /// Two well separated clusters on a line: 0..10 step 1 and 20..40 step 2.
    fn two_clusters() -> DistanceMatrix {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|x| vec![x as f64])
            .chain((0..10).map(|k| vec![20.0 + 2.0 * k as f64]))
            .collect();
        DistanceMatrix::from_coordinates(&rows).unwrap()
    }

    #[test]
    fn ranges_cover_every_index_once() {
        for (n, c) in [(10, 2), (11, 2), (10, 3), (7, 7), (100, 4)] {
            let ranges = category_ranges(n, c);
            assert_eq!(ranges.len(), c);
            assert_eq!(ranges[0].start, 0);
            assert_eq!(ranges[c - 1].end, n);
            for w in ranges.windows(2) {
                assert_eq!(w[0].end, w[1].start);
            }
        }
        // Remainder lands in the later blocks.
        assert_eq!(category_ranges(5, 2), vec![0..2, 2..5]);
    }

    #[test]
    fn scores_favor_shapes_far_from_other_category() {
        let d = two_clusters();
        let ranges = category_ranges(d.len(), 2);
        let scores = avg_dist_to_other_categories(&d, &ranges);
        // Shape at x=0 is the mean of 20, 22, .., 38.
        assert!((scores[0] - 29.0).abs() < 1e-9);
        assert!(scores[0] > scores[9]);
        assert!(scores[19] > scores[10]);
    }

    #[test]
    fn builds_expected_prototypes_and_levels() {
        let catalog = CatalogBuilder::new(2, 5).build(&two_clusters()).unwrap();

        assert_eq!(catalog.prototype_of(1), Some(1));
        assert_eq!(catalog.prototype_of(2), Some(20));

        let levels: Vec<u32> = catalog.shapes.iter().map(|s| s.difficulty).collect();
        assert_eq!(
            levels,
            vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 5, 5, 4, 4, 3, 3, 2, 2, 1, 1]
        );
        assert!(catalog.shape(1).unwrap().is_prototype);
        // Prototype never appears as a trial candidate.
        assert!(catalog.cell(1, 1).all(|s| s.id != 1));
        assert_eq!(catalog.cell(1, 1).count(), 1);
    }

    #[test]
    fn build_is_deterministic() {
        let d = two_clusters();
        let a = CatalogBuilder::new(2, 5).build(&d).unwrap();
        let b = CatalogBuilder::new(2, 5).build(&d).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn every_shape_gets_one_category_and_balanced_buckets() {
        let mut rng = Prng::new(3);
        let n = 47;
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|_| (0..n).map(|_| rng.next_f64_01()).collect())
            .collect();
        let d = DistanceMatrix::from_coordinates(&rows).unwrap();
        let ranges = category_ranges(n, 2);
        let scores = avg_dist_to_other_categories(&d, &ranges);
        let diffs = split_difficulty(&scores, &ranges, 5);

        for i in 0..n {
            assert_eq!(ranges.iter().filter(|r| r.contains(&i)).count(), 1);
            assert!((1..=5).contains(&diffs[i]));
        }
        for r in &ranges {
            let sizes: Vec<usize> = (1..=5)
                .map(|lvl| r.clone().filter(|&i| diffs[i] == lvl).count())
                .collect();
            let max = *sizes.iter().max().unwrap();
            let min = *sizes.iter().min().unwrap();
            assert!(max - min <= 1, "unbalanced buckets {sizes:?}");
            assert_eq!(sizes.iter().sum::<usize>(), r.len());
        }
    }

    #[test]
    fn equal_scores_keep_index_order() {
        let scores = vec![1.0, 1.0, 1.0, 1.0];
        let diffs = split_difficulty(&scores, &[0..4], 2);
        assert_eq!(diffs, vec![1, 1, 2, 2]);
    }

    #[test]
    fn prototype_outside_category_is_fatal() {
        // Mirrored clusters give the two categories identical maxima; the first
        // match belongs to category 1, so category 2 fails.
        let rows = vec![vec![0.0], vec![1.0], vec![3.0], vec![4.0]];
        let d = DistanceMatrix::from_coordinates(&rows).unwrap();
        let err = CatalogBuilder::new(2, 1).build(&d).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::PrototypeOutsideCategory {
                category: 2,
                index: 0,
                ..
            }
        ));
    }

    #[test]
    fn too_few_shapes_or_empty_cells_fail_fast() {
        let rows: Vec<Vec<f64>> = (0..6).map(|x| vec![x as f64 * 10.0]).collect();
        let d = DistanceMatrix::from_coordinates(&rows).unwrap();
        assert!(matches!(
            CatalogBuilder::new(2, 5).build(&d),
            Err(CatalogError::TooFewShapes { .. })
        ));

        // Three members per category and three levels: level 1 only holds the prototype.
        let d = DistanceMatrix::from_coordinates(
            &[0.0, 1.0, 2.0, 10.0, 12.0, 14.0].map(|x| vec![x]),
        )
        .unwrap();
        assert!(matches!(
            CatalogBuilder::new(2, 3).build(&d),
            Err(CatalogError::EmptyCell {
                category: 1,
                difficulty: 1
            })
        ));
    }
}
