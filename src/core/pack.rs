//! Stimulus pack layout on disk.
//!
//! ```text
//! pack/
//!   manifest.json
//!   cat_1/prototype_1.png
//!   cat_1/diff_1/ex_1_1_1.png
//!   cat_1/diff_1/ex_1_1_2.png
//!   ...
//! ```
//!
//! The exporter copies source `shape_<id>.<ext>` files into this layout; the
//! listing reads it back at session start. Rendering the shapes themselves is
//! done elsewhere.

use crate::catalog::{ShapeId, StimulusCatalog};
use crate::error::{CatalogError, PackError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "manifest.json";

/// One exemplar file of the pack and the shape it was copied from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemplarFile {
    pub category: u32,
    pub difficulty: u32,
    /// Position within its cell, from 1; this is the stimulus id seen in logs.
    pub index: u32,
    pub shape: ShapeId,
    /// Path relative to the pack root.
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackManifest {
    pub catalog: StimulusCatalog,
    pub exemplars: Vec<ExemplarFile>,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Keep every `stride`-th member of each category (index order).
    pub stride: usize,
    pub extension: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            stride: 2,
            extension: "png".to_string(),
        }
    }
}

pub fn exemplar_path(category: u32, difficulty: u32, index: u32, ext: &str) -> String {
    format!("cat_{category}/diff_{difficulty}/ex_{category}_{difficulty}_{index}.{ext}")
}

pub fn prototype_path(category: u32, ext: &str) -> String {
    format!("cat_{category}/prototype_{category}.{ext}")
}

/// Decide which shapes become exemplar files and what they are called.
///
/// Fails if a (category, level) cell ends up without any exemplar.
pub fn plan_exemplars(
    catalog: &StimulusCatalog,
    options: &ExportOptions,
) -> Result<Vec<ExemplarFile>, CatalogError> {
    let stride = options.stride.max(1);
    let mut counters: BTreeMap<(u32, u32), u32> = BTreeMap::new();
    let mut out = Vec::new();

    for category in 1..=catalog.categories {
        for shape in catalog.category_members(category).step_by(stride) {
            if shape.is_prototype {
                continue;
            }
            let k = counters.entry((category, shape.difficulty)).or_insert(0);
            *k += 1;
            out.push(ExemplarFile {
                category,
                difficulty: shape.difficulty,
                index: *k,
                shape: shape.id,
                file: exemplar_path(category, shape.difficulty, *k, &options.extension),
            });
        }
    }

    for category in 1..=catalog.categories {
        for difficulty in 1..=catalog.difficulty_levels {
            if !counters.contains_key(&(category, difficulty)) {
                return Err(CatalogError::EmptyCell {
                    category,
                    difficulty,
                });
            }
        }
    }
    Ok(out)
}

fn copy_file(src: &Path, dest: &Path) -> Result<(), PackError> {
    if !src.is_file() {
        return Err(PackError::MissingShape(src.to_path_buf()));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| PackError::io(parent, e))?;
    }
    fs::copy(src, dest).map_err(|e| PackError::io(dest, e))?;
    Ok(())
}

/// Copy shape files from `shapes_dir` into a pack at `dest` and write its manifest.
pub fn export_pack(
    catalog: &StimulusCatalog,
    shapes_dir: &Path,
    dest: &Path,
    options: &ExportOptions,
) -> Result<PackManifest, PackError> {
    let exemplars = plan_exemplars(catalog, options)?;
    let ext = &options.extension;

    for proto in &catalog.prototypes {
        let src = shapes_dir.join(format!("shape_{}.{ext}", proto.shape));
        copy_file(&src, &dest.join(prototype_path(proto.category, ext)))?;
    }
    for ex in &exemplars {
        let src = shapes_dir.join(format!("shape_{}.{ext}", ex.shape));
        copy_file(&src, &dest.join(&ex.file))?;
    }

    let manifest = PackManifest {
        catalog: catalog.clone(),
        exemplars,
    };
    write_manifest(&manifest, dest)?;
    info!(
        dest = ?dest,
        exemplars = manifest.exemplars.len(),
        "pack exported"
    );
    Ok(manifest)
}

pub fn write_manifest(manifest: &PackManifest, dir: &Path) -> Result<(), PackError> {
    fs::create_dir_all(dir).map_err(|e| PackError::io(dir, e))?;
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(manifest)?;
    fs::write(&path, json).map_err(|e| PackError::io(&path, e))
}

pub fn read_manifest(dir: &Path) -> Result<PackManifest, PackError> {
    let path = dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path).map_err(|e| PackError::io(&path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Stimulus id from the last `_`-separated token of the file stem.
pub fn stimulus_id(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .rsplit('_')
        .next()?
        .parse()
        .ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub id: u32,
    pub path: PathBuf,
}

/// Files of a pack grouped by (category, difficulty).
#[derive(Debug, Clone)]
pub struct PackListing {
    pub root: PathBuf,
    pub categories: u32,
    pub difficulty_levels: u32,
    cells: BTreeMap<(u32, u32), Vec<PackEntry>>,
    prototypes: Vec<PathBuf>,
}

impl PackListing {
    /// Enumerate `root/cat_<c>/diff_<d>/*` and the per-category prototypes.
    pub fn scan(root: &Path, categories: u32, difficulty_levels: u32) -> Result<Self, PackError> {
        let mut cells = BTreeMap::new();
        let mut prototypes = Vec::with_capacity(categories as usize);

        for c in 1..=categories {
            let cat_dir = root.join(format!("cat_{c}"));
            prototypes.push(find_prototype(&cat_dir, c)?);

            for d in 1..=difficulty_levels {
                let cell_dir = cat_dir.join(format!("diff_{d}"));
                if !cell_dir.is_dir() {
                    return Err(PackError::MissingCell(cell_dir));
                }
                let mut entries = Vec::new();
                for path in list_files(&cell_dir)? {
                    let id = stimulus_id(&path)
                        .ok_or_else(|| PackError::BadStimulusName(path.clone()))?;
                    entries.push(PackEntry { id, path });
                }
                if entries.is_empty() {
                    return Err(PackError::EmptyCell(cell_dir));
                }
                debug!(category = c, difficulty = d, files = entries.len(), "pack cell");
                cells.insert((c, d), entries);
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            categories,
            difficulty_levels,
            cells,
            prototypes,
        })
    }

    /// Listing implied by a manifest, without touching the file system.
    pub fn from_manifest(manifest: &PackManifest, root: &Path, prototype_ext: &str) -> Self {
        let catalog = &manifest.catalog;
        let mut cells: BTreeMap<(u32, u32), Vec<PackEntry>> = BTreeMap::new();
        for c in 1..=catalog.categories {
            for d in 1..=catalog.difficulty_levels {
                cells.insert((c, d), Vec::new());
            }
        }
        for ex in &manifest.exemplars {
            cells
                .entry((ex.category, ex.difficulty))
                .or_default()
                .push(PackEntry {
                    id: ex.index,
                    path: root.join(&ex.file),
                });
        }
        Self {
            root: root.to_path_buf(),
            categories: catalog.categories,
            difficulty_levels: catalog.difficulty_levels,
            cells,
            prototypes: (1..=catalog.categories)
                .map(|c| root.join(prototype_path(c, prototype_ext)))
                .collect(),
        }
    }

    pub fn cell(&self, category: u32, difficulty: u32) -> &[PackEntry] {
        self.cells
            .get(&(category, difficulty))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn prototype(&self, category: u32) -> Option<&Path> {
        category
            .checked_sub(1)
            .and_then(|i| self.prototypes.get(i as usize))
            .map(PathBuf::as_path)
    }

    pub fn prototypes(&self) -> &[PathBuf] {
        &self.prototypes
    }

    #[cfg(test)]
    pub(crate) fn clear_cell(&mut self, category: u32, difficulty: u32) {
        self.cells.insert((category, difficulty), Vec::new());
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, PackError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| PackError::io(dir, e))? {
        let path = entry.map_err(|e| PackError::io(dir, e))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn find_prototype(cat_dir: &Path, category: u32) -> Result<PathBuf, PackError> {
    let stem = format!("prototype_{category}");
    let missing = || PackError::MissingPrototype {
        category,
        dir: cat_dir.to_path_buf(),
    };
    if !cat_dir.is_dir() {
        return Err(missing());
    }
    list_files(cat_dir)?
        .into_iter()
        .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str()))
        .ok_or_else(missing)
}

/// Listing with `per_cell` exemplars in every cell of a 2 x 5 pack rooted at `pack/`.
#[cfg(test)]
pub(crate) fn synthetic_listing(per_cell: u32) -> PackListing {
    let catalog = StimulusCatalog {
        categories: 2,
        difficulty_levels: 5,
        shapes: Vec::new(),
        prototypes: Vec::new(),
    };
    let mut exemplars = Vec::new();
    for c in 1..=2 {
        for d in 1..=5 {
            for k in 1..=per_cell {
                exemplars.push(ExemplarFile {
                    category: c,
                    difficulty: d,
                    index: k,
                    shape: 0,
                    file: exemplar_path(c, d, k, "png"),
                });
            }
        }
    }
    PackListing::from_manifest(&PackManifest { catalog, exemplars }, Path::new("pack"), "png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::matrix::DistanceMatrix;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("catmatch-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn catalog() -> StimulusCatalog {
        // 20 shapes per category so every cell survives stride 2.
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|x| vec![x as f64])
            .chain((0..20).map(|k| vec![50.0 + 1.5 * k as f64]))
            .collect();
        let d = DistanceMatrix::from_coordinates(&rows).unwrap();
        CatalogBuilder::new(2, 5).build(&d).unwrap()
    }

    #[test]
    fn parses_stimulus_ids_from_file_names() {
        assert_eq!(stimulus_id(Path::new("a/ex_1_2_17.png")), Some(17));
        assert_eq!(stimulus_id(Path::new("ex_2_5_3.mp4")), Some(3));
        assert_eq!(stimulus_id(Path::new("notes.txt")), None);
    }

    #[test]
    fn plan_skips_prototypes_and_numbers_cells_from_one() {
        let cat = catalog();
        let plan = plan_exemplars(&cat, &ExportOptions::default()).unwrap();
        for proto in &cat.prototypes {
            assert!(plan.iter().all(|e| e.shape != proto.shape));
        }
        for c in 1..=2 {
            for d in 1..=5 {
                let mut idx: Vec<u32> = plan
                    .iter()
                    .filter(|e| e.category == c && e.difficulty == d)
                    .map(|e| e.index)
                    .collect();
                idx.sort_unstable();
                assert_eq!(idx, (1..=idx.len() as u32).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn export_then_scan_round_trips() {
        let src = scratch("shapes");
        let dest = scratch("pack");
        fs::create_dir_all(&src).unwrap();
        for id in 1..=40 {
            fs::write(src.join(format!("shape_{id}.png")), format!("shape {id}")).unwrap();
        }

        let cat = catalog();
        let manifest = export_pack(&cat, &src, &dest, &ExportOptions::default()).unwrap();
        assert_eq!(read_manifest(&dest).unwrap(), manifest);

        let listing = PackListing::scan(&dest, 2, 5).unwrap();
        let proto = fs::read_to_string(listing.prototype(2).unwrap()).unwrap();
        assert_eq!(proto, format!("shape {}", cat.prototype_of(2).unwrap()));

        let scanned: usize = (1..=2)
            .flat_map(|c| (1..=5).map(move |d| (c, d)))
            .map(|(c, d)| listing.cell(c, d).len())
            .sum();
        assert_eq!(scanned, manifest.exemplars.len());

        let virtual_listing = PackListing::from_manifest(&manifest, &dest, "png");
        assert_eq!(virtual_listing.cell(1, 3), listing.cell(1, 3));

        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn missing_source_shape_is_reported() {
        let src = scratch("empty-shapes");
        let dest = scratch("empty-pack");
        fs::create_dir_all(&src).unwrap();
        let err = export_pack(&catalog(), &src, &dest, &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, PackError::MissingShape(_)));
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn scan_reports_missing_cells() {
        let root = scratch("partial-pack");
        fs::create_dir_all(root.join("cat_1/diff_1")).unwrap();
        fs::write(root.join("cat_1/diff_1/ex_1_1_1.png"), b"e").unwrap();
        fs::write(root.join("cat_1/prototype_1.png"), b"p").unwrap();
        let err = PackListing::scan(&root, 1, 2).unwrap_err();
        assert!(matches!(err, PackError::MissingCell(_)));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn scan_rejects_empty_cells() {
        let root = scratch("hollow-pack");
        fs::create_dir_all(root.join("cat_1/diff_1")).unwrap();
        fs::create_dir_all(root.join("cat_1/diff_2")).unwrap();
        fs::write(root.join("cat_1/diff_1/ex_1_1_1.png"), b"e").unwrap();
        fs::write(root.join("cat_1/prototype_1.png"), b"p").unwrap();
        let err = PackListing::scan(&root, 1, 2).unwrap_err();
        assert!(matches!(err, PackError::EmptyCell(p) if p.ends_with("diff_2")));
        let _ = fs::remove_dir_all(&root);
    }
}
