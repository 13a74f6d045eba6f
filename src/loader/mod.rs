//! Loaders for the two code sources: the ownership registry (CSV sheets) and
//! the tariff document (extracted text).

use crate::models::{NcmCode, RegistryRow};
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static DOTTED_NCM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}\.\d{2}\.\d{2}\b").expect("valid NCM regex"));

// ── Document ──────────────────────────────────────────────────────────────────

/// Dotted codes (`1234.56.78`) found in `text`, unique, in first-seen order.
pub fn extract_codes(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    DOTTED_NCM
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|code| seen.insert(*code))
        .map(str::to_string)
        .collect()
}

pub fn load_document(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document text {:?}", path))?;
    let codes = extract_codes(&text);
    info!("{:?}: {} distinct codes", path, codes.len());
    Ok(codes)
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    pub main_sheet: String,
    pub main: Vec<RegistryRow>,
    pub entities: Vec<RegistryRow>,
    /// Rows whose code could not be normalized, across all sheets.
    pub dropped: usize,
}

/// Registry rows for one code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryMatch<'a> {
    pub main: Vec<&'a RegistryRow>,
    pub entities: Vec<&'a RegistryRow>,
}

impl RegistryMatch<'_> {
    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.entities.is_empty()
    }
}

impl Registry {
    /// Codes of the main ownership sheet.
    pub fn codes(&self) -> impl Iterator<Item = &NcmCode> {
        self.main.iter().map(|r| &r.ncm)
    }

    pub fn lookup(&self, code: &NcmCode) -> RegistryMatch<'_> {
        RegistryMatch {
            main: self.main.iter().filter(|r| &r.ncm == code).collect(),
            entities: self.entities.iter().filter(|r| &r.ncm == code).collect(),
        }
    }
}

struct Sheet {
    name: String,
    rows: Vec<RegistryRow>,
    dropped: usize,
}

fn sheet_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Read one sheet. `None` when it has no `NCM` column.
fn load_sheet(path: &Path) -> Result<Option<Sheet>> {
    let name = sheet_name(path);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open sheet {:?}", path))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {:?}", path))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let Some(ncm_col) = headers.iter().position(|h| h.eq_ignore_ascii_case("ncm")) else {
        warn!("sheet '{}' has no NCM column, skipped", name);
        return Ok(None);
    };

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                dropped += 1;
                continue;
            }
        };

        let Some(ncm) = record.get(ncm_col).and_then(NcmCode::parse) else {
            debug!("{}: row {} has no valid code ({:?})", name, i + 1, record.get(ncm_col));
            dropped += 1;
            continue;
        };

        let fields: BTreeMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(col, (_, v))| *col != ncm_col && !v.trim().is_empty())
            .map(|(_, (h, v))| (h.clone(), v.trim().to_string()))
            .collect();

        rows.push(RegistryRow { sheet: name.clone(), ncm, fields });
    }

    if dropped > 0 {
        warn!("sheet '{}': {} rows dropped", name, dropped);
    }
    debug!("sheet '{}': {} rows", name, rows.len());
    Ok(Some(Sheet { name, rows, dropped }))
}

/// Load a registry from one CSV file or a directory of CSV files, one sheet
/// per file. The sheet named `main_sheet` holds ownership; if there is none,
/// the first sheet by name does.
pub fn load_registry(path: &Path, main_sheet: &str) -> Result<Registry> {
    let files = if path.is_dir() {
        discover_csv_files(path)?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        bail!("Registry path {:?} does not exist", path);
    };

    let mut sheets = Vec::new();
    for file in &files {
        if let Some(sheet) = load_sheet(file)? {
            sheets.push(sheet);
        }
    }
    if sheets.is_empty() {
        bail!("No sheet with an NCM column under {:?}", path);
    }
    sheets.sort_by(|a, b| a.name.cmp(&b.name));

    let main_idx = match sheets.iter().position(|s| s.name == main_sheet) {
        Some(i) => i,
        None => {
            warn!("sheet '{}' not found, using '{}' as the main sheet", main_sheet, sheets[0].name);
            0
        }
    };

    let dropped = sheets.iter().map(|s| s.dropped).sum();
    let main = sheets.remove(main_idx);
    let entities: Vec<RegistryRow> = sheets.into_iter().flat_map(|s| s.rows).collect();

    info!(
        "registry: '{}' with {} rows, {} entity rows, {} dropped",
        main.name,
        main.rows.len(),
        entities.len(),
        dropped
    );

    Ok(Registry {
        main_sheet: main.name,
        main: main.rows,
        entities,
        dropped,
    })
}

/// CSV files directly under `dir`, sorted by path.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
