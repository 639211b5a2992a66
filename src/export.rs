//! CSV export of the visible features
//!
//! Every source in view becomes one CSV file: feature properties followed by
//! the auxiliary record fields. Columns are taken from the first feature of a
//! source (and its record); sibling features are assumed to share that shape.

use std::collections::BTreeMap;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use futures::future::join_all;
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::describe::record_id;
use crate::features::{group_by_source, Feature, GroupedFeatures};
use crate::format::csv_cell;
use crate::records::{RecordCache, RecordFetcher};
use crate::sources::{SourceRegistry, SourceSpec};
use crate::surface::MapSurface;

pub const ARCHIVE_NAME: &str = "map_csv_export.zip";
pub const ARCHIVE_DIR: &str = "map_csv_export";

/// Why the view cannot be exported right now
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Precondition {
    #[error("map is not finished loading")]
    NotLoaded,
    #[error("zoom must be at least {min} to export the view as CSV (currently {zoom:.2})")]
    ZoomTooLow { zoom: f64, min: f64 },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Precondition(#[from] Precondition),
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to build archive: {0}")]
    Zip(#[from] ZipError),
    #[error("failed to write {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
}

/// Rows of one source, header first
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub source: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn to_csv(&self) -> Result<Vec<u8>, ExportError> {
        // Rows may be wider or narrower than the header when features differ in shape
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.into_inner().map_err(|e| ExportError::Csv(e.into_error().into()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    /// Data rows written per source
    pub rows: BTreeMap<String, usize>,
}

/// Check the export gates and collect every feature in view.
pub fn prepare<S: MapSurface + ?Sized>(
    surface: &S,
    registry: &SourceRegistry,
    min_export_zoom: f64,
) -> Result<GroupedFeatures, Precondition> {
    if !surface.loaded() {
        return Err(Precondition::NotLoaded);
    }
    let zoom = surface.zoom();
    if zoom < min_export_zoom {
        return Err(Precondition::ZoomTooLow { zoom, min: min_export_zoom });
    }
    Ok(group_by_source(surface.query_rendered_features(None), registry))
}

async fn source_table<F: RecordFetcher>(spec: &SourceSpec, cache: &RecordCache<F>, features: &[Feature]) -> Table {
    let first = features.first();
    let mut header: Vec<String> = first
        .map(|f| f.properties.keys().cloned().collect())
        .unwrap_or_default();
    let value_row = |f: &Feature| -> Vec<String> { f.properties.values().map(csv_cell).collect() };

    let Some(id_key) = spec.id_key.as_deref() else {
        return Table {
            source: spec.key.clone(),
            header,
            rows: features.iter().map(value_row).collect(),
        };
    };

    let ids: Vec<Option<String>> = features.iter().map(|f| record_id(f, id_key)).collect();
    let lookup: Vec<String> = ids.iter().flatten().cloned().collect();
    let records = cache.get_many(&spec.key, &lookup).await;
    let record_for = |id: &Option<String>| id.as_ref().and_then(|id| records.get(id)).and_then(Option::as_ref);

    if let Some(record) = ids.first().and_then(record_for) {
        header.extend(record.keys().cloned());
    }
    let rows = features
        .iter()
        .zip(&ids)
        .map(|(f, id)| {
            let mut row = value_row(f);
            if let Some(record) = record_for(id) {
                row.extend(record.values().map(csv_cell));
            }
            row
        })
        .collect();

    Table {
        source: spec.key.clone(),
        header,
        rows,
    }
}

/// One table per non-empty source, built concurrently.
pub async fn build_tables<F: RecordFetcher>(
    registry: &SourceRegistry,
    cache: &RecordCache<F>,
    grouped: &GroupedFeatures,
) -> Vec<Table> {
    let pending = grouped
        .iter()
        .filter(|(_, features)| !features.is_empty())
        .filter_map(|(source, features)| registry.get(source).map(|spec| source_table(spec, cache, features)));
    join_all(pending).await
}

/// Write `tables` as `map_csv_export/{source}.csv` entries.
pub fn write_archive<W: Write + Seek>(writer: W, tables: &[Table]) -> Result<W, ExportError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.add_directory(format!("{}/", ARCHIVE_DIR), options)?;
    for table in tables {
        zip.start_file(format!("{}/{}.csv", ARCHIVE_DIR, table.source), options)?;
        zip.write_all(&table.to_csv()?).map_err(ZipError::from)?;
    }
    Ok(zip.finish()?)
}

/// Save the archive as `{dir}/map_csv_export.zip`.
pub fn save_archive(dir: &Path, tables: &[Table]) -> Result<ExportSummary, ExportError> {
    let path = dir.join(ARCHIVE_NAME);
    let io_err = |source| ExportError::Io {
        path: path.clone(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let file = std::fs::File::create(&path).map_err(io_err)?;
    write_archive(file, tables)?;

    let rows: BTreeMap<String, usize> = tables.iter().map(|t| (t.source.clone(), t.rows.len())).collect();
    tracing::info!(path = %path.display(), sources = rows.len(), "exported view");
    Ok(ExportSummary { path, rows })
}

/// Gate, collect, enrich and save in one go.
pub async fn export_view<S: MapSurface + ?Sized, F: RecordFetcher>(
    surface: &S,
    registry: &SourceRegistry,
    cache: &RecordCache<F>,
    min_export_zoom: f64,
    dir: &Path,
) -> Result<ExportSummary, ExportError> {
    let grouped = prepare(surface, registry, min_export_zoom)?;
    let tables = build_tables(registry, cache, &grouped).await;
    save_archive(dir, &tables)
}
