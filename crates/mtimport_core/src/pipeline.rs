//! Drives one backup through locate, sanitize, parse and import.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::chunks::{BackupChunk, locate_chunks};
use crate::config::ImportOptions;
use crate::fetch::ResourceFetcher;
use crate::importers::{EntityCounts, ImportSession};
use crate::mapping::MappingTable;
use crate::parser::{ParseDiagnostic, ParsedBackup, parse_backup};
use crate::rewrite::{BrokenResource, SiteContext};
use crate::runtime::{RunPaths, SiteTarget, normalize_for_display, trailing_slash};
use crate::sanitize::write_clean_copy;
use crate::store::ContentStore;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkOutcome {
    Imported {
        records: usize,
        ignored: BTreeMap<String, usize>,
    },
    Skipped {
        diagnostics: Vec<ParseDiagnostic>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub index: u32,
    pub file_name: String,
    pub clean_path: String,
    pub outcome: ChunkOutcome,
}

impl ChunkReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, ChunkOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MappingSizes {
    pub users: usize,
    pub posts: usize,
    pub assets: usize,
    pub tags: usize,
    pub categories: usize,
}

impl MappingSizes {
    fn of(mapping: &MappingTable) -> Self {
        Self {
            users: mapping.users.len(),
            posts: mapping.posts.len(),
            assets: mapping.assets.len(),
            tags: mapping.tags.len(),
            categories: mapping.categories.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub backup: String,
    pub dry_run: bool,
    pub old_site_url: String,
    pub home_url: String,
    pub chunks: Vec<ChunkReport>,
    pub counts: BTreeMap<String, EntityCounts>,
    pub broken: Vec<BrokenResource>,
    pub errors: usize,
    pub mapping: MappingSizes,
}

impl ImportReport {
    pub fn chunks_imported(&self) -> usize {
        self.chunks.iter().filter(|chunk| !chunk.is_skipped()).count()
    }

    pub fn chunks_skipped(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_skipped()).count()
    }
}

/// Import every chunk of the backup named in `paths`, in chunk order.
///
/// A chunk that still fails to parse after sanitizing is skipped with its
/// diagnostics; the rest of the run continues. Only locating chunks, reading
/// them and resolving the store's home URL are fatal.
pub fn run_import<S, F>(
    store: &mut S,
    fetcher: &mut F,
    paths: &RunPaths,
    target: &SiteTarget,
    options: ImportOptions,
    dry_run: bool,
) -> Result<ImportReport>
where
    S: ContentStore + ?Sized,
    F: ResourceFetcher + ?Sized,
{
    let chunks = locate_chunks(&paths.import_dir, &paths.backup_name)?;
    if chunks.is_empty() {
        bail!(
            "no chunks matching {} in {}",
            paths.backup_name,
            normalize_for_display(&paths.import_dir)
        );
    }
    let home_url = store
        .home_url()
        .context("failed to resolve the destination home URL")?;
    if !dry_run {
        fs::create_dir_all(&target.upload_dir).with_context(|| {
            format!(
                "failed to create upload directory {}",
                target.upload_dir.display()
            )
        })?;
    }
    let site = SiteContext {
        old_site_url: String::new(),
        home_url: home_url.trim_end_matches('/').to_string(),
        upload_dir: target.upload_dir.clone(),
        upload_url: trailing_slash(&target.upload_url),
        ..SiteContext::default()
    };
    info!(
        backup = %paths.backup_name,
        chunks = chunks.len(),
        home = %site.home_url,
        upload_dir = %normalize_for_display(&site.upload_dir),
        dry_run,
        "starting import"
    );

    let mut session = ImportSession::new(store, fetcher, options, site, paths.staging_dir.clone())
        .with_dry_run(dry_run);
    let mut chunk_reports = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let (clean_path, parsed) = prepare_chunk(chunk)?;
        let outcome = match parsed {
            Ok(parsed) => {
                for record in &parsed.records {
                    session.import_record(record);
                }
                info!(chunk = %chunk.file_name, records = parsed.records.len(), "chunk imported");
                ChunkOutcome::Imported {
                    records: parsed.records.len(),
                    ignored: parsed.ignored,
                }
            }
            Err(diagnostics) => ChunkOutcome::Skipped { diagnostics },
        };
        chunk_reports.push(ChunkReport {
            index: chunk.index,
            file_name: chunk.file_name.clone(),
            clean_path,
            outcome,
        });
    }

    let old_site_url = session.site().old_site_url.clone();
    let home_url = session.site().home_url.clone();
    let summary = session.finish();
    if !summary.broken.is_empty() {
        warn!(count = summary.broken.len(), "some resources could not be resolved");
    }
    Ok(ImportReport {
        backup: paths.backup_name.clone(),
        dry_run,
        old_site_url,
        home_url,
        chunks: chunk_reports,
        counts: summary.counts,
        broken: summary.broken,
        errors: summary.errors,
        mapping: MappingSizes::of(&summary.mapping),
    })
}

/// Sanitize and parse-check every chunk without importing anything.
pub fn check_chunks(paths: &RunPaths) -> Result<Vec<ChunkReport>> {
    let chunks = locate_chunks(&paths.import_dir, &paths.backup_name)?;
    let mut reports = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let (clean_path, parsed) = prepare_chunk(chunk)?;
        let outcome = match parsed {
            Ok(parsed) => ChunkOutcome::Imported {
                records: parsed.records.len(),
                ignored: parsed.ignored,
            },
            Err(diagnostics) => ChunkOutcome::Skipped { diagnostics },
        };
        reports.push(ChunkReport {
            index: chunk.index,
            file_name: chunk.file_name.clone(),
            clean_path,
            outcome,
        });
    }
    Ok(reports)
}

fn prepare_chunk(
    chunk: &BackupChunk,
) -> Result<(String, Result<ParsedBackup, Vec<ParseDiagnostic>>)> {
    let (clean_path, cleaned) = write_clean_copy(&chunk.path)?;
    let parsed = parse_backup(&cleaned);
    if let Err(diagnostics) = &parsed {
        for diagnostic in diagnostics {
            error!(chunk = %chunk.file_name, %diagnostic, "chunk does not parse");
        }
        warn!(chunk = %chunk.file_name, "skipping chunk");
    }
    Ok((normalize_for_display(&clean_path), parsed))
}
