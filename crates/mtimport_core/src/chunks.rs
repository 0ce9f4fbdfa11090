use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

/// One numbered file of a split backup export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupChunk {
    pub index: u32,
    pub file_name: String,
    pub path: PathBuf,
}

/// Strip the trailing `{N}.xml` from a chunk file name: `site-1.xml` -> `site-`.
pub fn chunk_base_name(backup_name: &str) -> &str {
    let without_ext = backup_name
        .strip_suffix(".xml")
        .or_else(|| backup_name.strip_suffix(".XML"))
        .unwrap_or(backup_name);
    without_ext.trim_end_matches(|ch: char| ch.is_ascii_digit())
}

/// Find every `{base}{N}.xml` in `import_dir` and return them ordered by `N`.
///
/// Gaps in the numbering are tolerated; sanitized `clean-*` siblings are never
/// picked up because they do not share the base name.
pub fn locate_chunks(import_dir: &Path, backup_name: &str) -> Result<Vec<BackupChunk>> {
    let base = chunk_base_name(backup_name);
    let mut chunks = Vec::new();
    for entry in WalkDir::new(import_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
    {
        let entry = entry.with_context(|| format!("failed to scan {}", import_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = chunk_index(&file_name, base) else {
            continue;
        };
        chunks.push(BackupChunk {
            index,
            file_name,
            path: entry.into_path(),
        });
    }
    chunks.sort_by(|left, right| {
        left.index
            .cmp(&right.index)
            .then(left.file_name.cmp(&right.file_name))
    });
    Ok(chunks)
}

fn chunk_index(file_name: &str, base: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(base)?;
    let digits = rest
        .strip_suffix(".xml")
        .or_else(|| rest.strip_suffix(".XML"))?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn base_name_strips_sequence_number() {
        assert_eq!(chunk_base_name("Backup-site-1.xml"), "Backup-site-");
        assert_eq!(chunk_base_name("export12.xml"), "export");
        assert_eq!(chunk_base_name("single.xml"), "single");
    }

    #[test]
    fn chunks_are_ordered_numerically_and_gaps_are_skipped() {
        let temp = tempdir().expect("tempdir");
        for name in [
            "blog-10.xml",
            "blog-2.xml",
            "blog-1.xml",
            "clean-blog-1.xml",
            "blog-notes.txt",
            "blog-.xml",
            "other-3.xml",
        ] {
            fs::write(temp.path().join(name), "<backup/>").expect("write");
        }
        fs::create_dir_all(temp.path().join("blog-4.xml")).expect("dir");

        let chunks = locate_chunks(temp.path(), "blog-1.xml").expect("locate");
        let indices = chunks.iter().map(|chunk| chunk.index).collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 2, 10]);
        assert_eq!(chunks[2].file_name, "blog-10.xml");
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(locate_chunks(Path::new("/nonexistent/mtimport"), "blog-1.xml").is_err());
    }
}
