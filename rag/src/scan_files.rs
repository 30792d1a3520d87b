use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// PDF files under `base`, skipping hidden directories and files above `max_file_bytes`.
pub fn scan_pdfs(base: &Path, max_file_bytes: u64) -> Vec<PathBuf> {
    let walker = WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    let mut results = Vec::new();
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_pdf(path) {
            continue;
        }
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > max_file_bytes {
                debug!("Skipping {} ({} bytes)", path.display(), meta.len());
                continue;
            }
        }
        results.push(path.to_path_buf());
    }
    results
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_pdfs_recursively_and_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("manuals")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("a.pdf"), b"%PDF-1.4").unwrap();
        fs::write(root.join("manuals/B.PDF"), b"%PDF-1.4").unwrap();
        fs::write(root.join("notes.txt"), b"hello").unwrap();
        fs::write(root.join(".cache/c.pdf"), b"%PDF-1.4").unwrap();
        fs::write(root.join("big.pdf"), vec![0u8; 64]).unwrap();

        let found = scan_pdfs(root, 32);
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.pdf".to_string(), "manuals/B.PDF".to_string()]);
    }
}
