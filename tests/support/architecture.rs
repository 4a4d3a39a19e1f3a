use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A source line that broke a layering rule.
pub struct Hit {
    pub file: String,
    pub line: usize,
    pub text: String,
}

impl fmt::Debug for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.text.trim())
    }
}

fn root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn relative(path: &Path) -> String {
    path.strip_prefix(root())
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries =
        fs::read_dir(dir).unwrap_or_else(|e| panic!("failed to read dir {}: {e}", dir.display()));
    for entry in entries {
        let path = entry
            .unwrap_or_else(|e| panic!("failed to read dir entry: {e}"))
            .path();
        if path.is_dir() {
            walk(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
}

/// Every `.rs` file under `relative_dir`, sorted.
pub fn rust_files(relative_dir: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    walk(&root().join(relative_dir), &mut files);
    files.sort();
    files
}

fn scan(relative_dir: &str, mut keep: impl FnMut(&Path, &str) -> bool) -> Vec<Hit> {
    let mut hits = Vec::new();
    for file in rust_files(relative_dir) {
        let content = fs::read_to_string(&file)
            .unwrap_or_else(|e| panic!("failed to read {}: {e}", file.display()));
        for (index, line) in content.lines().enumerate() {
            if keep(&file, line) {
                hits.push(Hit {
                    file: relative(&file),
                    line: index + 1,
                    text: line.to_string(),
                });
            }
        }
    }
    hits
}

/// Lines under `relative_dir` that mention any of `patterns`.
///
/// Test modules are included; a layer's tests obey its rules too.
pub fn lines_containing(relative_dir: &str, patterns: &[&str]) -> Vec<Hit> {
    scan(relative_dir, |_, line| patterns.iter().any(|p| line.contains(p)))
}

/// Like [`lines_containing`], skipping files listed in `allowed`.
pub fn lines_containing_except(relative_dir: &str, patterns: &[&str], allowed: &[&str]) -> Vec<Hit> {
    lines_containing(relative_dir, patterns)
        .into_iter()
        .filter(|hit| !allowed.contains(&hit.file.as_str()))
        .collect()
}

/// Lines of `mod.rs` files that do more than declare modules.
pub fn non_export_lines_in_mod_files(relative_dir: &str) -> Vec<Hit> {
    scan(relative_dir, |file, raw| {
        if file.file_name().and_then(|s| s.to_str()) != Some("mod.rs") {
            return false;
        }
        let line = raw.trim();
        !(line.is_empty()
            || line.starts_with("//")
            || line.starts_with("#![")
            || line.starts_with("pub mod ")
            || line.starts_with("mod ")
            || line.starts_with("#[cfg"))
    })
}

pub fn path_exists(relative_path: &str) -> bool {
    root().join(relative_path).exists()
}
