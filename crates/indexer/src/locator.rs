use crate::capture::CaptureFileRef;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Finds candidate capture files under a set of roots.
///
/// Every regular file is a candidate: capture formats vary too much for extension
/// filtering. Results are deduplicated by canonical path and keep the order in which
/// roots were given (directory contents sorted by file name).
pub struct CorpusLocator {
    roots: Vec<PathBuf>,
}

impl CorpusLocator {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            roots: roots
                .into_iter()
                .map(|root| root.as_ref().to_path_buf())
                .collect(),
        }
    }

    pub fn locate(&self) -> Vec<CaptureFileRef> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for root in &self.roots {
            let meta = match std::fs::metadata(root) {
                Ok(meta) => meta,
                Err(err) => {
                    log::warn!("Skipping {}: {err}", root.display());
                    continue;
                }
            };

            if meta.is_file() {
                Self::push_canonical(root, &mut seen, &mut files);
                continue;
            }
            if !meta.is_dir() {
                log::warn!("Skipping {}: not a regular file", root.display());
                continue;
            }

            for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
                match entry {
                    Ok(entry) => {
                        if entry.file_type().is_file() {
                            Self::push_canonical(entry.path(), &mut seen, &mut files);
                        }
                    }
                    Err(err) => log::warn!("Failed to read entry: {err}"),
                }
            }
        }

        log::info!("Found {} capture files", files.len());
        files
    }

    fn push_canonical(
        path: &Path,
        seen: &mut HashSet<PathBuf>,
        files: &mut Vec<CaptureFileRef>,
    ) {
        match std::fs::canonicalize(path) {
            Ok(canonical) => {
                if seen.insert(canonical.clone()) {
                    files.push(CaptureFileRef::from_canonical(canonical));
                }
            }
            Err(err) => log::warn!("Skipping {}: {err}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CorpusLocator;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn names(files: &[crate::CaptureFileRef]) -> Vec<String> {
        files.iter().map(|f| f.file_name_lossy()).collect()
    }

    #[test]
    fn walks_directories_recursively_without_extension_filter() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("2019").join("smb");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp.path().join("b.pcapng"), b"x").unwrap();
        fs::write(temp.path().join("a.cap"), b"x").unwrap();
        fs::write(nested.join("trace.bin"), b"x").unwrap();

        let files = CorpusLocator::new([temp.path()]).locate();

        assert_eq!(names(&files), vec!["trace.bin", "a.cap", "b.pcapng"]);
        assert!(files.iter().all(|f| f.path().is_absolute()));
    }

    #[test]
    fn overlapping_roots_are_deduplicated() {
        let temp = tempdir().unwrap();
        let sub = temp.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("x.pcap"), b"x").unwrap();
        fs::write(temp.path().join("y.pcap"), b"x").unwrap();

        let files =
            CorpusLocator::new([sub.join("x.pcap"), temp.path().to_path_buf(), sub.clone()])
                .locate();

        assert_eq!(names(&files), vec!["x.pcap", "y.pcap"]);
    }

    #[test]
    fn missing_roots_are_skipped() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("ok.pcap"), b"x").unwrap();

        let files = CorpusLocator::new([
            temp.path().join("does-not-exist"),
            temp.path().join("ok.pcap"),
        ])
        .locate();

        assert_eq!(names(&files), vec!["ok.pcap"]);
    }
}
