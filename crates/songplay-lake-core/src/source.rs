//! Raw record source: every JSON object under a storage root whose path
//! matches a fixed-depth glob pattern.
//!
//! Patterns are `/`-separated; each component is either a literal name or a
//! wildcard (`*` matches any run of characters, `?` a single character)
//! scoped to that one component. `song_data/*/*/*/*.json` therefore only
//! matches files exactly four levels below `song_data`.
//!
//! Files are JSON Lines: one object per non-empty line. A file holding one
//! pretty-printed object is accepted too. Anything else aborts the read;
//! a partially read catalog would silently corrupt every derived table.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;
use log::debug;
use rayon::prelude::*;
use serde_json::Value;
use snafu::prelude::*;

use crate::model::{CatalogRecord, EventRecord, JsonObject};
use crate::storage::{self, StorageCredentials, StorageError, StorageLocation};

/// Glob for catalog files, relative to the input root.
pub const SONG_DATA_PATTERN: &str = "song_data/*/*/*/*.json";

/// Glob for event log files, relative to the input root.
pub const LOG_DATA_PATTERN: &str = "log_data/*/*/*.json";

/// Result alias for record source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised while locating or parsing input files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SourceError {
    /// The pattern matched nothing under the root.
    #[snafu(display("No input files match {pattern} under {root}"))]
    NoMatchingFiles {
        /// Pattern that was expanded.
        pattern: String,
        /// Root the pattern was expanded against.
        root: String,
    },

    /// Listing a directory during pattern expansion failed.
    #[snafu(display("Failed to list {path} while expanding {pattern}: {source}"))]
    ListDir {
        /// Directory being listed.
        path: String,
        /// Pattern being expanded.
        pattern: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// A matched file could not be read.
    #[snafu(display("Failed to read input file {path}: {source}"))]
    ReadFile {
        /// File that failed to read.
        path: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// A matched file is not valid UTF-8.
    #[snafu(display("Input file {path} is not valid UTF-8"))]
    NotUtf8 {
        /// Offending file.
        path: String,
        /// Decoder error.
        source: std::string::FromUtf8Error,
    },

    /// A line is not a JSON object.
    #[snafu(display("Malformed record in {path} at line {line}: {detail}"))]
    MalformedRecord {
        /// Offending file.
        path: String,
        /// 1-based line number.
        line: usize,
        /// Parser message or a description of the unexpected value.
        detail: String,
    },
}

/// The JSON objects read from one matched file.
///
/// Each file is one input partition; its position in [`RecordCollection`]
/// is stable for a given set of input paths.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Path relative to the source root.
    pub path: PathBuf,
    /// Objects in line order.
    pub records: Vec<JsonObject>,
}

/// All records matched by one pattern, grouped per file in sorted path order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordCollection {
    /// Matched files.
    pub files: Vec<SourceFile>,
}

impl RecordCollection {
    /// Total number of records across all files.
    pub fn len(&self) -> usize {
        self.files.iter().map(|f| f.records.len()).sum()
    }

    /// True when no file holds any record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into catalog records, in file then line order.
    pub fn catalog_records(&self) -> Vec<CatalogRecord> {
        self.files
            .iter()
            .flat_map(|f| f.records.iter().map(CatalogRecord::from_json))
            .collect()
    }

    /// Event records, one inner vector per input partition.
    pub fn event_partitions(&self) -> Vec<Vec<EventRecord>> {
        self.files
            .iter()
            .map(|f| f.records.iter().map(EventRecord::from_json).collect())
            .collect()
    }
}

/// Supplies raw JSON records to the pipeline.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Read every record in files matching `pattern`.
    ///
    /// An empty match, an unreadable file, or a malformed line is an error.
    async fn read_records(&self, pattern: &str) -> SourceResult<RecordCollection>;
}

/// [`RecordSource`] over a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalRecordSource {
    location: StorageLocation,
    credentials: Option<StorageCredentials>,
}

impl LocalRecordSource {
    /// Source rooted at `location`.
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            credentials: None,
        }
    }

    /// Attach backend credentials. The local backend has nothing to
    /// authenticate against and only records them.
    pub fn with_credentials(mut self, credentials: Option<StorageCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Expand `pattern` into matching file paths, sorted.
    pub async fn expand(&self, pattern: &str) -> SourceResult<Vec<PathBuf>> {
        let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
        let Some((file_component, dir_components)) = components.split_last() else {
            return NoMatchingFilesSnafu {
                pattern,
                root: self.location.to_string(),
            }
            .fail();
        };

        let mut dirs = vec![PathBuf::new()];
        for component in dir_components {
            let mut next = Vec::new();
            for dir in &dirs {
                for entry in self.list_or_empty(dir, pattern).await? {
                    if entry.is_dir && wildcard_match(component, &entry.name) {
                        next.push(entry.rel_path);
                    }
                }
            }
            dirs = next;
        }

        let mut files = Vec::new();
        for dir in &dirs {
            for entry in self.list_or_empty(dir, pattern).await? {
                if !entry.is_dir && wildcard_match(file_component, &entry.name) {
                    files.push(entry.rel_path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn list_or_empty(
        &self,
        dir: &Path,
        pattern: &str,
    ) -> SourceResult<Vec<storage::DirEntry>> {
        match storage::list_dir(&self.location, dir).await {
            Ok(entries) => Ok(entries),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(source) => Err(SourceError::ListDir {
                path: dir.display().to_string(),
                pattern: pattern.to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl RecordSource for LocalRecordSource {
    async fn read_records(&self, pattern: &str) -> SourceResult<RecordCollection> {
        let paths = self.expand(pattern).await?;
        ensure!(
            !paths.is_empty(),
            NoMatchingFilesSnafu {
                pattern,
                root: self.location.to_string(),
            }
        );
        debug!(
            "{pattern}: {} files matched under {} (credentials: {:?})",
            paths.len(),
            self.location,
            self.credentials
        );

        let contents = try_join_all(paths.into_iter().map(|path| async move {
            let bytes = storage::read_all_bytes(&self.location, &path)
                .await
                .context(ReadFileSnafu {
                    path: path.display().to_string(),
                })?;
            Ok::<_, SourceError>((path, bytes))
        }))
        .await?;

        let files = contents
            .into_par_iter()
            .map(|(path, bytes)| {
                let text = String::from_utf8(bytes).context(NotUtf8Snafu {
                    path: path.display().to_string(),
                })?;
                let records = parse_json_records(&path, &text)?;
                Ok(SourceFile { path, records })
            })
            .collect::<SourceResult<Vec<_>>>()?;

        Ok(RecordCollection { files })
    }
}

/// Parse a file body as JSON Lines, falling back to a single multi-line object.
pub fn parse_json_records(path: &Path, text: &str) -> SourceResult<Vec<JsonObject>> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(obj)) => records.push(obj),
            Ok(other) => {
                return MalformedRecordSnafu {
                    path: path.display().to_string(),
                    line: idx + 1,
                    detail: format!("expected a JSON object, found {}", json_kind(&other)),
                }
                .fail();
            }
            Err(line_err) => {
                if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(text) {
                    return Ok(vec![obj]);
                }
                return MalformedRecordSnafu {
                    path: path.display().to_string(),
                    line: idx + 1,
                    detail: line_err.to_string(),
                }
                .fail();
            }
        }
    }
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Match `name` against a single-component wildcard pattern.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();

    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((star_pi, star_ni)) = star {
            // Backtrack: let the last `*` swallow one more character.
            pi = star_pi + 1;
            ni = star_ni + 1;
            star = Some((star_pi, star_ni + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    async fn write(root: &Path, rel: &str, body: &str) -> TestResult {
        let abs = root.join(rel);
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(abs, body).await?;
        Ok(())
    }

    #[test]
    fn wildcard_match_cases() {
        assert!(wildcard_match("*", "A"));
        assert!(wildcard_match("*.json", "TRAAAAW128F429D538.json"));
        assert!(!wildcard_match("*.json", "notes.txt"));
        assert!(wildcard_match("2018-11-*.json", "2018-11-05-events.json"));
        assert!(wildcard_match("a?c", "abc"));
        assert!(!wildcard_match("a?c", "ac"));
        assert!(wildcard_match("log_data", "log_data"));
        assert!(!wildcard_match("log_data", "song_data"));
    }

    #[tokio::test]
    async fn expand_respects_pattern_depth() -> TestResult {
        let tmp = TempDir::new()?;
        write(tmp.path(), "song_data/A/B/C/one.json", "{}").await?;
        write(tmp.path(), "song_data/A/B/two.json", "{}").await?;
        write(tmp.path(), "song_data/A/B/C/D/three.json", "{}").await?;
        write(tmp.path(), "song_data/A/A/A/four.json", "{}").await?;
        write(tmp.path(), "song_data/A/B/C/skip.txt", "{}").await?;

        let source = LocalRecordSource::new(StorageLocation::local(tmp.path()));
        let paths = source.expand(SONG_DATA_PATTERN).await?;
        assert_eq!(
            paths,
            vec![
                PathBuf::from("song_data/A/A/A/four.json"),
                PathBuf::from("song_data/A/B/C/one.json"),
            ]
        );
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_records_descends_into_symlinked_dirs() -> TestResult {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("input");
        write(&root, "song_data/A/A/A/two.json", "{\"song_id\":\"S2\"}").await?;
        write(tmp.path(), "elsewhere/C/one.json", "{\"song_id\":\"S1\"}").await?;
        tokio::fs::create_dir_all(root.join("song_data/A/B")).await?;
        std::os::unix::fs::symlink(tmp.path().join("elsewhere/C"), root.join("song_data/A/B/C"))?;

        let source = LocalRecordSource::new(StorageLocation::local(&root));
        let collection = source.read_records(SONG_DATA_PATTERN).await?;

        let paths: Vec<_> = collection.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("song_data/A/A/A/two.json"),
                PathBuf::from("song_data/A/B/C/one.json"),
            ]
        );
        assert_eq!(collection.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn read_records_groups_by_file_in_sorted_order() -> TestResult {
        let tmp = TempDir::new()?;
        write(
            tmp.path(),
            "log_data/2018/11/b.json",
            "{\"page\":\"NextSong\"}\n\n{\"page\":\"Home\"}\n",
        )
        .await?;
        write(tmp.path(), "log_data/2018/11/a.json", "{\"page\":\"Logout\"}").await?;

        let source = LocalRecordSource::new(StorageLocation::local(tmp.path()));
        let collection = source.read_records(LOG_DATA_PATTERN).await?;

        assert_eq!(collection.files.len(), 2);
        assert_eq!(collection.files[0].path, PathBuf::from("log_data/2018/11/a.json"));
        assert_eq!(collection.len(), 3);

        let partitions = collection.event_partitions();
        assert_eq!(partitions[1][0].page.as_deref(), Some("NextSong"));
        assert_eq!(partitions[1][1].page.as_deref(), Some("Home"));
        Ok(())
    }

    #[tokio::test]
    async fn no_matching_files_is_an_error() -> TestResult {
        let tmp = TempDir::new()?;
        let source = LocalRecordSource::new(StorageLocation::local(tmp.path()));
        let err = source
            .read_records(LOG_DATA_PATTERN)
            .await
            .expect_err("expected NoMatchingFiles");
        assert!(matches!(err, SourceError::NoMatchingFiles { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_line_aborts_with_line_number() -> TestResult {
        let tmp = TempDir::new()?;
        write(
            tmp.path(),
            "log_data/2018/11/bad.json",
            "{\"page\":\"NextSong\"}\n{\"page\": \n",
        )
        .await?;

        let source = LocalRecordSource::new(StorageLocation::local(tmp.path()));
        let err = source
            .read_records(LOG_DATA_PATTERN)
            .await
            .expect_err("expected MalformedRecord");
        match err {
            SourceError::MalformedRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn non_object_line_is_rejected() {
        let err = parse_json_records(Path::new("x.json"), "[1, 2]").expect_err("array rejected");
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn pretty_printed_single_object_is_accepted() -> TestResult {
        let body = "{\n  \"song_id\": \"S1\",\n  \"title\": \"T\"\n}\n";
        let records = parse_json_records(Path::new("x.json"), body)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("song_id"), Some(&Value::from("S1")));
        Ok(())
    }
}
