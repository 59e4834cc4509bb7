//! The on-disk markdown tree: categories, slugs, atomic writes, hashing.
use std::{path::PathBuf, sync::Arc};

use {
    dashmap::DashMap,
    sha2::{Digest, Sha256},
    tokio::io::AsyncWriteExt,
};

use crate::error::{Error, Result};

/// Name of the sentinel file marking an initialized memory tree.
pub const MAIN_FILE: &str = "main.md";

/// Name of the JSON metadata mirror kept next to the tree.
pub const INDEX_FILE: &str = "files_index.json";

/// Coarse classifier for a memory file; doubles as the parent directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Main,
    Project,
    Concept,
    Conversation,
    Preference,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Main,
        Category::Project,
        Category::Concept,
        Category::Conversation,
        Category::Preference,
        Category::Other,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Project => "project",
            Self::Concept => "concept",
            Self::Conversation => "conversation",
            Self::Preference => "preference",
            Self::Other => "other",
        }
    }

    /// Directory the category's files live in. `Main` has no directory; it
    /// is the root-level `main.md` sentinel.
    #[must_use]
    pub fn dir_name(&self) -> Option<&'static str> {
        match self {
            Self::Main => None,
            Self::Project => Some("projects"),
            Self::Concept => Some("concepts"),
            Self::Conversation => Some("conversations"),
            Self::Preference => Some("preferences"),
            Self::Other => Some("other"),
        }
    }

    #[must_use]
    pub fn from_dir(dir: &str) -> Option<Self> {
        match dir {
            "projects" => Some(Self::Project),
            "concepts" => Some(Self::Concept),
            "conversations" => Some(Self::Conversation),
            "preferences" => Some(Self::Preference),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown category {s:?} (expected main, project, concept, conversation, preference or other)"
                ))
            })
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for Category {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Category {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Derive a slug from a title: lowercased, runs of non-alphanumerics
/// collapsed to a single `_`.
#[must_use]
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_underscore = true;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            slug.push('_');
            last_underscore = true;
        }
    }
    slug.trim_end_matches('_').to_string()
}

/// Relative path for a category/slug pair.
pub fn file_path_for(category: Category, slug: &str) -> Result<String> {
    if slug.is_empty() {
        return Err(Error::InvalidArgument(
            "title produces an empty slug".into(),
        ));
    }
    match category.dir_name() {
        None => Ok(MAIN_FILE.to_string()),
        Some(dir) => Ok(format!("{dir}/{slug}.md")),
    }
}

/// Category implied by a relative path inside the tree.
pub fn category_from_path(path: &str) -> Result<Category> {
    if path == MAIN_FILE {
        return Ok(Category::Main);
    }
    let dir = path
        .split('/')
        .next()
        .filter(|_| path.contains('/'))
        .ok_or_else(|| Error::InvalidArgument(format!("path {path:?} has no category directory")))?;
    Category::from_dir(dir)
        .ok_or_else(|| Error::InvalidArgument(format!("path {path:?} has unknown category directory {dir:?}")))
}

/// Word count the way the JSON index reports it. Tokens with no
/// alphanumeric characters (header markers, list bullets, rules) don't count.
#[must_use]
pub fn word_count(content: &str) -> usize {
    content
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// SHA-256 hex digest of a string's bytes.
#[must_use]
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Title from the first `# ` heading, if any.
#[must_use]
pub fn title_from_content(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix("# ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToOwned::to_owned)
    })
}

/// First non-header paragraph, used as the JSON index description.
#[must_use]
pub fn description_from_content(content: &str) -> String {
    let mut paragraph: Vec<&str> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        if trimmed.starts_with('#') {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(trimmed);
    }
    let mut description = paragraph.join(" ");
    if description.chars().count() > 200 {
        description = description.chars().take(200).collect();
        description.push('…');
    }
    description
}

/// One async mutex per relative path. Writes to the same file are totally
/// ordered; distinct files proceed independently.
#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl PathLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, path: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// CRUD over the markdown tree rooted at `MEMORY_FILES_PATH`.
///
/// All writes are atomic: the content goes to a temp file in the target
/// directory, is fsynced, then renamed over the destination. Callers are
/// responsible for holding the per-path lock across read-modify-write
/// sequences; the store itself only guarantees that no reader ever observes
/// a torn file.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Absolute path for a relative path, rejecting traversal out of the tree.
    pub fn abs(&self, rel: &str) -> Result<PathBuf> {
        if rel.is_empty()
            || rel.starts_with('/')
            || rel.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(Error::InvalidArgument(format!("invalid path {rel:?}")));
        }
        Ok(self.root.join(rel))
    }

    pub async fn exists(&self, rel: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.abs(rel)?).await?)
    }

    pub async fn read(&self, rel: &str) -> Result<String> {
        match tokio::fs::read_to_string(self.abs(rel)?).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("file {rel:?}")))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically write `content` (normalized to LF line endings) and return
    /// the committed content hash.
    pub async fn write(&self, rel: &str, content: &str) -> Result<String> {
        let path = self.abs(rel)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let normalized = content.replace("\r\n", "\n");
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidArgument(format!("invalid path {rel:?}")))?;
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));

        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(normalized.as_bytes()).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, &path).await?;

        Ok(sha256_hex(&normalized))
    }

    pub async fn remove(&self, rel: &str) -> Result<()> {
        match tokio::fs::remove_file(self.abs(rel)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("file {rel:?}")))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// All markdown files under the root, as sorted relative paths. Files in
    /// unknown directories are skipped with a warning.
    pub fn list(&self) -> Vec<String> {
        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .flatten()
        {
            if !entry.path().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if rel.split('/').any(|seg| seg.starts_with('.')) {
                continue;
            }
            if category_from_path(&rel).is_err() {
                tracing::warn!(path = %rel, "skipping file outside known category directories");
                continue;
            }
            paths.push(rel);
        }
        paths.sort();
        paths
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[test]
    fn slugify_basics() {
        assert_eq!(slugify("P1"), "p1");
        assert_eq!(slugify("Project Alpha"), "project_alpha");
        assert_eq!(slugify("Hello, World!"), "hello_world");
        assert_eq!(slugify("  spaces  "), "spaces");
        assert_eq!(slugify("Ünïcode Tïtle"), "ünïcode_tïtle");
    }

    #[test]
    fn category_round_trip() {
        for cat in Category::ALL {
            assert_eq!(cat.as_str().parse::<Category>().unwrap(), cat);
        }
        assert!("journal".parse::<Category>().is_err());
    }

    #[test]
    fn paths_for_categories() {
        assert_eq!(
            file_path_for(Category::Project, "p1").unwrap(),
            "projects/p1.md"
        );
        assert_eq!(file_path_for(Category::Main, "whatever").unwrap(), "main.md");
        assert!(file_path_for(Category::Other, "").is_err());
    }

    #[test]
    fn category_from_paths() {
        assert_eq!(category_from_path("main.md").unwrap(), Category::Main);
        assert_eq!(
            category_from_path("projects/p1.md").unwrap(),
            Category::Project
        );
        assert!(category_from_path("notes/x.md").is_err());
        assert!(category_from_path("loose.md").is_err());
    }

    #[test]
    fn description_skips_headers() {
        let content = "# Title\n\nFirst paragraph\nsecond line.\n\nSecond paragraph.";
        assert_eq!(
            description_from_content(content),
            "First paragraph second line."
        );
        assert_eq!(description_from_content("# Only a header"), "");
    }

    #[test]
    fn word_count_ignores_markup_tokens() {
        assert_eq!(word_count("# P1\n\nAlpha."), 2);
        assert_eq!(word_count("- one\n- two\n---\n"), 2);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn title_extraction() {
        assert_eq!(
            title_from_content("# My Title\n\nbody").as_deref(),
            Some("My Title")
        );
        assert_eq!(title_from_content("no header here"), None);
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());

        let hash = store.write("projects/p1.md", "# P1\n\nAlpha.").await.unwrap();
        assert_eq!(hash, sha256_hex("# P1\n\nAlpha."));
        assert_eq!(store.read("projects/p1.md").await.unwrap(), "# P1\n\nAlpha.");
        assert!(store.exists("projects/p1.md").await.unwrap());
    }

    #[tokio::test]
    async fn write_normalizes_crlf() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        store.write("other/x.md", "a\r\nb\r\n").await.unwrap();
        assert_eq!(store.read("other/x.md").await.unwrap(), "a\nb\n");
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        let err = store.read("projects/none.md").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        assert!(store.read("../etc/passwd").await.is_err());
        assert!(store.read("/etc/passwd").await.is_err());
        assert!(store.read("projects/../../x.md").await.is_err());
    }

    #[tokio::test]
    async fn list_returns_sorted_known_files() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().to_path_buf());
        store.write("projects/b.md", "b").await.unwrap();
        store.write("projects/a.md", "a").await.unwrap();
        store.write("main.md", "main").await.unwrap();
        // Unknown directory is skipped.
        tokio::fs::create_dir_all(tmp.path().join("scratch"))
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join("scratch/x.md"), "x")
            .await
            .unwrap();

        assert_eq!(
            store.list(),
            vec!["main.md", "projects/a.md", "projects/b.md"]
        );
    }

    #[tokio::test]
    async fn path_locks_serialize_same_path() {
        let locks = Arc::new(PathLocks::new());
        let g1 = locks.acquire("a.md").await;
        let locks2 = Arc::clone(&locks);
        let handle = tokio::spawn(async move {
            let _g = locks2.acquire("a.md").await;
        });
        // Distinct path proceeds while "a.md" is held.
        let _g2 = locks.acquire("b.md").await;
        drop(g1);
        handle.await.unwrap();
    }
}
