//! Page and block discovery.
//!
//! Discovery runs in two phases:
//! 1. [`scan`] walks a directory and reads every candidate file (all I/O).
//! 2. [`classify`] validates candidates into typed records plus errors (pure).
//!
//! A malformed file never aborts discovery: it is reported as a
//! [`DiscoveryError`] and left out of the result. A missing directory
//! yields no candidates. Records come out sorted by relative path so
//! generated output is reproducible.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_yaml::Mapping;
use walkdir::WalkDir;

use crate::util::fs::slash_path;

const PAGE_EXTENSIONS: &[&str] = &["md", "mdx"];
const BLOCK_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js"];

/// `<Block src="chart" />` references inside page bodies.
static BLOCK_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<Block\s+[^>]*?src\s*=\s*["']([^"']+)["']"#).expect("valid block regex")
});

/// What a candidate file is being scanned as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Page,
    Block,
}

/// A file found on disk, not yet validated.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: ArtifactKind,
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the scanned directory, `/`-separated
    pub rel_path: String,
    /// File contents, or the read error message
    pub contents: Result<String, String>,
}

/// How a block renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Server,
    Client,
}

/// A page: one content document served as one route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredPage {
    /// Route identifier, e.g. `index` or `reports/q1`
    pub route: String,
    pub path: PathBuf,
    /// Containing directory relative to the pages root, if nested
    pub parent: Option<String>,
    pub title: Option<String>,
    pub frontmatter: Mapping,
    /// Block ids referenced from the page body
    pub blocks: Vec<String>,
    /// Raw document text, embedded verbatim into the bundle
    #[serde(skip)]
    pub source: String,
}

/// A block: a reusable component exposed through its own routes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredBlock {
    /// Block identifier, e.g. `chart` or `charts/revenue`
    pub id: String,
    pub path: PathBuf,
    pub parent: Option<String>,
    pub render: RenderMode,
}

/// Why a discovered file was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryErrorKind {
    Unreadable,
    MalformedFrontmatter,
    InvalidName,
    DuplicateRoute,
    UnknownBlock,
}

/// A problem with a single artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryError {
    pub kind: DiscoveryErrorKind,
    pub path: PathBuf,
    pub message: String,
}

/// Everything discovery produced for one workbook.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub pages: Vec<DiscoveredPage>,
    pub blocks: Vec<DiscoveredBlock>,
    pub errors: Vec<DiscoveryError>,
}

impl Discovery {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Discover pages and blocks under the given directories.
pub fn discover(pages_dir: &Path, blocks_dir: &Path) -> Discovery {
    let mut candidates = scan(pages_dir, ArtifactKind::Page);
    candidates.extend(scan(blocks_dir, ArtifactKind::Block));
    classify(candidates)
}

/// Phase one: collect candidate files under `dir`.
///
/// Hidden entries, `_`-prefixed helpers, `node_modules`, declaration files
/// and tests are skipped. A missing directory yields an empty list.
pub fn scan(dir: &Path, kind: ArtifactKind) -> Vec<Candidate> {
    if !dir.is_dir() {
        tracing::debug!("{} does not exist, nothing to discover", dir.display());
        return Vec::new();
    }

    let extensions = match kind {
        ArtifactKind::Page => PAGE_EXTENSIONS,
        ArtifactKind::Block => BLOCK_EXTENSIONS,
    };

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_ignored(entry.file_name()));

    let mut candidates = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy();
        if file_name.ends_with(".d.ts") || file_name.contains(".test.") {
            continue;
        }
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e));
        if !matches_ext {
            continue;
        }

        let rel = path.strip_prefix(dir).unwrap_or(path);
        candidates.push(Candidate {
            kind,
            path: path.to_path_buf(),
            rel_path: slash_path(rel),
            contents: std::fs::read_to_string(path).map_err(|e| e.to_string()),
        });
    }

    candidates.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    candidates
}

fn is_ignored(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name.starts_with('_') || name == "node_modules"
}

/// Phase two: validate candidates into pages, blocks, and errors.
pub fn classify(candidates: Vec<Candidate>) -> Discovery {
    let mut discovery = Discovery::default();
    let mut page_routes = BTreeSet::new();
    let mut block_ids = BTreeSet::new();

    let (pages, blocks): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| c.kind == ArtifactKind::Page);

    for candidate in blocks {
        match classify_block(&candidate) {
            Ok(block) if !block_ids.insert(block.id.clone()) => {
                discovery.errors.push(DiscoveryError {
                    kind: DiscoveryErrorKind::DuplicateRoute,
                    path: candidate.path.clone(),
                    message: format!("block `{}` is defined more than once", block.id),
                });
            }
            Ok(block) => discovery.blocks.push(block),
            Err(error) => discovery.errors.push(error),
        }
    }

    for candidate in pages {
        match classify_page(&candidate) {
            Ok(page) if !page_routes.insert(page.route.clone()) => {
                discovery.errors.push(DiscoveryError {
                    kind: DiscoveryErrorKind::DuplicateRoute,
                    path: candidate.path.clone(),
                    message: format!("route `{}` is defined more than once", page.route),
                });
            }
            Ok(page) => discovery.pages.push(page),
            Err(error) => discovery.errors.push(error),
        }
    }

    // References are checked last, against the blocks that survived validation.
    for page in &discovery.pages {
        for block in &page.blocks {
            if !block_ids.contains(block) {
                discovery.errors.push(DiscoveryError {
                    kind: DiscoveryErrorKind::UnknownBlock,
                    path: page.path.clone(),
                    message: format!("page `{}` references unknown block `{}`", page.route, block),
                });
            }
        }
    }

    discovery
}

fn classify_page(candidate: &Candidate) -> Result<DiscoveredPage, DiscoveryError> {
    let contents = read_contents(candidate)?;
    let route = artifact_id(candidate)?;

    let (frontmatter, body) =
        split_frontmatter(contents).map_err(|message| DiscoveryError {
            kind: DiscoveryErrorKind::MalformedFrontmatter,
            path: candidate.path.clone(),
            message,
        })?;

    let mut blocks: Vec<String> = BLOCK_REF
        .captures_iter(body)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();
    blocks.sort();
    blocks.dedup();

    Ok(DiscoveredPage {
        parent: parent_of(&route),
        title: frontmatter
            .get("title")
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_string),
        route,
        path: candidate.path.clone(),
        frontmatter,
        blocks,
        source: contents.to_string(),
    })
}

fn classify_block(candidate: &Candidate) -> Result<DiscoveredBlock, DiscoveryError> {
    let contents = read_contents(candidate)?;
    let id = artifact_id(candidate)?;

    let first_statement = contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("//"));
    let render = match first_statement {
        Some(line) if line.starts_with("\"use client\"") || line.starts_with("'use client'") => {
            RenderMode::Client
        }
        _ => RenderMode::Server,
    };

    Ok(DiscoveredBlock {
        parent: parent_of(&id),
        id,
        path: candidate.path.clone(),
        render,
    })
}

fn read_contents(candidate: &Candidate) -> Result<&str, DiscoveryError> {
    candidate
        .contents
        .as_deref()
        .map_err(|message| DiscoveryError {
            kind: DiscoveryErrorKind::Unreadable,
            path: candidate.path.clone(),
            message: format!("failed to read file: {}", message),
        })
}

/// Relative path without its extension, validated segment by segment.
fn artifact_id(candidate: &Candidate) -> Result<String, DiscoveryError> {
    let id = match candidate.rel_path.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => candidate.rel_path.clone(),
    };

    let valid = id.split('/').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    });

    if valid {
        Ok(id)
    } else {
        Err(DiscoveryError {
            kind: DiscoveryErrorKind::InvalidName,
            path: candidate.path.clone(),
            message: format!(
                "`{}` is not a valid identifier (use letters, digits, `-` and `_`)",
                candidate.rel_path
            ),
        })
    }
}

fn parent_of(id: &str) -> Option<String> {
    id.rsplit_once('/').map(|(parent, _)| parent.to_string())
}

/// Split `---`-fenced YAML frontmatter from the document body.
fn split_frontmatter(contents: &str) -> Result<(Mapping, &str), String> {
    let Some(rest) = contents
        .strip_prefix("---\n")
        .or_else(|| contents.strip_prefix("---\r\n"))
    else {
        return Ok((Mapping::new(), contents));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            if yaml.trim().is_empty() {
                return Ok((Mapping::new(), body));
            }
            let fields = serde_yaml::from_str::<Mapping>(yaml)
                .map_err(|e| format!("invalid frontmatter: {}", e))?;
            return Ok((fields, body));
        }
        offset += line.len();
    }

    Err("frontmatter is missing its closing `---`".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_two_pages_one_block() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "pages/index.mdx", "# Home\n\n<Block src=\"chart\" />\n");
        write(tmp.path(), "pages/about.md", "---\ntitle: About us\n---\nHello\n");
        write(tmp.path(), "blocks/chart.tsx", "export default function Chart() {}\n");

        let discovery = discover(&tmp.path().join("pages"), &tmp.path().join("blocks"));

        assert!(discovery.is_clean(), "{:?}", discovery.errors);
        let routes: Vec<&str> = discovery.pages.iter().map(|p| p.route.as_str()).collect();
        assert_eq!(routes, vec!["about", "index"]);
        assert_eq!(discovery.blocks.len(), 1);
        assert_eq!(discovery.blocks[0].id, "chart");
        assert_eq!(discovery.pages[0].title.as_deref(), Some("About us"));
        assert_eq!(discovery.pages[1].blocks, vec!["chart".to_string()]);
    }

    #[test]
    fn test_missing_directories_are_empty() {
        let tmp = TempDir::new().unwrap();
        let discovery = discover(&tmp.path().join("nope"), &tmp.path().join("also-nope"));
        assert!(discovery.pages.is_empty());
        assert!(discovery.blocks.is_empty());
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn test_malformed_frontmatter_is_excluded() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "pages/good.md", "Fine\n");
        write(tmp.path(), "pages/bad.md", "---\ntitle: Never closed\n");
        write(tmp.path(), "pages/worse.md", "---\njust words\n---\n");

        let discovery = discover(&tmp.path().join("pages"), &tmp.path().join("blocks"));

        let routes: Vec<&str> = discovery.pages.iter().map(|p| p.route.as_str()).collect();
        assert_eq!(routes, vec!["good"]);
        assert_eq!(discovery.errors.len(), 2);
        assert!(discovery
            .errors
            .iter()
            .all(|e| e.kind == DiscoveryErrorKind::MalformedFrontmatter));
    }

    #[test]
    fn test_duplicate_route_keeps_first() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "pages/about.md", "first\n");
        write(tmp.path(), "pages/about.mdx", "second\n");

        let discovery = discover(&tmp.path().join("pages"), &tmp.path().join("blocks"));

        assert_eq!(discovery.pages.len(), 1);
        assert_eq!(discovery.pages[0].source, "first\n");
        assert_eq!(discovery.errors[0].kind, DiscoveryErrorKind::DuplicateRoute);
    }

    #[test]
    fn test_nested_and_client_blocks() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "blocks/charts/revenue.tsx", "\"use client\";\nexport default 1;\n");
        write(tmp.path(), "blocks/_helpers.ts", "export const x = 1;\n");
        write(tmp.path(), "blocks/types.d.ts", "declare const y: number;\n");
        write(tmp.path(), "blocks/table.test.ts", "test();\n");

        let discovery = discover(&tmp.path().join("pages"), &tmp.path().join("blocks"));

        assert_eq!(discovery.blocks.len(), 1);
        let block = &discovery.blocks[0];
        assert_eq!(block.id, "charts/revenue");
        assert_eq!(block.parent.as_deref(), Some("charts"));
        assert_eq!(block.render, RenderMode::Client);
    }

    #[test]
    fn test_invalid_name_and_unknown_block() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "pages/my page.md", "text\n");
        write(tmp.path(), "pages/report.md", "<Block src=\"missing\" />\n");

        let discovery = discover(&tmp.path().join("pages"), &tmp.path().join("blocks"));

        let kinds: Vec<DiscoveryErrorKind> = discovery.errors.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&DiscoveryErrorKind::InvalidName));
        assert!(kinds.contains(&DiscoveryErrorKind::UnknownBlock));
        assert_eq!(discovery.pages.len(), 1);
    }

    #[test]
    fn test_classify_is_pure() {
        let candidates = vec![Candidate {
            kind: ArtifactKind::Page,
            path: PathBuf::from("/virtual/pages/index.md"),
            rel_path: "index.md".to_string(),
            contents: Err("permission denied".to_string()),
        }];

        let discovery = classify(candidates);
        assert!(discovery.pages.is_empty());
        assert_eq!(discovery.errors[0].kind, DiscoveryErrorKind::Unreadable);
    }

    #[test]
    fn test_yaml_lists_and_block_scalars_in_frontmatter() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "pages/report.md",
            "---\ntitle: Report\ntags:\n  - sales\n  - q3\nsummary: |\n  Quarterly numbers.\n  Draft.\nowner:\n  team: finance\n---\nBody\n",
        );

        let discovery = discover(&tmp.path().join("pages"), &tmp.path().join("blocks"));

        assert!(discovery.is_clean(), "{:?}", discovery.errors);
        assert_eq!(discovery.pages.len(), 1);
        let page = &discovery.pages[0];
        assert_eq!(page.title.as_deref(), Some("Report"));
        let tags = page.frontmatter.get("tags").and_then(|v| v.as_sequence()).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(page.frontmatter.get("owner").unwrap().is_mapping());
    }

    #[test]
    fn test_frontmatter_parsing() {
        let (fields, body) =
            split_frontmatter("---\ntitle: \"Q1\"\n# comment\nowner: finance\n---\nBody\n").unwrap();
        assert_eq!(fields.get("title").and_then(|v| v.as_str()), Some("Q1"));
        assert_eq!(fields.get("owner").and_then(|v| v.as_str()), Some("finance"));
        assert_eq!(body, "Body\n");

        let (fields, body) = split_frontmatter("No fence\n").unwrap();
        assert!(fields.is_empty());
        assert_eq!(body, "No fence\n");
    }
}
