use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::NaiveDate;
use tracing::debug;
use walkdir::WalkDir;

use crate::links::{LinkFuture, LinkResolver};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
const TEXT_EXTENSIONS: [&str; 4] = ["txt", "md", "markdown", "html"];

/// A directory of notes that wiki links resolve against.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finds the file a link points at. Looks next to `source_dir` first, then
    /// at the vault root, then anywhere below the root by file name (or stem
    /// when the link has no extension). Aliases (`|`) and heading anchors (`#`)
    /// are ignored.
    pub fn find_link_target(&self, link: &str, source_dir: Option<&Path>) -> Option<PathBuf> {
        let target = link_target(link);
        if target.is_empty() {
            return None;
        }

        let mut candidates = Vec::new();
        if let Some(dir) = source_dir {
            candidates.push(dir.join(target));
            candidates.push(dir.join(format!("{target}.md")));
        }
        candidates.push(self.root.join(target));
        candidates.push(self.root.join(format!("{target}.md")));
        if let Some(found) = candidates.into_iter().find(|path| path.is_file()) {
            return Some(found);
        }

        let wanted = Path::new(target)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())?;
        let has_extension = Path::new(target).extension().is_some();
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                let path = entry.path();
                let name_matches = path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy() == wanted);
                let stem_matches = !has_extension
                    && path
                        .file_stem()
                        .is_some_and(|stem| stem.to_string_lossy() == wanted);
                name_matches || stem_matches
            })
            .map(|entry| entry.into_path())
    }

    /// Resolver that inlines linked text notes.
    pub fn text_resolver(&self, source_dir: Option<&Path>) -> VaultTextResolver {
        VaultTextResolver {
            vault: self.clone(),
            source_dir: source_dir.map(Path::to_path_buf),
        }
    }

    /// Resolver that turns linked images into base64 data URLs.
    pub fn image_resolver(&self, source_dir: Option<&Path>) -> VaultImageResolver {
        VaultImageResolver {
            vault: self.clone(),
            source_dir: source_dir.map(Path::to_path_buf),
        }
    }
}

fn link_target(link: &str) -> &str {
    let without_alias = link.split('|').next().unwrap_or(link);
    without_alias.split('#').next().unwrap_or(without_alias).trim()
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
}

pub struct VaultTextResolver {
    vault: Vault,
    source_dir: Option<PathBuf>,
}

impl LinkResolver for VaultTextResolver {
    fn resolve<'a>(&'a self, link: &'a str) -> LinkFuture<'a> {
        Box::pin(async move {
            let path = self
                .vault
                .find_link_target(link, self.source_dir.as_deref())?;
            let extension = extension_of(&path)?;
            if !TEXT_EXTENSIONS.contains(&extension.as_str()) {
                return None;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => Some(content),
                Err(error) => {
                    debug!(path = %path.display(), error = %error, "linked note unreadable");
                    None
                }
            }
        })
    }
}

pub struct VaultImageResolver {
    vault: Vault,
    source_dir: Option<PathBuf>,
}

impl LinkResolver for VaultImageResolver {
    fn resolve<'a>(&'a self, link: &'a str) -> LinkFuture<'a> {
        Box::pin(async move {
            let path = self
                .vault
                .find_link_target(link, self.source_dir.as_deref())?;
            let extension = extension_of(&path)?;
            if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
                return None;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    debug!(path = %path.display(), error = %error, "linked image unreadable");
                    return None;
                }
            };
            let media_type = if extension == "jpg" {
                "jpeg"
            } else {
                extension.as_str()
            };
            Some(format!(
                "data:image/{media_type};base64,{}",
                BASE64_STANDARD.encode(bytes)
            ))
        })
    }
}

/// First `{date}_{NN}_LLM.md` in `dir` that does not exist yet, NN from 01
/// to 99.
pub fn next_free_doc_path(dir: &Path, date: NaiveDate) -> Option<PathBuf> {
    let prefix = date.format("%Y-%m-%d").to_string();
    (1..=99)
        .map(|index| dir.join(format!("{prefix}_{index:02}_LLM.md")))
        .find(|path| !path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_target_strips_alias_and_heading() {
        assert_eq!(link_target("note|Alias"), "note");
        assert_eq!(link_target("note#Section"), "note");
        assert_eq!(link_target(" dir/note.md "), "dir/note.md");
    }

    #[test]
    fn finds_notes_by_path_name_and_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("nested/idea.md"), "idea").expect("write");
        std::fs::write(dir.path().join("top.txt"), "top").expect("write");
        let vault = Vault::new(dir.path());

        assert_eq!(
            vault.find_link_target("nested/idea.md", None),
            Some(dir.path().join("nested/idea.md"))
        );
        assert_eq!(
            vault.find_link_target("idea", None),
            Some(dir.path().join("nested/idea.md"))
        );
        assert_eq!(
            vault.find_link_target("top.txt", None),
            Some(dir.path().join("top.txt"))
        );
        assert_eq!(vault.find_link_target("missing", None), None);
        assert_eq!(vault.find_link_target("", None), None);
    }

    #[test]
    fn source_dir_wins_over_tree_walk() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("a")).expect("mkdir");
        std::fs::create_dir_all(dir.path().join("b")).expect("mkdir");
        std::fs::write(dir.path().join("a/note.md"), "a").expect("write");
        std::fs::write(dir.path().join("b/note.md"), "b").expect("write");
        let vault = Vault::new(dir.path());

        assert_eq!(
            vault.find_link_target("note", Some(&dir.path().join("b"))),
            Some(dir.path().join("b/note.md"))
        );
        assert_eq!(
            vault.find_link_target("note|shown", None),
            Some(dir.path().join("a/note.md"))
        );
    }

    #[test]
    fn next_free_doc_path_skips_taken_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        assert_eq!(
            next_free_doc_path(dir.path(), date),
            Some(dir.path().join("2024-03-09_01_LLM.md"))
        );

        std::fs::write(dir.path().join("2024-03-09_01_LLM.md"), "").expect("write");
        std::fs::write(dir.path().join("2024-03-09_02_LLM.md"), "").expect("write");
        assert_eq!(
            next_free_doc_path(dir.path(), date),
            Some(dir.path().join("2024-03-09_03_LLM.md"))
        );
    }

    #[test]
    fn next_free_doc_path_gives_up_after_99() {
        let dir = tempfile::tempdir().expect("tempdir");
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).expect("date");
        for index in 1..=99 {
            let name = format!("2024-03-09_{index:02}_LLM.md");
            std::fs::write(dir.path().join(name), "").expect("write");
        }
        assert_eq!(next_free_doc_path(dir.path(), date), None);
    }
}
