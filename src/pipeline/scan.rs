//! Template scanning: load an HTML template and find its `${identifier}` placeholders.
//!
//! Only the braced form with an identifier of ASCII letters, digits and
//! underscores is a placeholder. Everything else that merely looks like one
//! (`${}`, `${two words}`, `${unterminated`, `$bare`) is ignored here and left
//! verbatim by the merger.

use crate::error::ProfileError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `${identifier}`; capture group 1 is the identifier.
pub(crate) static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").unwrap());

/// Placeholders filled locally by the merger; never requested from the model.
pub const SYSTEM_VARIABLES: [&str; 3] = ["timestamp", "case_number", "logo_filename"];

/// True if `name` is one of [`SYSTEM_VARIABLES`].
pub fn is_system_variable(name: &str) -> bool {
    SYSTEM_VARIABLES.contains(&name)
}

/// An HTML template loaded into memory. Read once per batch, shared read-only.
#[derive(Debug, Clone)]
pub struct Template {
    path: PathBuf,
    text: String,
}

impl Template {
    /// Read a template from disk.
    ///
    /// # Errors
    /// `TemplateNotFound`, `PermissionDenied`, or `TemplateRead`; all fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProfileError::TemplateNotFound { path: path.clone() },
            std::io::ErrorKind::PermissionDenied => {
                ProfileError::PermissionDenied { path: path.clone() }
            }
            _ => ProfileError::TemplateRead {
                path: path.clone(),
                source: e,
            },
        })?;
        debug!("Loaded template {} ({} bytes)", path.display(), text.len());
        Ok(Self { path, text })
    }

    /// Wrap in-memory template text.
    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Scan this template's placeholders.
    pub fn placeholders(&self) -> PlaceholderSet {
        scan_placeholders(&self.text)
    }
}

/// The distinct placeholder identifiers of a template, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderSet(BTreeSet<String>);

impl PlaceholderSet {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// All identifiers, sorted.
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    /// Identifiers the generative service must supply: everything except
    /// [`SYSTEM_VARIABLES`], sorted.
    pub fn requested_fields(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|name| !is_system_variable(name))
            .cloned()
            .collect()
    }
}

impl<'a> IntoIterator for &'a PlaceholderSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Extract the distinct placeholder identifiers from template text.
pub fn scan_placeholders(text: &str) -> PlaceholderSet {
    PlaceholderSet(
        RE_PLACEHOLDER
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect(),
    )
}

/// List the `*.html` templates in `dir`, sorted by file name.
///
/// A missing directory is not an error; it simply has no templates.
pub fn list_templates(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, ProfileError> {
    let dir = dir.as_ref();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Template directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(ProfileError::TemplateRead {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };

    let mut templates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("html"))
                    .unwrap_or(false)
        })
        .collect();
    templates.sort();
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_dedupes_and_sorts() {
        let set = scan_placeholders("<p>${b} ${a} ${b} ${company_name}</p>");
        assert_eq!(set.to_vec(), vec!["a", "b", "company_name"]);
    }

    #[test]
    fn scan_empty_template() {
        assert!(scan_placeholders("").is_empty());
        assert!(scan_placeholders("<html><body>static</body></html>").is_empty());
    }

    #[test]
    fn malformed_markers_are_ignored() {
        let set = scan_placeholders("${} ${two words} ${unterminated $bare ${ok_1} {$x} ${-dash}");
        assert_eq!(set.to_vec(), vec!["ok_1"]);
    }

    #[test]
    fn scanning_is_deterministic() {
        let t = "<h1>${name}</h1><p>${ceo_name}, ${founded}</p><img src='${logo_filename}'>";
        assert_eq!(scan_placeholders(t), scan_placeholders(t));
    }

    #[test]
    fn system_variables_are_not_requested() {
        let set = scan_placeholders("${timestamp} ${case_number} ${logo_filename} ${industry}");
        assert_eq!(set.len(), 4);
        assert_eq!(set.requested_fields(), vec!["industry"]);
    }

    #[test]
    fn load_missing_template_is_not_found() {
        let err = Template::load("/definitely/not/here.html").unwrap_err();
        assert!(matches!(err, ProfileError::TemplateNotFound { .. }));
    }

    #[test]
    fn load_and_list_templates() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.html"), "<p>${x}</p>").unwrap();
        std::fs::write(dir.path().join("a.HTML"), "<p>${y}</p>").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore").unwrap();

        let list = list_templates(dir.path()).unwrap();
        let names: Vec<_> = list
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.HTML", "b.html"]);

        let t = Template::load(dir.path().join("b.html")).unwrap();
        assert_eq!(t.placeholders().to_vec(), vec!["x"]);
    }

    #[test]
    fn list_missing_dir_is_empty() {
        assert!(list_templates("/no/such/template/dir").unwrap().is_empty());
    }
}
