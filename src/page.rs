//! Page content as handed over by an extractor.
//!
//! Extraction itself (readability scoring, DOM walking) is not this crate's
//! job; anything that can produce a title and a text blob implements
//! [`PageExtractor`]. The CLI reads the text from a file or stdin.

use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
};

/// Result of extracting a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub title: String,
    /// Page identity for history. `None` means the exchange is not persisted.
    pub url: Option<String>,
    pub text: String,
}

impl PageContent {
    pub fn new(title: impl Into<String>, url: Option<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url,
            text: text.into(),
        }
    }

    /// An extraction with only whitespace is treated as a failed one.
    pub fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Collaborator that produces the current page's content.
pub trait PageExtractor {
    /// `None` when nothing could be extracted.
    fn extract(&self) -> Option<PageContent>;
}

/// Reads page text from a file, or from stdin when the path is `-`.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    pub path: PathBuf,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl FileExtractor {
    fn read_text(&self) -> io::Result<String> {
        if self.path.as_os_str() == "-" {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        } else {
            fs::read_to_string(&self.path)
        }
    }

    fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled page".to_string())
        })
    }
}

impl PageExtractor for FileExtractor {
    fn extract(&self) -> Option<PageContent> {
        match self.read_text() {
            Ok(text) => {
                let page = PageContent::new(self.title(), self.url.clone(), text);
                page.is_usable().then_some(page)
            }
            Err(err) => {
                tracing::error!("Error reading page content from {}: {}", self.path.display(), err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_extractor_reads_text_and_defaults_title() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Clock skew is common.").unwrap();

        let extractor = FileExtractor {
            path: file.path().to_path_buf(),
            title: None,
            url: Some("https://a.test".into()),
        };
        let page = extractor.extract().expect("page extracted");
        assert_eq!(page.text.trim(), "Clock skew is common.");
        assert!(!page.title.is_empty());
        assert_eq!(page.url.as_deref(), Some("https://a.test"));
    }

    #[test]
    fn test_blank_or_missing_file_is_a_failed_extraction() {
        let blank = NamedTempFile::new().unwrap();
        let extractor = FileExtractor {
            path: blank.path().to_path_buf(),
            title: Some("Blank".into()),
            url: None,
        };
        assert!(extractor.extract().is_none());

        let missing = FileExtractor {
            path: PathBuf::from("non/existent/page.txt"),
            title: None,
            url: None,
        };
        assert!(missing.extract().is_none());
    }
}
