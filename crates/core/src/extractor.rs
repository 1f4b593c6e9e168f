use std::path::{Path, PathBuf};

use lopdf::Document;
use walkdir::WalkDir;

use crate::error::IngestError;

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 1-based page number; `None` for formats without pages.
    pub number: Option<u32>,
    pub text: String,
}

pub trait TextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: Some(page_no),
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::Extraction(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

#[derive(Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|error| {
            IngestError::Extraction(format!("{} is not utf-8: {error}", path.display()))
        })?;
        Ok(vec![PageText { number: None, text }])
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn extract_document(path: &Path) -> Result<Vec<PageText>, IngestError> {
    match extension_of(path).as_deref() {
        Some("pdf") => LopdfExtractor.extract_pages(path),
        Some("txt") | Some("md") => PlainTextExtractor.extract_pages(path),
        other => Err(IngestError::InvalidArgument(format!(
            "unsupported file type {:?} for {}",
            other.unwrap_or(""),
            path.display()
        ))),
    }
}

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            extension_of(entry.path())
                .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect::<Vec<_>>();

    files.sort_unstable();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_filtered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("a.PDF"), b"%PDF-1.4\n%fake")?;
        fs::write(nested.join("b.txt"), b"plain")?;
        fs::write(nested.join("c.docx"), b"skip")?;

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn plain_text_is_one_unnumbered_page() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("resume.txt");
        fs::write(&path, "Backend engineer.")?;

        let pages = extract_document(&path)?;
        assert_eq!(
            pages,
            vec![PageText {
                number: None,
                text: "Backend engineer.".to_string()
            }]
        );
        Ok(())
    }

    #[test]
    fn broken_pdf_and_unknown_types_fail() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let broken = dir.path().join("broken.pdf");
        fs::write(&broken, b"%PDF-1.4\n%broken")?;
        assert!(matches!(
            extract_document(&broken),
            Err(IngestError::Extraction(_))
        ));

        let docx = dir.path().join("cv.docx");
        fs::write(&docx, b"x")?;
        assert!(matches!(
            extract_document(&docx),
            Err(IngestError::InvalidArgument(_))
        ));
        Ok(())
    }
}
