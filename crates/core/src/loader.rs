use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::{Document, IngestError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension().and_then(|ext| ext.to_str())?;
        if extension.eq_ignore_ascii_case("pdf") {
            Some(Self::Pdf)
        } else if extension.eq_ignore_ascii_case("txt") {
            Some(Self::Text)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

/// Regular files directly inside `folder`, sorted by path.
pub fn discover_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "not a directory: {}",
            folder.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn load_folder(folder: &Path) -> Result<LoadReport, IngestError> {
    let files = discover_files(folder)?;
    Ok(load_documents(&files))
}

/// Loads every supported file, logging and recording the ones that fail.
pub fn load_documents(paths: &[PathBuf]) -> LoadReport {
    load_documents_with(&LopdfExtractor, paths)
}

pub fn load_documents_with<P: PdfExtractor>(extractor: &P, paths: &[PathBuf]) -> LoadReport {
    let mut report = LoadReport::default();

    for path in paths {
        let name = display_name(path);
        let Some(kind) = FileKind::from_path(path) else {
            info!(file = %name, "skipping unsupported file");
            report.skipped.push(SkippedFile {
                path: path.clone(),
                reason: IngestError::Unsupported(name).to_string(),
            });
            continue;
        };

        let loaded = match kind {
            FileKind::Pdf => {
                info!(file = %name, "loading pdf");
                load_pdf(extractor, path)
            }
            FileKind::Text => {
                info!(file = %name, "loading txt");
                load_text(path)
            }
        };

        match loaded {
            Ok(documents) => report.documents.extend(documents),
            Err(error) => {
                warn!(file = %name, %error, "failed to load file");
                report.skipped.push(SkippedFile {
                    path: path.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    report
}

fn load_pdf<P: PdfExtractor>(extractor: &P, path: &Path) -> Result<Vec<Document>, IngestError> {
    let source_path = path.to_string_lossy().to_string();
    let pages = extractor.extract_pages(path)?;

    Ok(pages
        .into_iter()
        .map(|page| Document {
            text: page.text,
            source_path: source_path.clone(),
            page_number: Some(page.number.saturating_sub(1)),
        })
        .collect())
}

fn load_text(path: &Path) -> Result<Vec<Document>, IngestError> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8(bytes)
        .map_err(|error| IngestError::Encoding(format!("{}: {error}", path.display())))?;

    Ok(vec![Document {
        text,
        source_path: path.to_string_lossy().to_string(),
        page_number: None,
    }])
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
