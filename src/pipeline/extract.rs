//! Page extraction: parsed text per page, and one rendered image per page.
//!
//! The pipeline depends on the [`PageExtractor`] trait; [`PdfiumExtractor`]
//! is the production implementation. Rendering decides the authoritative
//! page count and order. The text map is looked up by page number and may
//! lack entries.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state. All calls run on
//! tokio's blocking pool so CPU-heavy rendering never stalls the async
//! workers serving other jobs.

use crate::config::RenderConfig;
use crate::error::ExtractError;
use async_trait::async_trait;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Parsed text of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageText {
    /// Text read from the document structure; may be empty.
    Parsed(String),
    /// The page exists but its text layer could not be read.
    Unreadable { reason: String },
}

impl PageText {
    /// Text to ground the model calls with. Unreadable pages count as empty.
    pub fn as_str(&self) -> &str {
        match self {
            PageText::Parsed(s) => s,
            PageText::Unreadable { .. } => "",
        }
    }
}

/// A rendered page image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number.
    pub page: usize,
    pub path: PathBuf,
}

/// One positioned run of text on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    /// Vertical coordinate of the fragment's top edge, in points.
    pub top: f32,
    pub text: String,
}

/// Source of per-page text and images.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Text of every page, keyed by 1-based page number.
    async fn extract_text(&self, pdf: &Path) -> Result<BTreeMap<usize, PageText>, ExtractError>;

    /// Render every page into `out_dir`, in page order.
    async fn extract_images(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PageImage>, ExtractError>;
}

/// File name of a rendered page: `{stem}_page_{N}.png`.
pub fn image_file_name(stem: &str, page: usize) -> String {
    format!("{stem}_page_{page}.png")
}

const SAME_LINE_TOLERANCE: f32 = 0.01;

/// Join fragments in reading order.
///
/// Fragments sharing a vertical coordinate are concatenated as-is; a change
/// of vertical coordinate starts a new line.
pub fn join_fragments(fragments: &[TextFragment]) -> String {
    let mut out = String::new();
    let mut last_top: Option<f32> = None;
    for fragment in fragments {
        if let Some(top) = last_top {
            if (fragment.top - top).abs() > SAME_LINE_TOLERANCE {
                out.push('\n');
            }
        }
        out.push_str(&fragment.text);
        last_top = Some(fragment.top);
    }
    out
}

/// Fail unless the file starts with the `%PDF` magic bytes.
pub async fn check_pdf_magic(path: &Path) -> Result<(), ExtractError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut magic = Vec::with_capacity(4);
    (&mut file).take(4).read_to_end(&mut magic).await?;
    if magic == b"%PDF" {
        Ok(())
    } else {
        Err(ExtractError::NotAPdf { magic })
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Extractor backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumExtractor {
    lib_dir: Option<PathBuf>,
    max_rendered_pixels: u32,
}

impl PdfiumExtractor {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            lib_dir: config.pdfium_lib_dir.clone(),
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }
}

fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, ExtractError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))
}

fn open_document<'a>(pdfium: &'a Pdfium, pdf: &Path) -> Result<PdfDocument<'a>, ExtractError> {
    pdfium
        .load_pdf_from_file(pdf, None)
        .map_err(|e| ExtractError::CorruptPdf(format!("{e:?}")))
}

fn page_fragments(page: &PdfPage) -> Result<Vec<TextFragment>, PdfiumError> {
    let text = page.text()?;
    let fragments = text
        .segments()
        .iter()
        .map(|segment| TextFragment {
            top: segment.bounds().top().value,
            text: segment.text(),
        })
        .collect();
    Ok(fragments)
}

fn extract_text_blocking(
    lib_dir: Option<&Path>,
    pdf: &Path,
) -> Result<BTreeMap<usize, PageText>, ExtractError> {
    let pdfium = bind_pdfium(lib_dir)?;
    let document = open_document(&pdfium, pdf)?;

    let mut texts = BTreeMap::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let page_num = idx + 1;
        let text = match page_fragments(&page) {
            Ok(fragments) => PageText::Parsed(join_fragments(&fragments)),
            Err(e) => PageText::Unreadable {
                reason: format!("{e:?}"),
            },
        };
        texts.insert(page_num, text);
    }
    Ok(texts)
}

fn extract_images_blocking(
    lib_dir: Option<&Path>,
    max_pixels: u32,
    pdf: &Path,
    out_dir: &Path,
) -> Result<Vec<PageImage>, ExtractError> {
    let pdfium = bind_pdfium(lib_dir)?;
    let document = open_document(&pdfium, pdf)?;
    let stem = file_stem(pdf);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let page_num = idx + 1;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ExtractError::RasterisationFailed {
                page: page_num,
                detail: format!("{e:?}"),
            })?;
        let image = bitmap.as_image();
        let path = out_dir.join(image_file_name(&stem, page_num));
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| ExtractError::ImageWrite {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );
        images.push(PageImage {
            page: page_num,
            path,
        });
    }
    Ok(images)
}

#[async_trait]
impl PageExtractor for PdfiumExtractor {
    async fn extract_text(&self, pdf: &Path) -> Result<BTreeMap<usize, PageText>, ExtractError> {
        let lib_dir = self.lib_dir.clone();
        let pdf = pdf.to_path_buf();
        let texts = tokio::task::spawn_blocking(move || extract_text_blocking(lib_dir.as_deref(), &pdf))
            .await
            .map_err(|e| ExtractError::TaskPanicked(e.to_string()))??;

        for (page, text) in &texts {
            if let PageText::Unreadable { reason } = text {
                warn!(page = *page, "Text layer unreadable, continuing with empty text: {}", reason);
            }
        }
        info!("Extracted text for {} pages", texts.len());
        Ok(texts)
    }

    async fn extract_images(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PageImage>, ExtractError> {
        let lib_dir = self.lib_dir.clone();
        let max_pixels = self.max_rendered_pixels;
        let pdf = pdf.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        let images = tokio::task::spawn_blocking(move || {
            extract_images_blocking(lib_dir.as_deref(), max_pixels, &pdf, &out_dir)
        })
        .await
        .map_err(|e| ExtractError::TaskPanicked(e.to_string()))??;

        info!("Rendered {} pages", images.len());
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(top: f32, text: &str) -> TextFragment {
        TextFragment {
            top,
            text: text.to_string(),
        }
    }

    #[test]
    fn same_line_fragments_concatenate() {
        let joined = join_fragments(&[frag(700.0, "Hello"), frag(700.0, " world")]);
        assert_eq!(joined, "Hello world");
    }

    #[test]
    fn vertical_change_breaks_line() {
        let joined = join_fragments(&[
            frag(700.0, "Title"),
            frag(680.0, "First"),
            frag(680.0, " line"),
            frag(660.0, "Second"),
        ]);
        assert_eq!(joined, "Title\nFirst line\nSecond");
    }

    #[test]
    fn no_fragments_is_empty_text() {
        assert_eq!(join_fragments(&[]), "");
    }

    #[test]
    fn unreadable_page_reads_as_empty() {
        let t = PageText::Unreadable {
            reason: "bad stream".into(),
        };
        assert_eq!(t.as_str(), "");
        assert_eq!(PageText::Parsed("x".into()).as_str(), "x");
    }

    #[test]
    fn image_names_are_deterministic() {
        assert_eq!(image_file_name("report", 7), "report_page_7.png");
    }

    #[tokio::test]
    async fn magic_check_accepts_pdf_and_rejects_others() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = tmp.path().join("a.pdf");
        tokio::fs::write(&pdf, b"%PDF-1.7\n...").await.unwrap();
        assert!(check_pdf_magic(&pdf).await.is_ok());

        let html = tmp.path().join("b.pdf");
        tokio::fs::write(&html, b"<html>").await.unwrap();
        match check_pdf_magic(&html).await {
            Err(ExtractError::NotAPdf { magic }) => assert_eq!(magic, b"<htm"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }

        let short = tmp.path().join("c.pdf");
        tokio::fs::write(&short, b"%P").await.unwrap();
        assert!(matches!(
            check_pdf_magic(&short).await,
            Err(ExtractError::NotAPdf { .. })
        ));
    }
}
