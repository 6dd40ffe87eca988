//! Document assembly stage
//!
//! Renders the markdown manuscript into an interior PDF and wraps the cover
//! image in a full-page cover PDF. Layout is deliberately simple: A4 pages,
//! built-in Helvetica, an approximate character-width line wrap. A pure
//! transform with no pipeline state.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use printpdf::image::RawImage;
use printpdf::xobject::{XObject, XObjectTransform};
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Pt, TextItem, TextMatrix, XObjectId,
};
use tracing::info;

use crate::config::BookConfig;
use crate::error::{AssemblyError, StorageError};
use crate::state::RunPaths;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;

const BODY_SIZE: f32 = 11.0;
const SUBHEAD_SIZE: f32 = 13.0;
const CHAPTER_SIZE: f32 = 18.0;
const TITLE_SIZE: f32 = 20.0;
const AUTHOR_SIZE: f32 = 14.0;
const PAGE_DECORATION_SIZE: f32 = 8.0;

/// Average glyph width as a fraction of the font size, for the approximate
/// wrap. Helvetica body text averages close to half an em.
const GLYPH_WIDTH_RATIO: f32 = 0.5;

pub struct PdfAssembler;

impl PdfAssembler {
    /// Render the manuscript into `interior.pdf`. Returns the file location.
    pub fn build_interior(
        config: &BookConfig,
        content: &str,
        paths: &RunPaths,
    ) -> Result<PathBuf, AssemblyError> {
        let mut doc = PdfDocument::new(&config.title);
        let mut pages: Vec<Vec<Op>> = Vec::new();

        // Title page
        let mut title_page = PageWriter::new();
        title_page.advance(60.0 * MM_TO_PT);
        title_page.write_centered(&config.title, TITLE_SIZE, BuiltinFont::HelveticaBold);
        title_page.advance(15.0 * MM_TO_PT);
        title_page.write_centered(
            &format!("by {}", config.author),
            AUTHOR_SIZE,
            BuiltinFont::Helvetica,
        );
        pages.push(title_page.into_ops());

        let mut page = PageWriter::new();
        let mut started_body = false;
        let mut in_code_block = false;

        for line in content.lines() {
            let stripped = line.trim();

            if stripped.starts_with("```") {
                in_code_block = !in_code_block;
                continue;
            }
            if in_code_block {
                continue;
            }

            if stripped.starts_with("# ") {
                // top-level title already rendered on the title page
                continue;
            } else if let Some(heading) = stripped.strip_prefix("## ") {
                // chapter heading starts a fresh page
                if started_body {
                    pages.push(page.into_ops());
                    page = PageWriter::new();
                }
                started_body = true;
                page.advance(25.0 * MM_TO_PT);
                page.write_centered(heading, CHAPTER_SIZE, BuiltinFont::HelveticaBold);
                page.advance(12.0 * MM_TO_PT);
            } else if let Some(heading) = stripped.strip_prefix("### ") {
                page.ensure_room(SUBHEAD_SIZE * 2.5, &mut pages);
                page.advance(4.0);
                page.write_wrapped(heading, SUBHEAD_SIZE, BuiltinFont::HelveticaBold, &mut pages);
                page.advance(2.0);
            } else if let Some(item) = stripped
                .strip_prefix("- ")
                .or_else(|| stripped.strip_prefix("* "))
            {
                page.write_wrapped(
                    &format!("  - {item}"),
                    BODY_SIZE,
                    BuiltinFont::Helvetica,
                    &mut pages,
                );
            } else if stripped.is_empty() {
                page.advance(BODY_SIZE * 0.6);
            } else {
                page.write_wrapped(stripped, BODY_SIZE, BuiltinFont::Helvetica, &mut pages);
            }
        }
        pages.push(page.into_ops());

        let total = pages.len();
        for (idx, mut ops) in pages.into_iter().enumerate() {
            decorate_page(&mut ops, idx, &config.title);
            doc.pages
                .push(PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops));
        }

        let path = paths.interior_pdf();
        write_document(doc, &path)?;
        info!(path = %path.display(), pages = total, "interior PDF written");
        Ok(path)
    }

    /// Wrap the cover image in a single full-page PDF.
    pub fn build_cover(cover_png: &[u8], paths: &RunPaths) -> Result<PathBuf, AssemblyError> {
        let mut warnings = Vec::new();
        let raw_image = RawImage::decode_from_bytes(cover_png, &mut warnings).map_err(|e| {
            AssemblyError::CoverImage {
                reason: e.to_string(),
            }
        })?;
        let (img_w, img_h) = (raw_image.width as f32, raw_image.height as f32);

        let mut doc = PdfDocument::new("Cover");
        let xobj_id = XObjectId::new();
        doc.resources
            .xobjects
            .map
            .insert(xobj_id.clone(), XObject::Image(raw_image));

        let page_w_pt = Mm(PAGE_WIDTH_MM).into_pt().0;
        let page_h_pt = Mm(PAGE_HEIGHT_MM).into_pt().0;
        let transform = XObjectTransform {
            translate_x: Some(Pt(0.0)),
            translate_y: Some(Pt(0.0)),
            scale_x: Some(page_w_pt / img_w),
            scale_y: Some(page_h_pt / img_h),
            rotate: None,
            dpi: Some(72.0),
        };

        let ops = vec![Op::UseXobject {
            id: xobj_id,
            transform,
        }];
        doc.pages
            .push(PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops));

        let path = paths.cover_pdf();
        write_document(doc, &path)?;
        info!(path = %path.display(), "cover PDF written");
        Ok(path)
    }
}

const MM_TO_PT: f32 = 2.834_646;

fn write_document(doc: PdfDocument, path: &std::path::Path) -> Result<(), AssemblyError> {
    let file = File::create(path).map_err(|source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    let mut warnings = Vec::new();
    doc.save_writer(&mut writer, &PdfSaveOptions::default(), &mut warnings);
    Ok(())
}

/// Page header (book title) on every page after the title page, page number
/// footer everywhere.
fn decorate_page(ops: &mut Vec<Op>, page_index: usize, title: &str) {
    let page_h = PAGE_HEIGHT_MM * MM_TO_PT;
    let page_w = PAGE_WIDTH_MM * MM_TO_PT;

    if page_index > 0 {
        let header: String = title.chars().take(50).collect();
        ops.extend(centered_text_ops(
            &header,
            PAGE_DECORATION_SIZE,
            BuiltinFont::Helvetica,
            page_w,
            page_h - 10.0 * MM_TO_PT,
        ));
    }

    let footer = (page_index + 1).to_string();
    ops.extend(centered_text_ops(
        &footer,
        PAGE_DECORATION_SIZE,
        BuiltinFont::Helvetica,
        page_w,
        10.0 * MM_TO_PT,
    ));
}

fn centered_text_ops(text: &str, size: f32, font: BuiltinFont, page_w: f32, y: f32) -> Vec<Op> {
    let est_width = text.chars().count() as f32 * size * GLYPH_WIDTH_RATIO;
    let x = ((page_w - est_width) / 2.0).max(0.0);
    vec![
        Op::StartTextSection,
        Op::SetFontSizeBuiltinFont { size: Pt(size), font },
        Op::SetTextMatrix {
            matrix: TextMatrix::Translate(Pt(x), Pt(y)),
        },
        Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(text.to_string())],
            font,
        },
        Op::EndTextSection,
    ]
}

/// Accumulates ops for one page, tracking a top-down cursor and spilling to
/// a fresh page when the bottom margin is reached.
struct PageWriter {
    ops: Vec<Op>,
    /// Distance from the top of the page, in points.
    cursor: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            ops: Vec::new(),
            cursor: MARGIN_MM * MM_TO_PT,
        }
    }

    fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    fn page_height(&self) -> f32 {
        PAGE_HEIGHT_MM * MM_TO_PT
    }

    fn content_width(&self) -> f32 {
        (PAGE_WIDTH_MM - 2.0 * MARGIN_MM) * MM_TO_PT
    }

    fn advance(&mut self, points: f32) {
        self.cursor += points;
    }

    /// Spill to a new page when fewer than `needed` points remain above the
    /// bottom margin.
    fn ensure_room(&mut self, needed: f32, pages: &mut Vec<Vec<Op>>) {
        let bottom = self.page_height() - MARGIN_MM * MM_TO_PT;
        if self.cursor + needed > bottom {
            let finished = std::mem::replace(self, PageWriter::new());
            pages.push(finished.into_ops());
        }
    }

    fn emit_line(&mut self, text: &str, size: f32, font: BuiltinFont, x: f32) {
        let line_height = size * 1.4;
        self.cursor += line_height;
        let y = self.page_height() - self.cursor;
        self.ops.push(Op::StartTextSection);
        self.ops
            .push(Op::SetFontSizeBuiltinFont { size: Pt(size), font });
        self.ops.push(Op::SetTextMatrix {
            matrix: TextMatrix::Translate(Pt(x), Pt(y)),
        });
        self.ops.push(Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(text.to_string())],
            font,
        });
        self.ops.push(Op::EndTextSection);
    }

    fn write_centered(&mut self, text: &str, size: f32, font: BuiltinFont) {
        let est_width = text.chars().count() as f32 * size * GLYPH_WIDTH_RATIO;
        let margin = MARGIN_MM * MM_TO_PT;
        let x = margin + ((self.content_width() - est_width) / 2.0).max(0.0);
        self.emit_line(text, size, font, x);
    }

    /// Greedy word wrap against the approximate glyph width, spilling pages
    /// as needed.
    fn write_wrapped(
        &mut self,
        text: &str,
        size: f32,
        font: BuiltinFont,
        pages: &mut Vec<Vec<Op>>,
    ) {
        let max_chars = ((self.content_width() / (size * GLYPH_WIDTH_RATIO)) as usize).max(8);
        let margin = MARGIN_MM * MM_TO_PT;

        let mut line = String::new();
        for word in text.split_whitespace() {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > max_chars {
                self.ensure_room(size * 1.4, pages);
                self.emit_line(&line, size, font, margin);
                line.clear();
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        if !line.is_empty() {
            self.ensure_room(size * 1.4, pages);
            self.emit_line(&line, size, font, margin);
        }
    }
}

/// Produce the manifest's artifact map for the four assembly outputs.
pub fn artifact_map(paths: &RunPaths) -> BTreeMap<crate::manifest::ArtifactRole, PathBuf> {
    use crate::manifest::ArtifactRole;
    BTreeMap::from([
        (ArtifactRole::Manuscript, paths.manuscript()),
        (ArtifactRole::CoverImage, paths.cover_image()),
        (ArtifactRole::InteriorPdf, paths.interior_pdf()),
        (ArtifactRole::CoverPdf, paths.cover_pdf()),
    ])
}
