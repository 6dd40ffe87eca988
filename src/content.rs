//! Content generation stage
//!
//! Turns the configured topic (and optional outline) into a structured
//! markdown manuscript using the text backend. Pure function of
//! (config, backend); all run state lives in the orchestrator. Backend
//! calls go through the bounded retry loop.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::backend::{with_retry, LlmBackend, RetryPolicy};
use crate::config::BookConfig;
use crate::error::BackendError;

/// Matches numbered outline entries like `1. Title` or `3) Title`.
static CHAPTER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,2})[.)]\s+(.+)$").expect("valid chapter regex"));

pub struct ContentGenerator {
    llm: Arc<dyn LlmBackend>,
    retry: RetryPolicy,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LlmBackend>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Generate the full manuscript: title heading plus one `##` chapter per
    /// outline entry.
    pub async fn generate_book(&self, config: &BookConfig) -> Result<String, BackendError> {
        let outline = if config.outline.trim().is_empty() {
            self.generate_outline(config).await?
        } else {
            config.outline.clone()
        };

        let chapters = parse_chapters(&outline);
        info!(chapters = chapters.len(), "generating manuscript");

        let mut sections = vec![format!("# {}\n", config.title)];
        for (idx, chapter_title) in chapters.iter().enumerate() {
            let number = idx + 1;
            info!(chapter = number, total = chapters.len(), title = %chapter_title, "generating chapter");
            let body = self.generate_chapter(config, chapter_title, number).await?;
            sections.push(body);
        }

        Ok(sections.join("\n\n"))
    }

    async fn generate_outline(&self, config: &BookConfig) -> Result<String, BackendError> {
        let system_prompt = format!(
            "You are a professional book outliner. Always respond in {}.",
            config.language
        );
        let prompt = format!(
            "Write a detailed outline for the following book.\n\
             Title: {}\n\
             Topic: {}\n\n\
             Produce 12 to 15 chapters, each with 2 or 3 sub-headings.\n\
             Format each chapter as a numbered line: '1. Chapter Title'.",
            config.title, config.topic
        );

        with_retry(&self.retry, "content.outline", || {
            self.llm.generate(&prompt, &system_prompt)
        })
        .await
    }

    async fn generate_chapter(
        &self,
        config: &BookConfig,
        chapter_title: &str,
        number: usize,
    ) -> Result<String, BackendError> {
        let system_prompt = format!(
            "You are a professional author writing a book in {}. \
             Write detailed, engaging, and informative chapters with clear structure.",
            config.language
        );
        let prompt = format!(
            "Book title: {}\n\
             Overall topic: {}\n\
             Current chapter: Chapter {} — {}\n\n\
             Write this chapter in 1500 to 2000 words. Structure it with at \
             least three '###' sub-headings and include concrete examples.",
            config.title, config.topic, number, chapter_title
        );

        let body = with_retry(&self.retry, "content.chapter", || {
            self.llm.generate(&prompt, &system_prompt)
        })
        .await?;

        Ok(format!("## Chapter {number}: {chapter_title}\n\n{body}"))
    }
}

/// Extract chapter titles from outline text. Falls back to a minimal
/// three-part skeleton when nothing matches, so a degenerate outline still
/// yields a book.
pub fn parse_chapters(outline: &str) -> Vec<String> {
    let chapters: Vec<String> = outline
        .lines()
        .filter_map(|line| {
            CHAPTER_LINE
                .captures(line)
                .map(|caps| caps[2].trim().to_string())
        })
        .filter(|title| !title.is_empty())
        .collect();

    if chapters.is_empty() {
        vec![
            "Introduction".to_string(),
            "Main Discussion".to_string(),
            "Conclusion".to_string(),
        ]
    } else {
        chapters
    }
}
