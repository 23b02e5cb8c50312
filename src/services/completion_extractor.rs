//! Recovery of runnable Python from free-text model completions
//!
//! Models answer with any mix of prose, fenced blocks and bare code. The
//! extractor tries an ordered chain of strategies, each a pure function that
//! either yields code that parses or gives up, and stops at the first hit.
//! If every strategy gives up, the whole completion is wrapped in a docstring
//! so the result still parses, and it is flagged as not executable.

use regex::Regex;
use std::fmt;
use thiserror::Error;

use super::python_syntax::{GrammarError, PythonSyntax};
use crate::domain::models::ExtractionConfig;

const FENCED_BLOCK_PATTERN: &str = r"(?s)```(?:\w+)?\s*(.*?)\s*```";
const FENCE_MARKER_PATTERN: &str = r"```\w*";

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("Invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Which step of the chain produced the code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionStrategy {
    /// The completion parsed as-is
    Verbatim,
    /// Valid fenced blocks, joined
    FencedBlocks,
    /// Blank-line chunks, with prose turned into comments
    Chunks,
    /// Everything after the first line
    DropLeadingLine,
    /// Everything after the first line, minus a cut-off last line
    TrimTrailingLine,
    /// The section following the configured code marker
    CodeMarker,
    /// Nothing recovered; the text is wrapped as a docstring
    Docstring,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verbatim => "verbatim",
            Self::FencedBlocks => "fenced_blocks",
            Self::Chunks => "chunks",
            Self::DropLeadingLine => "drop_leading_line",
            Self::TrimTrailingLine => "trim_trailing_line",
            Self::CodeMarker => "code_marker",
            Self::Docstring => "docstring",
        };
        f.write_str(name)
    }
}

/// Result of running the extraction chain on one completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Code that parses
    pub code: String,
    /// Natural-language part of the completion
    pub text_response: String,
    pub strategy: ExtractionStrategy,
    /// Whether `code` holds at least one statement besides comments and
    /// bare string literals
    pub executable: bool,
}

impl Extraction {
    /// False when the chain fell through to the docstring wrapper
    pub fn recovered(&self) -> bool {
        self.strategy != ExtractionStrategy::Docstring
    }
}

type Strategy = fn(&CompletionExtractor, &str) -> Option<String>;

/// Turns raw completion text into parseable Python
#[derive(Clone)]
pub struct CompletionExtractor {
    syntax: PythonSyntax,
    fenced_block: Regex,
    fence_marker: Regex,
    code_marker: String,
}

impl CompletionExtractor {
    const CHAIN: [(ExtractionStrategy, Strategy); 6] = [
        (ExtractionStrategy::Verbatim, Self::verbatim),
        (ExtractionStrategy::FencedBlocks, Self::fenced_blocks),
        (ExtractionStrategy::Chunks, Self::chunks),
        (ExtractionStrategy::DropLeadingLine, Self::drop_leading_line),
        (ExtractionStrategy::TrimTrailingLine, Self::trim_trailing_line),
        (ExtractionStrategy::CodeMarker, Self::after_code_marker),
    ];

    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractorError> {
        Ok(Self {
            syntax: PythonSyntax::new()?,
            fenced_block: Regex::new(FENCED_BLOCK_PATTERN)?,
            fence_marker: Regex::new(FENCE_MARKER_PATTERN)?,
            code_marker: config.code_marker.clone(),
        })
    }

    pub const fn syntax(&self) -> &PythonSyntax {
        &self.syntax
    }

    /// Run the chain. Never fails; the returned code always parses.
    pub fn extract(&self, text: &str) -> Extraction {
        for (strategy, attempt) in Self::CHAIN {
            if let Some(code) = attempt(self, text) {
                return Extraction {
                    executable: self.syntax.has_executable_statement(&code),
                    text_response: self.text_response(text, strategy),
                    code,
                    strategy,
                };
            }
        }

        Extraction {
            code: self.inert_wrapper(text),
            text_response: text.trim().to_string(),
            strategy: ExtractionStrategy::Docstring,
            executable: false,
        }
    }

    fn text_response(&self, text: &str, strategy: ExtractionStrategy) -> String {
        match strategy {
            ExtractionStrategy::CodeMarker => text
                .split_once(self.code_marker.as_str())
                .map_or(text, |(prose, _)| prose)
                .trim()
                .to_string(),
            _ => text.to_string(),
        }
    }

    fn accept(&self, code: &str) -> Option<String> {
        (!code.trim().is_empty() && self.syntax.is_valid(code)).then(|| code.to_string())
    }

    fn verbatim(&self, text: &str) -> Option<String> {
        self.syntax.is_valid(text).then(|| text.to_string())
    }

    fn fenced_blocks(&self, text: &str) -> Option<String> {
        let blocks: Vec<&str> = self
            .fenced_block
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|code| !code.is_empty() && self.syntax.is_valid(code))
            .collect();
        if blocks.is_empty() {
            return None;
        }
        self.accept(&blocks.join("\n\n"))
    }

    fn chunks(&self, text: &str) -> Option<String> {
        let stripped = self.fence_marker.replace_all(text, "");
        let chunks: Vec<String> = stripped
            .split("\n\n")
            .filter_map(trim_blank_lines)
            .map(|chunk| {
                if self.syntax.is_valid(&chunk) {
                    chunk
                } else {
                    comment_out(&chunk)
                }
            })
            .collect();
        if chunks.is_empty() {
            return None;
        }
        let joined = chunks.join("\n\n");
        self.syntax.is_valid(&joined).then_some(joined)
    }

    fn drop_leading_line(&self, text: &str) -> Option<String> {
        let (_, rest) = text.split_once('\n')?;
        self.accept(rest)
    }

    fn trim_trailing_line(&self, text: &str) -> Option<String> {
        let (_, rest) = text.split_once('\n')?;
        let (body, _) = rest.trim_end().rsplit_once('\n')?;
        self.accept(body)
    }

    fn after_code_marker(&self, text: &str) -> Option<String> {
        if self.code_marker.is_empty() {
            return None;
        }
        let (_, code) = text.split_once(self.code_marker.as_str())?;
        self.accept(code.trim())
    }

    /// Wrap `text` so it parses and does nothing
    fn inert_wrapper(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return String::new();
        }

        let wrapped = docstring(text);
        if self.syntax.is_valid(&wrapped) {
            return wrapped;
        }
        let commented = text
            .lines()
            .map(|line| format!("# {}", line.replace('\r', " ")))
            .collect::<Vec<_>>()
            .join("\n");
        if self.syntax.is_valid(&commented) {
            return commented;
        }
        String::new()
    }
}

/// Drop blank lines at both ends, keeping inner indentation
fn trim_blank_lines(chunk: &str) -> Option<String> {
    let lines: Vec<&str> = chunk.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty())?;
    let end = lines.iter().rposition(|l| !l.trim().is_empty())?;
    Some(lines[start..=end].join("\n"))
}

/// A one-line comment for one line of prose, a docstring for several
fn comment_out(chunk: &str) -> String {
    if chunk.lines().count() == 1 {
        format!("# {}", chunk.trim().replace('\r', " "))
    } else {
        docstring(chunk)
    }
}

fn docstring(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    format!("\"\"\"\n{escaped}\n\"\"\"")
}
