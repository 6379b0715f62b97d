//! Question catalog loading and the question data model
//!
//! Questions are read once at startup from a `|`-delimited text file and are
//! immutable afterwards. One question per line:
//!
//! ```text
//! text|choice1|choice2|choice3|choice4|correct|mode[|target]
//! ```
//!
//! `correct` is the winning slot (1-4). `mode` selects the scoring rule:
//! `-` for default scoring, `fewest`, `fastest` or `latest` for the special
//! rules (the legacy numeric flags `1`/`2`/`3` are accepted as aliases).
//! The optional `target` column overrides the slot that `fastest`/`latest`
//! questions race on.

use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Scoring rule applied when a question closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialMode {
    /// Match against the question's correct choice.
    None,
    /// The choice picked by the fewest players wins.
    FewestChosen,
    /// The first player to commit to the target choice wins.
    TargetFastest,
    /// The last player to commit to the target choice wins.
    TargetLatest,
}

/// A single multiple-choice question, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Question {
    /// Position in the catalog, 0-based.
    pub index: usize,
    pub text: String,
    pub choices: [String; 4],
    /// Winning slot for default scoring, 1-4.
    pub correct_choice: u8,
    pub special_mode: SpecialMode,
    /// Slot that `TargetFastest`/`TargetLatest` race on. `None` falls back
    /// to the historical deck convention (3 for fastest, 1 for latest).
    pub target_choice: Option<u8>,
}

impl Question {
    /// Resolved target slot for the time-racing modes.
    pub fn target(&self) -> u8 {
        match self.target_choice {
            Some(t) => t,
            None => match self.special_mode {
                SpecialMode::TargetLatest => 1,
                _ => 3,
            },
        }
    }
}

/// Errors raised while loading a question file. All of these are fatal at
/// startup; the engine never runs with a broken or empty catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read question file: {0}")]
    Io(#[from] std::io::Error),
    #[error("question file contains no usable questions")]
    Empty,
    #[error("line {line}: unknown scoring mode '{token}'")]
    UnknownMode { line: usize, token: String },
    #[error("line {line}: {reason}")]
    BadField { line: usize, reason: String },
}

/// Ordered, read-only sequence of questions.
#[derive(Debug, Clone)]
pub struct QuestionCatalog {
    questions: Vec<Question>,
}

impl QuestionCatalog {
    /// Loads a catalog from a delimited question file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file))
    }

    /// Parses catalog lines from any buffered reader.
    ///
    /// Blank lines and `#` comments are skipped. A malformed line is logged
    /// and skipped so a stray row does not take the whole deck down, but an
    /// unknown scoring mode is a hard error: defaulting a bad mode would
    /// silently change how a round scores.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, CatalogError> {
        let mut questions = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = line_no + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match Self::parse_line(trimmed, line_no, questions.len()) {
                Ok(question) => questions.push(question),
                Err(err @ CatalogError::UnknownMode { .. }) => return Err(err),
                Err(err) => {
                    warn!("skipping malformed question: {}", err);
                }
            }
        }

        if questions.is_empty() {
            return Err(CatalogError::Empty);
        }

        Ok(Self { questions })
    }

    fn parse_line(line: &str, line_no: usize, index: usize) -> Result<Question, CatalogError> {
        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 7 {
            return Err(CatalogError::BadField {
                line: line_no,
                reason: format!("expected at least 7 fields, got {}", parts.len()),
            });
        }

        let correct_choice = parse_choice(parts[5]).ok_or_else(|| CatalogError::BadField {
            line: line_no,
            reason: format!("correct choice '{}' is not 1-4", parts[5]),
        })?;

        let special_mode = match parts[6] {
            "" | "-" => SpecialMode::None,
            "fewest" | "1" => SpecialMode::FewestChosen,
            "fastest" | "2" => SpecialMode::TargetFastest,
            "latest" | "3" => SpecialMode::TargetLatest,
            token => {
                return Err(CatalogError::UnknownMode {
                    line: line_no,
                    token: token.to_string(),
                })
            }
        };

        let target_choice = match parts.get(7) {
            Some(raw) if !raw.is_empty() => Some(parse_choice(raw).ok_or_else(|| {
                CatalogError::BadField {
                    line: line_no,
                    reason: format!("target choice '{}' is not 1-4", raw),
                }
            })?),
            _ => None,
        };

        Ok(Question {
            index,
            text: parts[0].to_string(),
            choices: [
                parts[1].to_string(),
                parts[2].to_string(),
                parts[3].to_string(),
                parts[4].to_string(),
            ],
            correct_choice,
            special_mode,
            target_choice,
        })
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Parses a 1-4 choice slot.
pub fn parse_choice(raw: &str) -> Option<u8> {
    match raw.parse::<u8>() {
        Ok(n) if (1..=4).contains(&n) => Some(n),
        _ => None,
    }
}
