use crate::env::Environment;
use crate::error::SyntaxError;
use crate::expand::expand;
use crate::lexer::{check_quotes, split_by_pipe, split_words};

/// One command of a pipeline, between pipe separators.
///
/// `words` are fully expanded; the first one is the command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub raw: String,
    pub words: Vec<String>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.words[0]
    }

    pub fn args(&self) -> &[String] {
        &self.words[1..]
    }
}

/// A validated, expanded command line. Stage `i` writes into stage `i + 1`.
///
/// Never empty, and no stage has an empty word vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Builds a pipeline out of already expanded word vectors.
    pub fn from_words(stages: Vec<Vec<String>>) -> Result<Self, SyntaxError> {
        if stages.is_empty() || stages.iter().any(Vec::is_empty) {
            return Err(SyntaxError::EmptyStage);
        }
        Ok(Self {
            stages: stages
                .into_iter()
                .map(|words| Stage {
                    raw: words.join(" "),
                    words,
                })
                .collect(),
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_piped(&self) -> bool {
        self.stages.len() > 1
    }
}

/// Turns a raw line into a [`Pipeline`].
///
/// The whole line is checked before anything can run: quote balance first, then every
/// segment between unquoted pipes must contain a command, then every word of every
/// stage must expand. Any failure rejects the line as a whole.
pub fn parse_line(line: &str, env: &Environment) -> Result<Pipeline, SyntaxError> {
    check_quotes(line)?;

    let mut stages = Vec::new();
    for segment in split_by_pipe(line) {
        if segment.trim().is_empty() {
            return Err(SyntaxError::EmptyStage);
        }
        let words = split_words(segment)?
            .iter()
            .map(|word| expand(word, env))
            .collect::<Result<Vec<String>, SyntaxError>>()?;
        if words.is_empty() {
            return Err(SyntaxError::EmptyStage);
        }
        stages.push(Stage {
            raw: segment.trim().to_string(),
            words,
        });
    }

    Ok(Pipeline { stages })
}
