//! Lexical analysis of a command line: quote checking, splitting on pipes and word splitting.

use crate::error::SyntaxError;
use regex::Regex;
use std::sync::LazyLock;

/// Token shapes in priority order; only the last one, an unquoted `|`, is captured.
///
/// A quoted run that is never closed runs to the end of the line, so a `|` after an
/// unterminated quote never splits.
static PIPE_SPLITTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
          \\"                         # escaped double quote
        | \\'                         # escaped single quote
        | "(?:\\.|[^"\\])*(?:"|$)     # double-quoted run
        | '[^']*(?:'|$)               # single-quoted run
        | (\|)                        # unquoted pipe
        "#,
    )
    .expect("constant pattern")
});

/// Splits `line` on unquoted `|` characters.
///
/// The returned pieces are not trimmed and may be empty; a line without any unquoted
/// pipe comes back unchanged as the only element.
pub fn split_by_pipe(line: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for caps in PIPE_SPLITTER.captures_iter(line) {
        if let Some(pipe) = caps.get(1) {
            pieces.push(&line[start..pipe.start()]);
            start = pipe.end();
        }
    }
    pieces.push(&line[start..]);
    pieces
}

/// Rejects a line in which a single or double quote is left open.
///
/// A quote character only toggles its own state when not inside the other kind of quote,
/// and a backslash outside single quotes protects the next character.
pub fn check_quotes(line: &str) -> Result<(), SyntaxError> {
    LexingFSM::new(line, true).make_words().map(|_| ())
}

/// POSIX word splitting with quote removal.
///
/// Runs of unquoted blanks separate words, single quotes suppress every interpretation,
/// double quotes suppress splitting but honour `\$`, `` \` ``, `\"`, `\\` and
/// backslash-newline, and an unquoted backslash escapes the next character.
pub fn lex(segment: &str) -> Result<Vec<String>, SyntaxError> {
    LexingFSM::new(segment, false).make_words()
}

/// Word splitting that keeps quotes and backslashes in the words, so that the
/// expansion pass still sees the quoting context of every character.
pub(crate) fn split_words(segment: &str) -> Result<Vec<String>, SyntaxError> {
    LexingFSM::new(segment, true).make_words()
}

/// Characters a backslash can escape inside double quotes.
pub(crate) fn escapable_in_double_quotes(c: char) -> bool {
    matches!(c, '$' | '`' | '"' | '\\' | '\n')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    keep_quotes: bool,
    buffer: String,
}

impl LexingFSM {
    fn new(line: &str, keep_quotes: bool) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Start,
            keep_quotes,
            buffer: String::new(),
        }
    }

    fn make_words(mut self) -> Result<Vec<String>, SyntaxError> {
        let mut out = Vec::new();

        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch),
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote => {
                Err(SyntaxError::UnterminatedQuote)
            }
            LexingState::ReadingWord => {
                out.push(self.buffer);
                Ok(out)
            }
            LexingState::Start => Ok(out),
        }
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn push_quote(&mut self, quote: char) {
        if self.keep_quotes {
            self.buffer.push(quote);
        }
    }

    fn handle_start(&mut self, ch: char) {
        if !is_blank(ch) {
            self.state = LexingState::ReadingWord;
            self.handle_unquoted(ch);
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<String>) {
        if is_blank(ch) {
            out.push(std::mem::take(&mut self.buffer));
            self.state = LexingState::Start;
        } else {
            self.handle_unquoted(ch);
        }
    }

    fn handle_unquoted(&mut self, ch: char) {
        match ch {
            '\'' => {
                self.push_quote(ch);
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.push_quote(ch);
                self.state = LexingState::ReadingDoubleQuote;
            }
            '\\' => match self.read_char() {
                Some(next) => {
                    self.push_quote('\\');
                    self.buffer.push(next);
                }
                // a trailing backslash stands for itself
                None => self.buffer.push('\\'),
            },
            c => self.buffer.push(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => {
                self.push_quote(ch);
                self.state = LexingState::ReadingWord;
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => {
                self.push_quote(ch);
                self.state = LexingState::ReadingWord;
            }
            '\\' => match self.input.get(self.pos).copied() {
                Some(next) if escapable_in_double_quotes(next) => {
                    self.read_char();
                    self.push_quote('\\');
                    self.buffer.push(next);
                }
                _ => self.buffer.push('\\'),
            },
            c => self.buffer.push(c),
        }
    }
}

fn is_blank(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n')
}
