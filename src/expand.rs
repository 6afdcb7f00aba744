//! Parameter and tilde expansion of a single word, followed by quote removal.

use crate::env::{Environment, is_valid_name};
use crate::error::SyntaxError;
use crate::lexer::escapable_in_double_quotes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quoting {
    Unquoted,
    Single,
    Double,
}

/// Expands one word as produced by the word splitter (quotes still in place).
///
/// Walking left to right with the same escape and quote rules as the lexer:
/// - `${NAME}` outside single quotes becomes the value of `NAME`, or nothing when unset.
///   Without a closing `}` the `${` is kept literally. A `NAME` outside
///   `[A-Za-z_][A-Za-z0-9_]*` fails the whole word.
/// - the first unquoted, unescaped `~` becomes the home directory.
/// - quotes and escaping backslashes are removed.
pub fn expand(word: &str, env: &Environment) -> Result<String, SyntaxError> {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len());
    let mut quoting = Quoting::Unquoted;
    let mut tilde_done = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match (quoting, c) {
            (Quoting::Single, '\'') => quoting = Quoting::Unquoted,
            (Quoting::Single, c) => out.push(c),

            (Quoting::Unquoted, '\'') => quoting = Quoting::Single,
            (Quoting::Unquoted, '"') => quoting = Quoting::Double,
            (Quoting::Double, '"') => quoting = Quoting::Unquoted,

            (Quoting::Unquoted, '\\') => {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                } else {
                    out.push('\\');
                }
            }
            (Quoting::Double, '\\') => match chars.get(i + 1) {
                Some(&next) if escapable_in_double_quotes(next) => {
                    out.push(next);
                    i += 1;
                }
                _ => out.push('\\'),
            },

            (_, '$') if chars.get(i + 1) == Some(&'{') => {
                match chars[i + 2..].iter().position(|&c| c == '}') {
                    Some(len) => {
                        let name: String = chars[i + 2..i + 2 + len].iter().collect();
                        if !is_valid_name(&name) {
                            return Err(SyntaxError::InvalidVariable(name));
                        }
                        out.push_str(env.get_var(&name).unwrap_or_default());
                        i += 2 + len;
                    }
                    None => out.push('$'),
                }
            }

            (Quoting::Unquoted, '~') if !tilde_done => {
                tilde_done = true;
                out.push_str(&env.home());
            }

            (_, c) => out.push(c),
        }
        i += 1;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env() -> Environment {
        let mut env = Environment::new();
        env.set_var("HOME", "/home/alice").unwrap();
        env.set_var("NAME", "world").unwrap();
        env.set_var("EMPTY", "").unwrap();
        env
    }

    fn ok(word: &str) -> String {
        expand(word, &env()).unwrap()
    }

    #[test]
    fn plain_words_pass_through() {
        assert_eq!(ok("hello"), "hello");
        assert_eq!(ok(""), "");
        assert_eq!(ok("$NAME"), "$NAME");
    }

    #[test]
    fn braces_are_replaced_by_values() {
        assert_eq!(ok("${NAME}"), "world");
        assert_eq!(ok("hello-${NAME}-${NAME}!"), "hello-world-world!");
        assert_eq!(ok("[${EMPTY}]"), "[]");
        assert_eq!(ok("[${UNSET_VARIABLE_XYZ}]"), "[]");
    }

    #[test]
    fn unclosed_brace_is_literal() {
        assert_eq!(ok("${NAME"), "${NAME");
        assert_eq!(ok("a${"), "a${");
    }

    #[test]
    fn invalid_names_fail() {
        for (word, name) in [
            ("${1abc}", "1abc"),
            ("${a-b}", "a-b"),
            ("${}", ""),
            ("x${NAME}${bad name}", "bad name"),
            ("\"${a.b}\"", "a.b"),
        ] {
            assert_eq!(
                expand(word, &env()),
                Err(SyntaxError::InvalidVariable(name.to_string())),
                "{word}"
            );
        }
    }

    #[test]
    fn quoting_controls_expansion() {
        assert_eq!(ok("'${NAME}'"), "${NAME}");
        assert_eq!(ok("\"${NAME}\""), "world");
        assert_eq!(ok("\"a ${NAME} b\""), "a world b");
        assert_eq!(ok(r"\${NAME}"), "${NAME}");
        assert_eq!(ok(r#""\${NAME}""#), "${NAME}");
        assert_eq!(ok("'${bad-name}'"), "${bad-name}");
    }

    #[test]
    fn quotes_and_escapes_are_removed() {
        assert_eq!(ok(r#""a b"'c'd"#), "a bcd");
        assert_eq!(ok(r"a\ b"), "a b");
        assert_eq!(ok(r#""keep \a""#), r"keep \a");
        assert_eq!(ok(r#"'\n'"#), r"\n");
    }

    #[test]
    fn first_unquoted_tilde_becomes_home() {
        assert_eq!(ok("~"), "/home/alice");
        assert_eq!(ok("~/bin"), "/home/alice/bin");
        assert_eq!(ok("~/a~b"), "/home/alice/a~b");
        assert_eq!(ok(r"\~"), "~");
        assert_eq!(ok("'~'"), "~");
        assert_eq!(ok("\"~\""), "~");
    }

    #[test]
    fn expanded_values_are_not_rescanned() {
        let mut env = env();
        env.set_var("TRICKY", "~ ${NAME} 'q'").unwrap();
        assert_eq!(expand("${TRICKY}", &env).unwrap(), "~ ${NAME} 'q'");
    }
}
