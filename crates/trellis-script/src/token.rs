//! Script tokenizer - a lazy, finite, restartable token stream.
//!
//! # Token kinds
//!
//! | Kind | Source form | Text |
//! |------|-------------|------|
//! | `Plain` | bare word | unescaped word |
//! | `Quoted` | `"..."` | content, backslash-unescaped |
//! | `Braced` | `{...}` | content, escapes *retained* |
//! | `Subcommand` | `[...]` | nested command text |
//! | `Comment` | `#` to end of line | text after `#` |
//! | `Eol` | `;`, newline, end of input | empty |
//!
//! Whitespace outside quotes/braces/brackets separates tokens; `;` and
//! newline both terminate a statement. One final `Eol` is emitted at end
//! of input, so every line - including a blank trailing one - carries its
//! terminator.
//!
//! # Escaping
//!
//! `\X` yields a literal `X` in every kind except `Comment`, with one
//! exception: inside `Braced` tokens the backslash only removes the
//! *syntactic* significance of the next character for brace counting, and
//! is retained in the token text - braced tokens are never unescaped.
//!
//! # Failure
//!
//! An unterminated quote, brace, or bracket at end of input fails with
//! [`SyntaxError`]; the iterator yields the error once and then ends.

use thiserror::Error;

use trellis_types::ErrorCode;

/// Malformed script text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// A `"` was never closed.
    #[error("unterminated quote")]
    UnterminatedQuote,
    /// A `{` was never closed.
    #[error("unterminated brace")]
    UnterminatedBrace,
    /// A `[` was never closed.
    #[error("unterminated bracket")]
    UnterminatedBracket,
    /// A trailing backslash escapes nothing.
    #[error("dangling escape at end of input")]
    DanglingEscape,
    /// A quoted/braced/bracketed token must be followed by a separator.
    #[error("unexpected {0:?} after closing delimiter")]
    UnexpectedAfterClose(char),
}

impl ErrorCode for SyntaxError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnterminatedQuote => "SCRIPT_UNTERMINATED_QUOTE",
            Self::UnterminatedBrace => "SCRIPT_UNTERMINATED_BRACE",
            Self::UnterminatedBracket => "SCRIPT_UNTERMINATED_BRACKET",
            Self::DanglingEscape => "SCRIPT_DANGLING_ESCAPE",
            Self::UnexpectedAfterClose(_) => "SCRIPT_UNEXPECTED_AFTER_CLOSE",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word.
    Plain,
    /// Double-quoted, backslash-escaped.
    Quoted,
    /// Brace-delimited, nestable.
    Braced,
    /// Bracket-delimited nested command.
    Subcommand,
    /// `#` to end of line.
    Comment,
    /// Statement terminator.
    Eol,
}

/// One token: kind plus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The kind.
    pub kind: TokenKind,
    /// The token text (delimiters stripped).
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Restartable token source over a borrowed script text.
///
/// # Example
///
/// ```
/// use trellis_script::{Tokenizer, TokenKind};
///
/// let tok = Tokenizer::new("set x 1; echo $x");
/// let kinds: Vec<TokenKind> = tok
///     .iter()
///     .map(|t| t.unwrap().kind)
///     .collect();
/// assert_eq!(kinds.len(), 7); // 3 words, EOL, 2 words, final EOL
///
/// // Restartable: a fresh iterator replays from the start.
/// assert_eq!(tok.iter().count(), 7);
/// ```
#[derive(Clone)]
pub struct Tokenizer<'a> {
    source: &'a str,
}

impl<'a> Tokenizer<'a> {
    /// Wraps a script text.
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    /// A fresh lazy iterator from the start of the text.
    #[must_use]
    pub fn iter(&self) -> Tokens<'a> {
        Tokens {
            rest: self.source.chars().peekable(),
            finished: false,
        }
    }

    /// Collects the whole stream, surfacing the first syntax error.
    pub fn tokenize(&self) -> Result<Vec<Token>, SyntaxError> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &Tokenizer<'a> {
    type Item = Result<Token, SyntaxError>;
    type IntoIter = Tokens<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over tokens; ends after the final `Eol` or the first
/// error.
pub struct Tokens<'a> {
    rest: std::iter::Peekable<std::str::Chars<'a>>,
    finished: bool,
}

impl Tokens<'_> {
    fn next_char(&mut self) -> Option<char> {
        self.rest.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.rest.peek().copied()
    }

    /// Statement separators end bare words and must follow a closing
    /// delimiter.
    fn at_separator(&mut self) -> bool {
        matches!(self.peek_char(), None | Some(' ' | '\t' | '\n' | ';'))
    }

    fn read_plain(&mut self, first: char) -> Result<Token, SyntaxError> {
        let mut text = String::new();
        let mut pending = Some(first);
        loop {
            let c = match pending.take() {
                Some(c) => c,
                None => match self.peek_char() {
                    None | Some(' ' | '\t' | '\n' | ';') => break,
                    Some(_) => self.next_char().expect("peeked"),
                },
            };
            if c == '\\' {
                match self.next_char() {
                    None => return Err(SyntaxError::DanglingEscape),
                    Some(escaped) => text.push(escaped),
                }
            } else {
                text.push(c);
            }
        }
        Ok(Token::new(TokenKind::Plain, text))
    }

    fn read_quoted(&mut self) -> Result<Token, SyntaxError> {
        let mut text = String::new();
        loop {
            match self.next_char() {
                None => return Err(SyntaxError::UnterminatedQuote),
                Some('"') => break,
                Some('\\') => match self.next_char() {
                    None => return Err(SyntaxError::UnterminatedQuote),
                    Some(escaped) => text.push(escaped),
                },
                Some(c) => text.push(c),
            }
        }
        self.expect_separator()?;
        Ok(Token::new(TokenKind::Quoted, text))
    }

    fn read_braced(&mut self) -> Result<Token, SyntaxError> {
        let mut text = String::new();
        let mut depth = 1usize;
        loop {
            match self.next_char() {
                None => return Err(SyntaxError::UnterminatedBrace),
                Some('\\') => {
                    // The backslash removes the next character's brace
                    // significance but stays in the text.
                    match self.next_char() {
                        None => return Err(SyntaxError::UnterminatedBrace),
                        Some(escaped) => {
                            text.push('\\');
                            text.push(escaped);
                        }
                    }
                }
                Some('{') => {
                    depth += 1;
                    text.push('{');
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    text.push('}');
                }
                Some(c) => text.push(c),
            }
        }
        self.expect_separator()?;
        Ok(Token::new(TokenKind::Braced, text))
    }

    fn read_subcommand(&mut self) -> Result<Token, SyntaxError> {
        let mut text = String::new();
        let mut depth = 1usize;
        loop {
            match self.next_char() {
                None => return Err(SyntaxError::UnterminatedBracket),
                Some('\\') => match self.next_char() {
                    None => return Err(SyntaxError::UnterminatedBracket),
                    Some(escaped) => text.push(escaped),
                },
                Some('[') => {
                    depth += 1;
                    text.push('[');
                }
                Some(']') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    text.push(']');
                }
                Some(c) => text.push(c),
            }
        }
        self.expect_separator()?;
        Ok(Token::new(TokenKind::Subcommand, text))
    }

    fn read_comment(&mut self) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.next_char();
        }
        Token::new(TokenKind::Comment, text)
    }

    fn expect_separator(&mut self) -> Result<(), SyntaxError> {
        if self.at_separator() {
            Ok(())
        } else {
            Err(SyntaxError::UnexpectedAfterClose(
                self.peek_char().expect("separator check saw a char"),
            ))
        }
    }
}

impl Iterator for Tokens<'_> {
    type Item = Result<Token, SyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        // Skip intra-line whitespace.
        while matches!(self.peek_char(), Some(' ' | '\t' | '\r')) {
            self.next_char();
        }
        let Some(c) = self.next_char() else {
            // End of input: the trailing line gets its terminator.
            self.finished = true;
            return Some(Ok(Token::new(TokenKind::Eol, "")));
        };
        let token = match c {
            '\n' | ';' => Ok(Token::new(TokenKind::Eol, "")),
            '#' => Ok(self.read_comment()),
            '"' => self.read_quoted(),
            '{' => self.read_braced(),
            '[' => self.read_subcommand(),
            other => self.read_plain(other),
        };
        if token.is_err() {
            self.finished = true;
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::check_error_codes;

    fn kinds_and_texts(source: &str) -> Vec<(TokenKind, String)> {
        Tokenizer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn error_codes() {
        check_error_codes(
            &[
                SyntaxError::UnterminatedQuote,
                SyntaxError::UnterminatedBrace,
                SyntaxError::UnterminatedBracket,
                SyntaxError::DanglingEscape,
                SyntaxError::UnexpectedAfterClose('x'),
            ],
            "SCRIPT_",
        );
    }

    #[test]
    fn reference_input_tokenizes_exactly() {
        use TokenKind::*;
        let source = "#comment\nthis \"is\"; [a] {{test\\}}} in\\; for you; now";
        let expected: Vec<(TokenKind, &str)> = vec![
            (Comment, "comment"),
            (Eol, ""),
            (Plain, "this"),
            (Quoted, "is"),
            (Eol, ""),
            (Subcommand, "a"),
            (Braced, "{test\\}}"),
            (Plain, "in;"),
            (Plain, "for"),
            (Plain, "you"),
            (Eol, ""),
            (Plain, "now"),
            (Eol, ""),
        ];
        let actual = kinds_and_texts(source);
        assert_eq!(actual.len(), 13);
        for (i, ((kind, text), (want_kind, want_text))) in
            actual.iter().zip(expected.iter()).enumerate()
        {
            assert_eq!((kind, text.as_str()), (want_kind, *want_text), "token {i}");
        }
    }

    #[test]
    fn unterminated_brace_fails() {
        let result = Tokenizer::new("#comment\n{unfinished").tokenize();
        assert_eq!(result.unwrap_err(), SyntaxError::UnterminatedBrace);
    }

    #[test]
    fn unterminated_quote_and_bracket_fail() {
        assert_eq!(
            Tokenizer::new("say \"hello").tokenize().unwrap_err(),
            SyntaxError::UnterminatedQuote
        );
        assert_eq!(
            Tokenizer::new("[open").tokenize().unwrap_err(),
            SyntaxError::UnterminatedBracket
        );
    }

    #[test]
    fn dangling_escape_fails() {
        assert_eq!(
            Tokenizer::new("word\\").tokenize().unwrap_err(),
            SyntaxError::DanglingEscape
        );
    }

    #[test]
    fn iterator_is_restartable() {
        let tok = Tokenizer::new("a b; c");
        let first: Vec<_> = tok.iter().map(Result::unwrap).collect();
        let second: Vec<_> = tok.iter().map(Result::unwrap).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6); // a, b, EOL, c, EOL(end)
    }

    #[test]
    fn iterator_ends_after_error() {
        let tok = Tokenizer::new("{open");
        let mut it = tok.iter();
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn eol_per_line_including_blank_trailing() {
        use TokenKind::*;
        let actual = kinds_and_texts("a\n\nb\n");
        let kinds: Vec<TokenKind> = actual.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![Plain, Eol, Eol, Plain, Eol, Eol]);
    }

    #[test]
    fn empty_input_is_one_blank_line() {
        let actual = kinds_and_texts("");
        assert_eq!(actual, vec![(TokenKind::Eol, String::new())]);
    }

    #[test]
    fn nested_brackets_and_braces_keep_inner_delimiters() {
        let actual = kinds_and_texts("[a [b] c] {x {y} z}");
        assert_eq!(actual[0], (TokenKind::Subcommand, "a [b] c".into()));
        assert_eq!(actual[1], (TokenKind::Braced, "x {y} z".into()));
    }

    #[test]
    fn quoted_escapes_are_unescaped() {
        let actual = kinds_and_texts(r#""a\"b\\c""#);
        assert_eq!(actual[0], (TokenKind::Quoted, r#"a"b\c"#.into()));
    }

    #[test]
    fn braced_escapes_are_retained() {
        let actual = kinds_and_texts(r"{a\}b\{c}");
        assert_eq!(actual[0], (TokenKind::Braced, r"a\}b\{c".into()));
    }

    #[test]
    fn plain_escapes_are_unescaped() {
        let actual = kinds_and_texts(r"a\ b");
        assert_eq!(actual[0], (TokenKind::Plain, "a b".into()));
    }

    #[test]
    fn hash_mid_word_is_not_a_comment() {
        let actual = kinds_and_texts("a#b");
        assert_eq!(actual[0], (TokenKind::Plain, "a#b".into()));
    }

    #[test]
    fn text_after_closing_delimiter_fails() {
        assert_eq!(
            Tokenizer::new("{a}b").tokenize().unwrap_err(),
            SyntaxError::UnexpectedAfterClose('b')
        );
        assert_eq!(
            Tokenizer::new("\"a\"b").tokenize().unwrap_err(),
            SyntaxError::UnexpectedAfterClose('b')
        );
    }

    #[test]
    fn semicolons_and_blank_statements() {
        use TokenKind::*;
        let kinds: Vec<TokenKind> = kinds_and_texts("a;;b")
            .iter()
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(kinds, vec![Plain, Eol, Eol, Plain, Eol]);
    }
}
