use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

/// Characters that always form a token of their own.
pub const PUNCTUATION: [char; 11] = ['{', '}', '(', ')', ',', ';', ':', '<', '>', '=', '.'];

/// Where a token starts: file, 1-based line and 1-based column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub position: SourcePosition,
    /// Came from a double-quoted string; never matches grammar words.
    pub literal: bool,
}

impl Token {
    pub fn is_punct(&self, c: char) -> bool {
        !self.literal && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }
}

impl PartialEq<str> for Token {
    fn eq(&self, other: &str) -> bool {
        !self.literal && self.text == other
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        !self.literal && self.text == *other
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.literal {
            write!(f, "\"{}\"", self.text)
        } else {
            f.write_str(&self.text)
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("{0}: unterminated string literal")]
    UnterminatedString(SourcePosition),
}

/// Splits schema text into positioned tokens.
///
/// Whitespace separates tokens, punctuation is emitted on its own, a
/// backslash takes the next character verbatim and double quotes wrap a
/// literal in which nothing is special except the escape.
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    file: Arc<str>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, file: impl Into<Arc<str>>) -> Self {
        Self {
            chars: input.chars().peekable(),
            file: file.into(),
            line: 1,
            column: 1,
        }
    }

    fn here(&self) -> SourcePosition {
        SourcePosition {
            file: Arc::clone(&self.file),
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn at_comment(&self) -> bool {
        let mut ahead = self.chars.clone();
        ahead.next() == Some('/') && ahead.next() == Some('/')
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        let position = self.here();
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => {
                    return Ok(Token {
                        text,
                        position,
                        literal: true,
                    });
                }
                Some('\\') => {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
                Some(c) => text.push(c),
                None => return Err(LexError::UnterminatedString(position)),
            }
        }
    }

    pub fn next_token(&mut self) -> Option<Result<Token, LexError>> {
        let mut text = String::new();
        let mut start: Option<SourcePosition> = None;

        while let Some(&c) = self.chars.peek() {
            if c == ' ' || c == '\n' || c == '\t' || c == '\r' {
                self.bump();
                if !text.is_empty() {
                    break;
                }
            } else if c == '/' && self.at_comment() {
                if !text.is_empty() {
                    break;
                }
                self.skip_line();
            } else if PUNCTUATION.contains(&c) {
                if text.is_empty() {
                    let position = self.here();
                    self.bump();
                    return Some(Ok(Token {
                        text: c.to_string(),
                        position,
                        literal: false,
                    }));
                }
                break;
            } else if c == '"' {
                if text.is_empty() {
                    return Some(self.read_string());
                }
                break;
            } else if c == '\\' {
                start.get_or_insert_with(|| self.here());
                self.bump();
                if let Some(escaped) = self.bump() {
                    text.push(escaped);
                }
            } else {
                start.get_or_insert_with(|| self.here());
                self.bump();
                text.push(c);
            }
        }

        let position = start?;
        if text.is_empty() {
            return None;
        }
        Some(Ok(Token {
            text,
            position,
            literal: false,
        }))
    }

    pub fn tokenize(self) -> Result<Vec<Token>, LexError> {
        self.collect()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        Lexer::new(input, "test.schema")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            texts("struct Node { string: name: required; }"),
            vec!["struct", "Node", "{", "string", ":", "name", ":", "required", ";", "}"]
        );
    }

    #[test]
    fn test_punctuation_abutting_words() {
        assert_eq!(
            texts("array<Child>:kids:reference(Parent.id);"),
            vec![
                "array", "<", "Child", ">", ":", "kids", ":", "reference", "(", "Parent", ".",
                "id", ")", ";"
            ]
        );
    }

    #[test]
    fn test_string_literal_keeps_punctuation() {
        let tokens = Lexer::new(r#"description("a, b; {c}")"#, "t").tokenize().unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[2].text, "a, b; {c}");
        assert!(tokens[2].literal);
        assert!(tokens[2] != "a, b; {c}");
    }

    #[test]
    fn test_escapes() {
        assert_eq!(texts(r#"a\;b "say \"hi\"""#), vec!["a;b", "say \"hi\""]);
    }

    #[test]
    fn test_empty_literal_is_emitted() {
        let tokens = Lexer::new(r#"default("")"#, "t").tokenize().unwrap();
        assert_eq!(tokens.len(), 4);
        assert!(tokens[2].literal);
        assert!(tokens[2].text.is_empty());
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("enum Color {\n\tRed,\n  Green }", "colors.schema")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].position.line, 1);
        assert_eq!(tokens[0].position.column, 1);
        assert_eq!(tokens[2].position.column, 12);
        assert_eq!(tokens[3].text, "Red");
        assert_eq!(tokens[3].position.line, 2);
        assert_eq!(tokens[3].position.column, 2);
        assert_eq!(tokens[5].position.to_string(), "colors.schema:3:3");
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            texts("// header\nstruct A { // trailing\n}"),
            vec!["struct", "A", "{", "}"]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("x \"open", "t").tokenize().unwrap_err();
        let LexError::UnterminatedString(pos) = err;
        assert_eq!(pos.column, 3);
    }

    #[test]
    fn test_negative_number_is_one_token() {
        assert_eq!(texts("A = -1,"), vec!["A", "=", "-1", ","]);
    }
}
