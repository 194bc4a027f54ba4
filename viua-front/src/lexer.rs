//! Source text to token stream.
//!
//! The lexer is line-oriented: newlines are tokens, and every other token
//! carries its location. Tokens are plain strings; classification happens
//! in the normaliser and parser.

use crate::error::{CompileError, Location};

/// A single token with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Where the token starts.
    pub location: Location,
    /// The token's text, exactly as written (strings keep their quotes).
    pub text: String,
}

impl Token {
    pub(crate) fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub(crate) fn is_newline(&self) -> bool {
        self.text == "\n"
    }

    /// The token text without a leading access sigil, if any.
    pub(crate) fn without_sigil(&self) -> &str {
        self.text
            .strip_prefix(['%', '@', '*'])
            .unwrap_or(&self.text)
    }
}

fn is_word_character(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | ':' | '+' | '-')
}

struct Scanner {
    chars: Vec<char>,
    at: usize,
    line: usize,
    character: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            at: 0,
            line: 1,
            character: 1,
        }
    }

    fn location(&self) -> Location {
        Location {
            line: self.line,
            character: self.character,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.at).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.at + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.at += 1;
        if c == '\n' {
            self.line += 1;
            self.character = 1;
        } else {
            self.character += 1;
        }
        Some(c)
    }

    fn take_while(
        &mut self,
        mut keep: impl FnMut(char) -> bool,
    ) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if !keep(c) {
                break;
            }
            text.push(c);
            self.advance();
        }
        text
    }

    fn quoted(&mut self, quote: char) -> Result<String, CompileError> {
        let location = self.location();
        let mut text = String::new();
        text.push(quote);
        self.advance();
        loop {
            match self.advance() {
                None => {
                    return Err(CompileError::syntax(
                        location,
                        "unterminated quoted literal",
                    ))
                }
                Some('\\') => {
                    text.push('\\');
                    match self.advance() {
                        None => {
                            return Err(CompileError::syntax(
                                location,
                                "unterminated quoted literal",
                            ))
                        }
                        Some(escaped) => text.push(escaped),
                    }
                }
                Some(c) if c == quote => {
                    text.push(quote);
                    return Ok(text);
                }
                Some('\n') => {
                    return Err(CompileError::syntax(
                        location,
                        "newline inside quoted literal",
                    ))
                }
                Some(c) => text.push(c),
            }
        }
    }
}

/// Tokenise a whole source file.
pub fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut scanner = Scanner::new(source);
    let mut tokens = Vec::new();

    while let Some(c) = scanner.peek() {
        let location = scanner.location();
        match c {
            '\n' => {
                scanner.advance();
                tokens.push(Token {
                    location,
                    text: "\n".into(),
                });
            }
            c if c.is_whitespace() => {
                scanner.advance();
            }
            // Commas are operand decoration; the grammar is whitespace
            // separated.
            ',' => {
                scanner.advance();
            }
            ';' => {
                scanner.take_while(|c| c != '\n');
            }
            '-' if scanner.peek_next() == Some('-') => {
                scanner.take_while(|c| c != '\n');
            }
            '[' if scanner.peek_next() == Some('[') => {
                scanner.advance();
                scanner.advance();
                tokens.push(Token {
                    location,
                    text: "[[".into(),
                });
            }
            ']' if scanner.peek_next() == Some(']') => {
                scanner.advance();
                scanner.advance();
                tokens.push(Token {
                    location,
                    text: "]]".into(),
                });
            }
            '"' | '\'' => {
                let text = scanner.quoted(c)?;
                tokens.push(Token { location, text });
            }
            '%' | '@' | '*' => {
                scanner.advance();
                let rest = scanner.take_while(is_word_character);
                if rest.is_empty() {
                    return Err(CompileError::syntax(
                        location,
                        format!("a register access sigil '{c}' must be followed by an index or name"),
                    ));
                }
                tokens.push(Token {
                    location,
                    text: format!("{c}{rest}"),
                });
            }
            c if is_word_character(c) => {
                let text = scanner.take_while(is_word_character);
                tokens.push(Token { location, text });
            }
            other => {
                return Err(CompileError::syntax(
                    location,
                    format!("unexpected character: {other:?}"),
                ));
            }
        }
    }

    // Make sure the final line is newline terminated; it simplifies every
    // later stage.
    if tokens.last().map(|t| !t.is_newline()).unwrap_or(false) {
        let location = scanner.location();
        tokens.push(Token {
            location,
            text: "\n".into(),
        });
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        lex(source).unwrap().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn tokenises_an_instruction_line() {
        assert_eq!(
            texts("add %1 local %1 local %2 local\n"),
            vec!["add", "%1", "local", "%1", "local", "%2", "local", "\n"]
        );
    }

    #[test]
    fn commas_and_comments_are_skipped() {
        assert_eq!(
            texts("copy %1 local, %2 local ; trailing words\n"),
            vec!["copy", "%1", "local", "%2", "local", "\n"]
        );
        assert_eq!(texts("-- a whole comment line\n"), vec!["\n"]);
    }

    #[test]
    fn directives_and_attribute_lists() {
        assert_eq!(
            texts(".function: [[entry]] main/0\n"),
            vec![".function:", "[[", "entry", "]]", "main/0", "\n"]
        );
    }

    #[test]
    fn quoted_literals_keep_their_quotes() {
        assert_eq!(
            texts("string %1 local \"Hello, World!\"\n"),
            vec!["string", "%1", "local", "\"Hello, World!\"", "\n"]
        );
        assert_eq!(
            texts("atom %1 local 'answer'\n"),
            vec!["atom", "%1", "local", "'answer'", "\n"]
        );
    }

    #[test]
    fn locations_point_at_token_starts() {
        let tokens = lex("  izero %0 local\n").unwrap();
        assert_eq!(tokens[0].location.line, 1);
        assert_eq!(tokens[0].location.character, 3);
        assert_eq!(tokens[1].location.character, 9);
    }

    #[test]
    fn unterminated_strings_are_rejected() {
        assert!(lex("string %1 local \"oops\n").is_err());
    }

    #[test]
    fn a_missing_final_newline_is_supplied() {
        assert_eq!(texts("halt"), vec!["halt", "\n"]);
    }
}
