//! DDL tokenizer.

use std::iter::Peekable;
use std::str::CharIndices;

/// Token kinds of the DDL grammar.
///
/// Keywords are not distinguished from identifiers here; the parser
/// matches them case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Number(u64),
    String(String),
    LParen,
    RParen,
    Comma,
    Eq,
    Semicolon,
    Eof,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Lexer over one DDL script.
pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole script. The last token is always `Eof`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let line = self.line;
        let column = self.column;

        let kind = match self.peek_char() {
            None => TokenKind::Eof,
            Some(c) => match c {
                '(' => {
                    self.advance();
                    TokenKind::LParen
                }
                ')' => {
                    self.advance();
                    TokenKind::RParen
                }
                ',' => {
                    self.advance();
                    TokenKind::Comma
                }
                '=' => {
                    self.advance();
                    TokenKind::Eq
                }
                ';' => {
                    self.advance();
                    TokenKind::Semicolon
                }
                '\'' => self.scan_string(),
                '"' => self.scan_quoted_ident(),
                c if c.is_ascii_digit() => self.scan_number(),
                c if c.is_alphabetic() || c == '_' => self.scan_ident(),
                other => {
                    self.advance();
                    TokenKind::Error(format!("unexpected character '{other}'"))
                }
            },
        };

        Token { kind, line, column }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn advance(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('-') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if matches!(ahead.peek(), Some((_, '-'))) {
                        while let Some(c) = self.advance() {
                            if c == '\n' {
                                break;
                            }
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn scan_ident(&mut self) -> TokenKind {
        let mut ident = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Ident(ident)
    }

    fn scan_quoted_ident(&mut self) -> TokenKind {
        self.advance();
        let mut ident = String::new();
        loop {
            match self.advance() {
                Some('"') => return TokenKind::Ident(ident),
                Some(c) => ident.push(c),
                None => return TokenKind::Error("unterminated quoted identifier".to_string()),
            }
        }
    }

    fn scan_number(&mut self) -> TokenKind {
        let mut digits = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        match digits.parse() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Error(format!("number out of range: {digits}")),
        }
    }

    /// `'...'` with `''` as an escaped quote.
    fn scan_string(&mut self) -> TokenKind {
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                Some('\'') => {
                    if self.peek_char() == Some('\'') {
                        self.advance();
                        value.push('\'');
                    } else {
                        return TokenKind::String(value);
                    }
                }
                Some(c) => value.push(c),
                None => return TokenKind::Error("unterminated string literal".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_zone_statement() {
        assert_eq!(
            kinds("CREATE ZONE z WITH REPLICAS=2, STORAGE_PROFILES='default';"),
            vec![
                TokenKind::Ident("CREATE".into()),
                TokenKind::Ident("ZONE".into()),
                TokenKind::Ident("z".into()),
                TokenKind::Ident("WITH".into()),
                TokenKind::Ident("REPLICAS".into()),
                TokenKind::Eq,
                TokenKind::Number(2),
                TokenKind::Comma,
                TokenKind::Ident("STORAGE_PROFILES".into()),
                TokenKind::Eq,
                TokenKind::String("default".into()),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments_and_tracks_lines() {
        let tokens = Lexer::new("-- header\n  DROP ZONE x").tokenize();
        assert_eq!(tokens[0].kind, TokenKind::Ident("DROP".into()));
        assert_eq!((tokens[0].line, tokens[0].column), (2, 3));
    }

    #[test]
    fn string_escapes_and_errors() {
        assert_eq!(kinds("'it''s'")[0], TokenKind::String("it's".into()));
        assert!(matches!(kinds("'open")[0], TokenKind::Error(_)));
        assert!(matches!(kinds("@")[0], TokenKind::Error(_)));
        assert!(matches!(kinds("- 1")[0], TokenKind::Error(_)));
    }
}
