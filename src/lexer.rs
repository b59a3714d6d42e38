//! Lexer for the Determa language
//!
//! A hand-written DFA that converts source code into a stream of tokens.
//! Tokens are produced on demand; lexing never fails fatally — bad input
//! becomes an error token and scanning continues.

use crate::token::{lookup_keyword, Span, Token, TokenKind};

/// The lexer state
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source code
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire source, including the trailing EOF token
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

    /// Scan and return the next token. Repeated calls after the end of
    /// input keep returning EOF.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start_line = self.line;
        let start_column = self.column;

        let Some(&(start_pos, ch)) = self.chars.peek() else {
            let pos = self.current_pos;
            return Token::new(
                TokenKind::Eof,
                Span::new(pos, pos, self.line, self.column),
                String::new(),
            );
        };

        let kind = match ch {
            // Single character tokens
            '(' => { self.advance(); TokenKind::LeftParen }
            ')' => { self.advance(); TokenKind::RightParen }
            '{' => { self.advance(); TokenKind::LeftBrace }
            '}' => { self.advance(); TokenKind::RightBrace }
            ',' => { self.advance(); TokenKind::Comma }
            ':' => { self.advance(); TokenKind::Colon }
            ';' => { self.advance(); TokenKind::Semicolon }

            // Arithmetic, possibly compound assignment
            '+' => self.one_or_two(TokenKind::Plus, TokenKind::PlusEqual),
            '-' => self.one_or_two(TokenKind::Minus, TokenKind::MinusEqual),
            '*' => self.one_or_two(TokenKind::Star, TokenKind::StarEqual),
            '/' => self.one_or_two(TokenKind::Slash, TokenKind::SlashEqual),
            '%' => self.one_or_two(TokenKind::Percent, TokenKind::PercentEqual),

            // Comparison and assignment
            '=' => self.one_or_two(TokenKind::Equal, TokenKind::EqualEqual),
            '!' => self.one_or_two(TokenKind::Bang, TokenKind::BangEqual),
            '<' => self.one_or_two(TokenKind::Less, TokenKind::LessEqual),
            '>' => self.one_or_two(TokenKind::Greater, TokenKind::GreaterEqual),

            // String literals
            '"' => self.scan_string(),

            // Integer literals
            c if c.is_ascii_digit() => self.scan_number(),

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            // Unknown character: report and keep the stream going
            _ => {
                self.advance();
                TokenKind::Error("Unexpected character.")
            }
        };

        let lexeme = self.source[start_pos..self.current_pos].to_string();

        Token::new(
            kind,
            Span::new(start_pos, self.current_pos, start_line, start_column),
            lexeme,
        )
    }

    /// Consume one character, or two if the next one is '='
    fn one_or_two(&mut self, single: TokenKind, with_equal: TokenKind) -> TokenKind {
        self.advance();
        if self.peek_char() == Some('=') {
            self.advance();
            with_equal
        } else {
            single
        }
    }

    /// Advance and return the current character
    fn advance(&mut self) -> Option<char> {
        if let Some((pos, ch)) = self.chars.next() {
            self.current_pos = pos + ch.len_utf8();
            self.column += 1;
            Some(ch)
        } else {
            None
        }
    }

    /// Peek at the next character without advancing
    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, ch)| ch)
    }

    /// Skip whitespace and `//` comments. Newlines bump the line counter.
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }

                '\n' => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }

                '/' if self.source[self.current_pos..].starts_with("//") => {
                    // Skip to end of line
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }

                _ => break,
            }
        }
    }

    /// Scan a string literal. Newlines are allowed inside strings.
    fn scan_string(&mut self) -> TokenKind {
        // Consume opening quote
        self.advance();
        let content_start = self.current_pos;

        loop {
            match self.peek_char() {
                Some('"') => {
                    let value = self.source[content_start..self.current_pos].to_string();
                    self.advance();
                    return TokenKind::Str(value);
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                    self.column = 1;
                }
                Some(_) => {
                    self.advance();
                }
                None => return TokenKind::Error("Unterminated string."),
            }
        }
    }

    /// Scan an integer literal (digits only, no sign, no decimals)
    fn scan_number(&mut self) -> TokenKind {
        let start = self.current_pos;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.current_pos];
        match text.parse::<i32>() {
            Ok(value) => TokenKind::Int(value),
            Err(_) => TokenKind::Error("Integer literal too large."),
        }
    }

    /// Scan an identifier or keyword
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.current_pos;

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = &self.source[start..self.current_pos];

        if let Some(keyword) = lookup_keyword(text) {
            keyword
        } else {
            TokenKind::Ident(text.to_string())
        }
    }
}
