//! Tokenizer for the template language.
//!
//! The lexer is modal: outside `{...}` it collects raw template text into a
//! single token per contiguous run, inside a directive it produces the
//! structural, keyword, literal and operator tokens the parser consumes.
//! Whitespace inside a directive is discarded; whitespace outside is part of
//! the raw text and preserved verbatim.

pub mod errors;

pub use errors::{LexError, LexErrorKind, LexResult};

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token, carrying the payload for literals.
    pub kind: TokenKind,
    /// The text of the token. For raw text this is the verbatim run, for
    /// string literals the unescaped content, for identifiers the name.
    pub text: String,
    /// The byte offset where this token starts.
    pub start: usize,
}

/// The kinds of tokens the template language consists of.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal template text outside of directives.
    Raw,
    /// `{` opening a directive.
    OpenBrace,
    /// `}` closing a directive.
    CloseBrace,

    // Keywords, recognized after the general identifier match.
    If,
    ElseIf,
    Else,
    Foreach,
    ForeachElse,
    In,
    As,
    Assign,
    To,
    True,
    False,
    Null,

    /// An identifier: `[A-Za-z_][A-Za-z_0-9]*`.
    Ident,
    /// Base-10 signed 64-bit integer literal.
    Integer(i64),
    /// Floating point literal, `[0-9]+.[0-9]+` with optional exponent.
    Double(f64),
    /// Quoted string literal; `text` holds the unescaped content.
    Str,

    Dollar,
    Dot,
    Comma,
    Colon,
    Pipe,
    OpenBracket,
    CloseBracket,
    OpenParen,
    CloseParen,
    Arrow,
    Eq,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Not,
}

/// Lexer state: raw text versus the inside of a `{...}` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerMode {
    /// Outside a directive; everything up to the next `{` is raw output.
    Text,
    /// Inside a directive; structural tokens until the closing `}`.
    Code,
}

/// The lexer for template input.
pub struct Lexer<'s> {
    /// The template source.
    input: &'s str,
    /// Current byte position in the input.
    pos: usize,
    /// Current mode.
    mode: LexerMode,
}

impl<'s> Lexer<'s> {
    /// Creates a new lexer for the given input.
    pub fn new(input: &'s str) -> Self {
        Self {
            input,
            pos: 0,
            mode: LexerMode::Text,
        }
    }

    /// Tokenizes the entire input, stopping at the first error.
    pub fn tokenize(mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        if self.mode == LexerMode::Code {
            return Err(LexError::new(LexErrorKind::UnterminatedDirective, self.pos));
        }
        Ok(tokens)
    }

    fn remaining(&self) -> &'s str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Returns the next token, or None at EOF.
    fn next_token(&mut self) -> LexResult<Option<Token>> {
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        match self.mode {
            LexerMode::Text => self.lex_text(),
            LexerMode::Code => self.lex_code(),
        }
    }

    /// Lexes in text mode: a raw run up to the next `{`, or the `{` itself.
    fn lex_text(&mut self) -> LexResult<Option<Token>> {
        let start = self.pos;
        if self.remaining().starts_with('{') {
            self.advance(1);
            self.mode = LexerMode::Code;
            return Ok(Some(Token {
                kind: TokenKind::OpenBrace,
                text: "{".to_string(),
                start,
            }));
        }

        let run = match self.remaining().find('{') {
            Some(end) => &self.remaining()[..end],
            None => self.remaining(),
        };
        self.advance(run.len());
        Ok(Some(Token {
            kind: TokenKind::Raw,
            text: run.to_string(),
            start,
        }))
    }

    /// Lexes one token in code mode.
    fn lex_code(&mut self) -> LexResult<Option<Token>> {
        // whitespace inside directives carries no meaning
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.advance(1);
        }
        if self.pos >= self.input.len() {
            return Err(LexError::new(LexErrorKind::UnterminatedDirective, self.pos));
        }

        let start = self.pos;
        let rest = self.remaining();

        // multi-character operators first
        for (pat, kind) in [
            ("=>", TokenKind::Arrow),
            ("==", TokenKind::EqEq),
            ("!=", TokenKind::NotEq),
            ("<=", TokenKind::LtEq),
            (">=", TokenKind::GtEq),
            ("&&", TokenKind::AndAnd),
            ("||", TokenKind::OrOr),
        ] {
            if rest.starts_with(pat) {
                self.advance(pat.len());
                return Ok(Some(Token {
                    kind,
                    text: pat.to_string(),
                    start,
                }));
            }
        }

        let Some(c) = self.peek() else {
            return Err(LexError::new(LexErrorKind::UnterminatedDirective, self.pos));
        };
        let kind = match c {
            '}' => {
                self.mode = LexerMode::Text;
                Some(TokenKind::CloseBrace)
            }
            '$' => Some(TokenKind::Dollar),
            '.' => Some(TokenKind::Dot),
            ',' => Some(TokenKind::Comma),
            ':' => Some(TokenKind::Colon),
            '|' => Some(TokenKind::Pipe),
            '[' => Some(TokenKind::OpenBracket),
            ']' => Some(TokenKind::CloseBracket),
            '(' => Some(TokenKind::OpenParen),
            ')' => Some(TokenKind::CloseParen),
            '=' => Some(TokenKind::Eq),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '%' => Some(TokenKind::Percent),
            '<' => Some(TokenKind::Lt),
            '>' => Some(TokenKind::Gt),
            '!' => Some(TokenKind::Not),
            _ => None,
        };
        if let Some(kind) = kind {
            self.advance(c.len_utf8());
            return Ok(Some(Token {
                kind,
                text: c.to_string(),
                start,
            }));
        }

        if c == '"' || c == '\'' {
            return self.lex_string(c).map(Some);
        }
        if c.is_ascii_digit() {
            return self.lex_number().map(Some);
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(Some(self.lex_ident()));
        }

        Err(LexError::new(LexErrorKind::InvalidCharacter, self.pos))
    }

    /// Lexes a quoted string literal, resolving `\` escapes.
    fn lex_string(&mut self, quote: char) -> LexResult<Token> {
        let start = self.pos;
        self.advance(1);

        let mut text = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(LexError::new(LexErrorKind::UnterminatedString, start));
            };
            self.advance(c.len_utf8());
            if c == quote {
                break;
            }
            if c != '\\' {
                text.push(c);
                continue;
            }
            let Some(esc) = self.peek() else {
                return Err(LexError::new(LexErrorKind::UnterminatedString, start));
            };
            self.advance(esc.len_utf8());
            match esc {
                'n' => text.push('\n'),
                'r' => text.push('\r'),
                't' => text.push('\t'),
                '0' => text.push('\0'),
                '\\' | '"' | '\'' => text.push(esc),
                _ => {
                    return Err(LexError::new(
                        LexErrorKind::InvalidEscapeSequence,
                        self.pos - esc.len_utf8(),
                    ))
                }
            }
        }

        Ok(Token {
            kind: TokenKind::Str,
            text,
            start,
        })
    }

    /// Lexes an integer literal, upgrading to a double on `.` or an exponent.
    fn lex_number(&mut self) -> LexResult<Token> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
        }

        let mut is_double = false;
        if self.remaining().starts_with('.')
            && self.remaining()[1..].starts_with(|c: char| c.is_ascii_digit())
        {
            is_double = true;
            self.advance(1);
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance(1);
            }
        }
        if self.peek() == Some('e') || self.peek() == Some('E') {
            let mut ahead = self.pos + 1;
            if self.input[ahead..].starts_with(['+', '-']) {
                ahead += 1;
            }
            if self.input[ahead..].starts_with(|c: char| c.is_ascii_digit()) {
                is_double = true;
                self.pos = ahead;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance(1);
                }
            }
        }

        let text = &self.input[start..self.pos];
        let kind = if is_double {
            let value = text
                .parse::<f64>()
                .map_err(|_| LexError::new(LexErrorKind::InvalidNumericLiteral, start))?;
            TokenKind::Double(value)
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| LexError::new(LexErrorKind::IntegerOverflow, start))?;
            TokenKind::Integer(value)
        };

        Ok(Token {
            kind,
            text: text.to_string(),
            start,
        })
    }

    /// Lexes an identifier and promotes it to a keyword where applicable.
    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance(1);
        }
        let text = &self.input[start..self.pos];

        let kind = match text {
            "if" => TokenKind::If,
            "elseif" => TokenKind::ElseIf,
            "else" => TokenKind::Else,
            "foreach" => TokenKind::Foreach,
            "foreachelse" => TokenKind::ForeachElse,
            "in" => TokenKind::In,
            "as" => TokenKind::As,
            "assign" => TokenKind::Assign,
            "to" => TokenKind::To,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Ident,
        };

        Token {
            kind,
            text: text.to_string(),
            start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn raw_text_is_one_token() {
        let tokens = Lexer::new("hello  world\n").tokenize().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Raw);
        assert_eq!(tokens[0].text, "hello  world\n");
    }

    #[test]
    fn directive_tokens() {
        assert_eq!(
            kinds("{$name}"),
            vec![
                TokenKind::OpenBrace,
                TokenKind::Dollar,
                TokenKind::Ident,
                TokenKind::CloseBrace,
            ]
        );
    }

    #[test]
    fn keywords_and_operators() {
        assert_eq!(
            kinds("{if $a == 1}"),
            vec![
                TokenKind::OpenBrace,
                TokenKind::If,
                TokenKind::Dollar,
                TokenKind::Ident,
                TokenKind::EqEq,
                TokenKind::Integer(1),
                TokenKind::CloseBrace,
            ]
        );
    }

    #[test]
    fn whitespace_outside_is_preserved() {
        let tokens = Lexer::new("  a {$x} b  ").tokenize().unwrap();
        assert_eq!(tokens[0].text, "  a ");
        assert_eq!(tokens.last().unwrap().text, " b  ");
    }

    #[test]
    fn double_literals() {
        assert_eq!(kinds("{1.5}")[1], TokenKind::Double(1.5));
        assert_eq!(kinds("{1.5e17}")[1], TokenKind::Double(1.5e17));
        assert_eq!(kinds("{12}")[1], TokenKind::Integer(12));
    }

    #[test]
    fn string_escapes() {
        let tokens = Lexer::new(r#"{"a\nb"}"#).tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Str);
        assert_eq!(tokens[1].text, "a\nb");
    }

    #[test]
    fn large_integer_fits_in_64_bits() {
        assert_eq!(
            kinds("{922337203685477580}")[1],
            TokenKind::Integer(922337203685477580)
        );
    }

    #[test]
    fn unterminated_directive_fails() {
        let err = Lexer::new("{if true").tokenize().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedDirective);
    }

    #[test]
    fn foreach_with_keys_tokens() {
        assert_eq!(
            kinds("{foreach $m as $k => $v}"),
            vec![
                TokenKind::OpenBrace,
                TokenKind::Foreach,
                TokenKind::Dollar,
                TokenKind::Ident,
                TokenKind::As,
                TokenKind::Dollar,
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::Dollar,
                TokenKind::Ident,
                TokenKind::CloseBrace,
            ]
        );
    }
}
