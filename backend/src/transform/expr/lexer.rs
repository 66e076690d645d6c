//! Tokenizer for calculated-field expressions.

use crate::error::ExpressionFault;

/// Identifiers that are never valid field names.
const DENIED_IDENTIFIERS: &[&str] = &[
    "import", "exec", "eval", "compile", "open", "lambda", "globals", "locals",
    "getattr", "setattr", "delattr", "builtins", "subprocess",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Case,
    When,
    Then,
    Else,
    End,
    Is,
    Not,
    Null,
    And,
    Or,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        let kw = match ident.to_ascii_uppercase().as_str() {
            "CASE" => Self::Case,
            "WHEN" => Self::When,
            "THEN" => Self::Then,
            "ELSE" => Self::Else,
            "END" => Self::End,
            "IS" => Self::Is,
            "NOT" => Self::Not,
            "NULL" => Self::Null,
            "AND" => Self::And,
            "OR" => Self::Or,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    /// Numeric literal with its source text.
    Number(f64, String),
    Str(String),
    Keyword(Keyword),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Characters a bare arithmetic expression may contain.
pub fn is_arithmetic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c.is_whitespace() || "+-*/%().".contains(c)
}

/// Split expression text into tokens.
pub fn tokenize(text: &str) -> Result<Vec<Token>, ExpressionFault> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            tokens.push(classify_identifier(ident)?);
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            let mut seen_dot = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || (chars[i] == '.' && !seen_dot)) {
                if chars[i] == '.' {
                    seen_dot = true;
                }
                i += 1;
            }
            let raw: String = chars[start..i].iter().collect();
            let value = raw
                .parse::<f64>()
                .map_err(|_| ExpressionFault::Syntax(format!("invalid number '{}'", raw)))?;
            tokens.push(Token::Number(value, raw));
            continue;
        }

        if c == '\'' || c == '"' {
            let (literal, consumed) = read_string(&chars[i..], c)?;
            tokens.push(Token::Str(literal));
            i += consumed;
            continue;
        }

        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('>')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('=', _) => (Token::Eq, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            (other, _) => return Err(ExpressionFault::DisallowedCharacter(other)),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn classify_identifier(ident: String) -> Result<Token, ExpressionFault> {
    if ident.contains("__") {
        return Err(ExpressionFault::DisallowedToken(ident));
    }
    if DENIED_IDENTIFIERS.iter().any(|d| d.eq_ignore_ascii_case(&ident)) {
        return Err(ExpressionFault::DisallowedToken(ident));
    }
    Ok(match Keyword::from_ident(&ident) {
        Some(kw) => Token::Keyword(kw),
        None => Token::Ident(ident),
    })
}

/// Read a quoted literal starting at `chars[0]`. A doubled quote is an escaped quote.
fn read_string(chars: &[char], quote: char) -> Result<(String, usize), ExpressionFault> {
    let mut literal = String::new();
    let mut i = 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                literal.push(quote);
                i += 2;
                continue;
            }
            return Ok((literal, i + 1));
        }
        literal.push(chars[i]);
        i += 1;
    }
    Err(ExpressionFault::Syntax("unterminated string literal".to_string()))
}
