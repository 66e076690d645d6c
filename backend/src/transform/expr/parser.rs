//! Recursive-descent parser producing an [`Expr`] tree.
//!
//! ```text
//! expression := arith
//! arith      := term (('+' | '-') term)*
//! term       := unary (('*' | '/' | '//' | '%') unary)*
//! unary      := ('-' | '+') unary | power
//! power      := primary ('**' unary)?
//! primary    := NUMBER | STRING | NULL | IDENT | '(' arith ')' | case
//! case       := CASE (WHEN condition THEN expression)+ (ELSE expression)? END
//! condition  := and (OR and)*
//! and        := atom (AND atom)*
//! atom       := NOT atom | '(' condition ')' | arith IS NOT? NULL | arith cmp arith
//! ```

use super::ast::{BinaryOp, CaseArm, CompareOp, Condition, Expr};
use super::lexer::{Keyword, Token};
use crate::error::ExpressionFault;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the whole token stream as one expression.
    pub fn parse(mut self) -> Result<Expr, ExpressionFault> {
        if self.tokens.is_empty() {
            return Err(syntax("empty expression"));
        }
        let expr = self.arith()?;
        match self.peek() {
            None => Ok(expr),
            Some(tok) => Err(syntax(format!("unexpected {}", describe(tok)))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        self.eat(&Token::Keyword(kw))
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionFault> {
        if self.eat(&expected) {
            return Ok(());
        }
        let found = self.peek().map(describe).unwrap_or_else(|| "end of expression".to_string());
        Err(syntax(format!("expected {}, found {}", describe(&expected), found)))
    }

    // -------------------------------------------------------------------------
    // Arithmetic
    // -------------------------------------------------------------------------

    fn arith(&mut self) -> Result<Expr, ExpressionFault> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, ExpressionFault> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionFault> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ExpressionFault> {
        let base = self.primary()?;
        if self.eat(&Token::DoubleStar) {
            // right-associative, exponent may carry its own sign
            let exponent = self.unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionFault> {
        match self.advance() {
            Some(Token::Number(value, raw)) => Ok(Expr::Number(value, raw)),
            Some(Token::Str(s)) => Ok(Expr::Text(s)),
            Some(Token::Ident(name)) => Ok(Expr::Field(name)),
            Some(Token::Keyword(Keyword::Null)) => Ok(Expr::Null),
            Some(Token::Keyword(Keyword::Case)) => self.case_body(),
            Some(Token::LParen) => {
                let inner = self.arith()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(tok) => Err(syntax(format!("unexpected {}", describe(&tok)))),
            None => Err(syntax("unexpected end of expression")),
        }
    }

    // -------------------------------------------------------------------------
    // CASE
    // -------------------------------------------------------------------------

    /// Parse after the `CASE` keyword has been consumed.
    fn case_body(&mut self) -> Result<Expr, ExpressionFault> {
        let mut arms = Vec::new();
        let mut otherwise = None;

        loop {
            if self.eat_keyword(Keyword::When) {
                let condition = self.condition()?;
                self.expect(Token::Keyword(Keyword::Then))?;
                let value = self.arith()?;
                arms.push(CaseArm { condition, value });
                continue;
            }
            if arms.is_empty() {
                return Err(syntax("CASE requires at least one WHEN clause"));
            }
            if self.eat_keyword(Keyword::Else) {
                otherwise = Some(Box::new(self.arith()?));
                self.expect(Token::Keyword(Keyword::End))?;
                break;
            }
            self.expect(Token::Keyword(Keyword::End))?;
            break;
        }

        Ok(Expr::Case { arms, otherwise })
    }

    fn condition(&mut self) -> Result<Condition, ExpressionFault> {
        let mut lhs = self.and_condition()?;
        while self.eat_keyword(Keyword::Or) {
            let rhs = self.and_condition()?;
            lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_condition(&mut self) -> Result<Condition, ExpressionFault> {
        let mut lhs = self.condition_atom()?;
        while self.eat_keyword(Keyword::And) {
            let rhs = self.condition_atom()?;
            lhs = Condition::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn condition_atom(&mut self) -> Result<Condition, ExpressionFault> {
        if self.eat_keyword(Keyword::Not) {
            return Ok(Condition::Not(Box::new(self.condition_atom()?)));
        }

        // "(a > 1 OR b = 2)" groups conditions, "(a + b) > 3" groups arithmetic
        if self.peek() == Some(&Token::LParen) && self.groups_condition(self.pos) {
            self.pos += 1;
            let inner = self.condition()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        self.comparison()
    }

    /// Index of the `)` closing the `(` at `open`.
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (i, tok) in self.tokens.iter().enumerate().skip(open) {
            match tok {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Whether the group opened at `open` holds a condition rather than
    /// arithmetic: a comparison, `IS`, `AND`, `OR` or `NOT` at its own level.
    fn groups_condition(&self, open: usize) -> bool {
        let Some(close) = self.matching_paren(open) else {
            return false;
        };
        let inner = open + 1;
        if self.tokens.get(inner) == Some(&Token::LParen) && self.matching_paren(inner) == Some(close - 1) {
            return self.groups_condition(inner);
        }

        let mut parens = 0usize;
        let mut cases = 0usize;
        for tok in &self.tokens[inner..close] {
            match tok {
                Token::LParen => parens += 1,
                Token::RParen => parens = parens.saturating_sub(1),
                Token::Keyword(Keyword::Case) => cases += 1,
                Token::Keyword(Keyword::End) => cases = cases.saturating_sub(1),
                _ if parens > 0 || cases > 0 => {}
                Token::Eq | Token::NotEq | Token::Lt | Token::Le | Token::Gt | Token::Ge => return true,
                Token::Keyword(Keyword::Is | Keyword::And | Keyword::Or | Keyword::Not) => return true,
                _ => {}
            }
        }
        false
    }

    fn comparison(&mut self) -> Result<Condition, ExpressionFault> {
        let lhs = self.arith()?;

        if self.eat_keyword(Keyword::Is) {
            let negated = self.eat_keyword(Keyword::Not);
            self.expect(Token::Keyword(Keyword::Null))?;
            return Ok(Condition::IsNull { operand: lhs, negated });
        }

        let op = match self.advance() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::NotEq) => CompareOp::NotEq,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(tok) => return Err(syntax(format!("expected comparison operator, found {}", describe(&tok)))),
            None => return Err(syntax("expected comparison operator, found end of expression")),
        };
        let rhs = self.arith()?;
        Ok(Condition::Compare { lhs, op, rhs })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn syntax(msg: impl Into<String>) -> ExpressionFault {
    ExpressionFault::Syntax(msg.into())
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Number(_, raw) => format!("number {}", raw),
        Token::Str(s) => format!("string '{}'", s),
        Token::Keyword(kw) => format!("{:?}", kw).to_uppercase(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::expr::lexer::tokenize;

    fn parse(text: &str) -> Result<Expr, ExpressionFault> {
        Parser::new(tokenize(text)?).parse()
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + b * 12").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_negation() {
        let expr = parse("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::Neg(_)));
    }

    #[test]
    fn test_case_arms() {
        let expr = parse("CASE WHEN a = 'X' THEN 1 WHEN b IS NOT NULL THEN b ELSE NULL END").unwrap();
        match expr {
            Expr::Case { arms, otherwise } => {
                assert_eq!(arms.len(), 2);
                assert!(matches!(arms[1].condition, Condition::IsNull { negated: true, .. }));
                assert_eq!(otherwise.as_deref(), Some(&Expr::Null));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn test_grouped_conditions_and_arithmetic() {
        assert!(parse("CASE WHEN (a > 1 OR b = 2) AND c < 3 THEN 1 END").is_ok());
        assert!(parse("CASE WHEN (a + b) > 3 THEN 1 END").is_ok());
        assert!(parse("CASE WHEN ((a > 1)) THEN 1 END").is_ok());
        assert!(parse("CASE WHEN (NOT a IS NULL) THEN 1 END").is_ok());
        assert!(parse("CASE WHEN (CASE WHEN a > 1 THEN 2 END + b) >= 3 THEN 1 END").is_ok());
        assert!(parse("CASE WHEN (a > 1 THEN 1 END").is_err());
    }

    #[test]
    fn test_deeply_nested_arithmetic_in_condition() {
        let depth = 40;
        let text = format!("CASE WHEN {}a + b{} > 1 THEN 1 END", "(".repeat(depth), ")".repeat(depth));
        match parse(&text).unwrap() {
            Expr::Case { arms, .. } => {
                assert!(matches!(
                    arms[0].condition,
                    Condition::Compare { lhs: Expr::Binary { op: BinaryOp::Add, .. }, op: CompareOp::Gt, .. }
                ));
            }
            other => panic!("unexpected tree: {:?}", other),
        }

        let grouped = format!("CASE WHEN {}a > 1{} OR b = 2 THEN 1 END", "(".repeat(depth), ")".repeat(depth));
        assert!(parse(&grouped).is_ok());
    }

    #[test]
    fn test_malformed_case() {
        assert!(parse("CASE WHEN a = 1 THEN 2").is_err());
        assert!(parse("CASE ELSE 1 END").is_err());
        assert!(parse("CASE WHEN a THEN 1 END").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("(a + b").is_err());
    }

    #[test]
    fn test_fields_collected() {
        let expr = parse("b_months_at_job + (b_years_at_job * 12)").unwrap();
        assert_eq!(expr.fields(), vec!["b_months_at_job", "b_years_at_job"]);
    }
}
