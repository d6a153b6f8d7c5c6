//! Pratt parser turning rule tokens into an [`Expr`] tree.

use super::{
    RuleError,
    lexer::{Token, tokenize},
};

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Expr {
    Literal(Literal),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Builtin call. Method syntax `a.f(b)` is lowered to `f(a, b)`.
    Call(String, Vec<Expr>),
}

const TERNARY_BP: u8 = 1;
const PREFIX_BP: u8 = 15;

fn infix_binding(token: &Token) -> Option<(BinaryOp, u8)> {
    let op = match token {
        Token::OrOr => (BinaryOp::Or, 3),
        Token::AndAnd => (BinaryOp::And, 5),
        Token::EqEq => (BinaryOp::Eq, 7),
        Token::NotEq => (BinaryOp::NotEq, 7),
        Token::Lt => (BinaryOp::Lt, 9),
        Token::LtEq => (BinaryOp::LtEq, 9),
        Token::Gt => (BinaryOp::Gt, 9),
        Token::GtEq => (BinaryOp::GtEq, 9),
        Token::Plus => (BinaryOp::Add, 11),
        Token::Minus => (BinaryOp::Sub, 11),
        Token::Star => (BinaryOp::Mul, 13),
        Token::Slash => (BinaryOp::Div, 13),
        Token::Percent => (BinaryOp::Rem, 13),
        _ => return None,
    };
    Some(op)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, p)| *p)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> RuleError {
        RuleError::Parse {
            position: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token, label: &str) -> Result<(), RuleError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {label}")))
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, RuleError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(token) = self.peek() else { break };

            if *token == Token::Question {
                if TERNARY_BP < min_bp {
                    break;
                }
                self.pos += 1;
                let then = self.expression(0)?;
                self.expect(Token::Colon, "':' in conditional")?;
                let otherwise = self.expression(TERNARY_BP)?;
                lhs = Expr::Conditional(Box::new(lhs), Box::new(then), Box::new(otherwise));
                continue;
            }

            let Some((op, bp)) = infix_binding(token) else {
                break;
            };
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, RuleError> {
        let token = self
            .next()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        let primary = match token {
            Token::Number(n) => Expr::Literal(Literal::Number(n)),
            Token::Str(s) => Expr::Literal(Literal::Str(s)),
            Token::True => Expr::Literal(Literal::Bool(true)),
            Token::False => Expr::Literal(Literal::Bool(false)),
            Token::Null => Expr::Literal(Literal::Null),
            Token::Bang => {
                let operand = self.expression(PREFIX_BP)?;
                return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
            }
            Token::Minus => {
                let operand = self.expression(PREFIX_BP)?;
                return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
            }
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen, "')'")?;
                inner
            }
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    Expr::Call(name, args)
                } else {
                    Expr::Ident(name)
                }
            }
            other => {
                self.pos -= 1;
                return Err(self.error(format!("unexpected token {other:?}")));
            }
        };
        self.postfix(primary)
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, RuleError> {
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let Some(Token::Ident(name)) = self.next() else {
                        return Err(self.error("expected property name after '.'"));
                    };
                    if self.peek() == Some(&Token::LParen) {
                        self.pos += 1;
                        let mut args = vec![expr];
                        args.extend(self.arguments()?);
                        expr = Expr::Call(name, args);
                    } else {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression(0)?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parses `a, b, c)` after an opening parenthesis.
    fn arguments(&mut self) -> Result<Vec<Expr>, RuleError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expression(0)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.error("expected ',' or ')' in argument list")),
            }
        }
    }
}

pub(super) fn parse(source: &str) -> Result<Expr, RuleError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(RuleError::Parse {
            position: 0,
            message: "empty expression".to_string(),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.expression(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Literal(Literal::Number(n)))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse("a + b * 2").unwrap(),
            Expr::Binary(
                BinaryOp::Add,
                ident("a"),
                Box::new(Expr::Binary(BinaryOp::Mul, ident("b"), num(2.0)))
            )
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            parse("a || b && c").unwrap(),
            Expr::Binary(
                BinaryOp::Or,
                ident("a"),
                Box::new(Expr::Binary(BinaryOp::And, ident("b"), ident("c")))
            )
        );
    }

    #[test]
    fn method_call_is_lowered_with_receiver_first() {
        assert_eq!(
            parse("currentLineItem.productId.startsWith('gift')").unwrap(),
            Expr::Call(
                "startsWith".to_string(),
                vec![
                    Expr::Member(ident("currentLineItem"), "productId".to_string()),
                    Expr::Literal(Literal::Str("gift".to_string())),
                ]
            )
        );
    }

    #[test]
    fn conditional_is_right_associative() {
        let expr = parse("a ? 1 : b ? 2 : 3").unwrap();
        let Expr::Conditional(_, _, otherwise) = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*otherwise, Expr::Conditional(..)));
    }

    #[test]
    fn index_and_negation() {
        assert_eq!(
            parse("-lineItems[0].unitPrice").unwrap(),
            Expr::Unary(
                UnaryOp::Neg,
                Box::new(Expr::Member(
                    Box::new(Expr::Index(ident("lineItems"), num(0.0))),
                    "unitPrice".to_string()
                ))
            )
        );
    }

    #[test]
    fn rejects_trailing_tokens_and_dangling_operators() {
        assert!(parse("a b").is_err());
        assert!(parse("a +").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("").is_err());
    }
}
