use std::collections::HashMap;

use crate::ast::{ASTNode, Expression, Function, Prototype, ANONYMOUS_NAME};
use crate::lexer::{lex, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("unexpected {0} when expecting an expression")]
    ExpectedExpression(String),
    #[error("expected {expected}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
    },
}

pub type PartialParseResult = Result<Expression, ParserError>;

fn describe(token: Option<&Token>) -> String {
    match token {
        Some(token) => token.to_string(),
        None => "end of input".to_string(),
    }
}

/// Recursive-descent parser over the lexer's token stack. Primaries are
/// parsed by dispatch on one token of lookahead, binary expressions by
/// precedence climbing over `operator_precedence`.
///
/// Failure paths leave the offending token on the stack, so a caller can
/// recover by skipping exactly one token.
#[derive(Debug, Clone)]
pub struct Parser {
    pub operator_precedence: HashMap<String, i32>,
}

impl std::default::Default for Parser {
    fn default() -> Self {
        let mut operator_precedence = HashMap::new();
        operator_precedence.insert("<".to_string(), 10);
        operator_precedence.insert("+".to_string(), 20);
        operator_precedence.insert("-".to_string(), 20);
        operator_precedence.insert("*".to_string(), 40);
        Self {
            operator_precedence,
        }
    }
}

impl Parser {
    fn parse_number(&self, input: &mut Vec<Token>) -> PartialParseResult {
        match input.pop() {
            Some(Token::Number(num)) => Ok(Expression::Literal(num)),
            _ => unreachable!("parse_primary dispatched on a number"),
        }
    }

    fn parse_identifier(&self, input: &mut Vec<Token>) -> PartialParseResult {
        let name = match input.pop() {
            Some(Token::Ident(name)) => name,
            _ => unreachable!("parse_primary dispatched on an identifier"),
        };

        if input.last() != Some(&Token::OpenParen) {
            return Ok(Expression::Variable(name));
        }
        input.pop();

        let mut args = Vec::new();
        if input.last() == Some(&Token::CloseParen) {
            input.pop();
            return Ok(Expression::Call(name, args));
        }
        loop {
            args.push(self.parse_expr(input)?);
            match input.last() {
                Some(Token::CloseParen) => {
                    input.pop();
                    break;
                }
                Some(Token::Comma) => {
                    input.pop();
                }
                _ => {
                    return Err(ParserError::Expected {
                        expected: "')' or ',' in argument list",
                        found: describe(input.last()),
                    })
                }
            }
        }
        Ok(Expression::Call(name, args))
    }

    fn parse_nested(&self, input: &mut Vec<Token>) -> PartialParseResult {
        input.pop();
        let res = self.parse_expr(input)?;
        if input.last() != Some(&Token::CloseParen) {
            return Err(ParserError::Expected {
                expected: "')'",
                found: describe(input.last()),
            });
        }
        input.pop();
        Ok(res)
    }

    fn parse_primary(&self, input: &mut Vec<Token>) -> PartialParseResult {
        match input.last() {
            Some(Token::Number(_)) => self.parse_number(input),
            Some(Token::Ident(_)) => self.parse_identifier(input),
            Some(Token::OpenParen) => self.parse_nested(input),
            _ => Err(ParserError::ExpectedExpression(describe(input.last()))),
        }
    }

    /// Binding strength of the operator on top of the stack, or -1 when the
    /// next token is not a known binary operator. -1 is the sentinel that
    /// stops `parse_rhs` rather than an error.
    fn peek_precedence(&self, input: &[Token]) -> i32 {
        match input.last() {
            Some(Token::Operator(op)) => self.operator_precedence.get(op).copied().unwrap_or(-1),
            _ => -1,
        }
    }

    fn parse_rhs(
        &self,
        input: &mut Vec<Token>,
        expr_precedence: i32,
        mut lhs: Expression,
    ) -> PartialParseResult {
        loop {
            let tok_precedence = self.peek_precedence(input);
            if tok_precedence < expr_precedence {
                return Ok(lhs);
            }

            let operator = match input.pop() {
                Some(Token::Operator(op)) => op,
                _ => unreachable!("peek_precedence guarantees an operator"),
            };

            let mut rhs = self.parse_primary(input)?;

            // if the operator after the rhs binds tighter, it takes the rhs
            // as its own lhs
            if tok_precedence < self.peek_precedence(input) {
                rhs = self.parse_rhs(input, tok_precedence + 1, rhs)?;
            }

            lhs = Expression::Binary(operator, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_expr(&self, input: &mut Vec<Token>) -> PartialParseResult {
        let lhs = self.parse_primary(input)?;
        self.parse_rhs(input, 0, lhs)
    }

    fn parse_prototype(&self, input: &mut Vec<Token>) -> Result<Prototype, ParserError> {
        let name = match input.last() {
            Some(Token::Ident(name)) => name.clone(),
            _ => {
                return Err(ParserError::Expected {
                    expected: "function name in prototype",
                    found: describe(input.last()),
                })
            }
        };
        input.pop();

        if input.last() != Some(&Token::OpenParen) {
            return Err(ParserError::Expected {
                expected: "'(' in prototype",
                found: describe(input.last()),
            });
        }
        input.pop();

        let mut args = Vec::new();
        while let Some(Token::Ident(_)) = input.last() {
            if let Some(Token::Ident(arg)) = input.pop() {
                args.push(arg);
            }
        }

        if input.last() != Some(&Token::CloseParen) {
            return Err(ParserError::Expected {
                expected: "')' in prototype",
                found: describe(input.last()),
            });
        }
        input.pop();

        Ok(Prototype { name, args })
    }

    pub fn parse_definition(&self, input: &mut Vec<Token>) -> Result<Function, ParserError> {
        input.pop(); // the leading 'def'
        let prototype = self.parse_prototype(input)?;
        let body = self.parse_expr(input)?;
        Ok(Function { prototype, body })
    }

    pub fn parse_extern(&self, input: &mut Vec<Token>) -> Result<Prototype, ParserError> {
        input.pop(); // the leading 'extern'
        self.parse_prototype(input)
    }

    /// Wrap a bare expression in a zero-argument function so it can be
    /// generated and invoked like any other.
    pub fn parse_top_level_expr(&self, input: &mut Vec<Token>) -> Result<Function, ParserError> {
        let body = self.parse_expr(input)?;
        Ok(Function {
            prototype: Prototype {
                name: ANONYMOUS_NAME.to_string(),
                args: Vec::new(),
            },
            body,
        })
    }

    /// Parse a whole source string into top-level nodes, stopping at the
    /// first error. The driver's unit-by-unit loop with recovery does not go
    /// through here; this is for tests and embedders.
    pub fn parse_str(&self, source: &str) -> Result<Vec<ASTNode>, ParserError> {
        let mut input = lex(source);
        let mut nodes = Vec::new();
        while let Some(token) = input.last() {
            match token {
                Token::Delimiter => {
                    input.pop();
                }
                Token::Def => nodes.push(ASTNode::Function(self.parse_definition(&mut input)?)),
                Token::Extern => nodes.push(ASTNode::Extern(self.parse_extern(&mut input)?)),
                _ => nodes.push(ASTNode::Function(self.parse_top_level_expr(&mut input)?)),
            }
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lit(value: f64) -> Expression {
        Expression::Literal(value)
    }

    fn var(name: &str) -> Expression {
        Expression::Variable(name.to_string())
    }

    fn binary(op: &str, lhs: Expression, rhs: Expression) -> Expression {
        Expression::Binary(op.to_string(), Box::new(lhs), Box::new(rhs))
    }

    fn parse_expr_str(input: &str) -> PartialParseResult {
        Parser::default().parse_expr(&mut lex(input))
    }

    #[test]
    fn parse_expr_works() {
        let res = parse_expr_str("x + 1 * (2 - 3)").unwrap();
        let target = binary("+", var("x"), binary("*", lit(1.0), binary("-", lit(2.0), lit(3.0))));
        assert_eq!(res, target);
    }

    #[test]
    fn higher_precedence_nests_under_lower() {
        let res = parse_expr_str("1 + 2 * 3").unwrap();
        assert_eq!(res, binary("+", lit(1.0), binary("*", lit(2.0), lit(3.0))));
    }

    #[test]
    fn equal_precedence_is_left_associative() {
        let res = parse_expr_str("1 - 2 - 3").unwrap();
        assert_eq!(res, binary("-", binary("-", lit(1.0), lit(2.0)), lit(3.0)));
    }

    #[test]
    fn parens_override_precedence() {
        let res = parse_expr_str("(1 + 2) * 3").unwrap();
        assert_eq!(res, binary("*", binary("+", lit(1.0), lit(2.0)), lit(3.0)));
    }

    #[test]
    fn comparison_binds_loosest() {
        let res = parse_expr_str("a < b + 1").unwrap();
        assert_eq!(res, binary("<", var("a"), binary("+", var("b"), lit(1.0))));
    }

    #[test]
    fn call_arguments_parse_as_expressions() {
        let res = parse_expr_str("foo(1, x + 2)").unwrap();
        let target = Expression::Call(
            "foo".to_string(),
            vec![lit(1.0), binary("+", var("x"), lit(2.0))],
        );
        assert_eq!(res, target);
    }

    #[test]
    fn call_without_arguments() {
        let res = parse_expr_str("foo()").unwrap();
        assert_eq!(res, Expression::Call("foo".to_string(), Vec::new()));
    }

    #[test]
    fn definition_works() {
        let parser = Parser::default();
        let nodes = parser.parse_str("def average(x y) (x + y) * 5").unwrap();
        let target = ASTNode::Function(Function {
            prototype: Prototype {
                name: "average".to_string(),
                args: vec!["x".to_string(), "y".to_string()],
            },
            body: binary("*", binary("+", var("x"), var("y")), lit(5.0)),
        });
        assert_eq!(nodes, vec![target]);
    }

    #[test]
    fn extern_works() {
        let parser = Parser::default();
        let nodes = parser.parse_str("extern sin(x);").unwrap();
        let target = ASTNode::Extern(Prototype {
            name: "sin".to_string(),
            args: vec!["x".to_string()],
        });
        assert_eq!(nodes, vec![target]);
    }

    #[test]
    fn top_level_expression_gets_anonymous_wrapper() {
        let parser = Parser::default();
        let nodes = parser.parse_str("1 + 2;").unwrap();
        match &nodes[0] {
            ASTNode::Function(function) => {
                assert_eq!(function.prototype.name, ANONYMOUS_NAME);
                assert!(function.prototype.args.is_empty());
                assert_eq!(function.body, binary("+", lit(1.0), lit(2.0)));
            }
            node => panic!("expected an anonymous function, got {:?}", node),
        }
    }

    #[test]
    fn missing_close_paren_is_an_error() {
        let res = parse_expr_str("(1 + 2");
        assert_eq!(
            res,
            Err(ParserError::Expected {
                expected: "')'",
                found: "end of input".to_string(),
            })
        );
    }

    #[test]
    fn operator_is_not_an_expression() {
        let res = parse_expr_str("+");
        assert_eq!(
            res,
            Err(ParserError::ExpectedExpression("'+'".to_string()))
        );
    }

    #[test]
    fn prototype_without_parens_is_an_error() {
        let parser = Parser::default();
        let res = parser.parse_str("def foo x");
        assert_eq!(
            res,
            Err(ParserError::Expected {
                expected: "'(' in prototype",
                found: "identifier 'x'".to_string(),
            })
        );
    }

    #[test]
    fn failed_parse_leaves_offending_token() {
        let parser = Parser::default();
        let mut input = lex("def bad(;");
        assert!(parser.parse_definition(&mut input).is_err());
        assert_eq!(input.last(), Some(&Token::Delimiter));
    }
}
