use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Def,
    Extern,
    Delimiter,
    OpenParen,
    CloseParen,
    Comma,
    Ident(String),
    Operator(String),
    Number(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Def => write!(f, "'def'"),
            Token::Extern => write!(f, "'extern'"),
            Token::Delimiter => write!(f, "';'"),
            Token::OpenParen => write!(f, "'('"),
            Token::CloseParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Operator(op) => write!(f, "'{}'", op),
            Token::Number(value) => write!(f, "number {}", value),
        }
    }
}

lazy_static! {
    static ref IGNORE_RE: Regex = Regex::new(r"(?m)#.*$").unwrap();
    static ref TOKEN_RE: Regex = Regex::new(&[
        r"(?P<ident>\p{Alphabetic}\w*)",
        r"(?P<number>\d+\.?\d*)",
        r"(?P<delimiter>;)",
        r"(?P<oppar>\()",
        r"(?P<clpar>\))",
        r"(?P<comma>,)",
        // anything else that isn't whitespace passes through as a
        // one-character operator token; the parser decides whether it
        // means something
        r"(?P<operator>\S)",
    ].join("|"))
    .unwrap();
}

fn preprocess(input: &str) -> String {
    IGNORE_RE.replace_all(input, "").to_string()
}

/// lex the given input string - returns a stack, so first-on last-off
pub fn lex(input: &str) -> Vec<Token> {
    let preprocessed = preprocess(input);

    let mut res = Vec::new();
    for cap in TOKEN_RE.captures_iter(&preprocessed) {
        let token = if let Some(ident) = cap.name("ident") {
            match ident.as_str() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                text => Token::Ident(text.to_string()),
            }
        } else if let Some(number) = cap.name("number") {
            Token::Number(number.as_str().parse().expect("failed to parse number!"))
        } else if cap.name("delimiter").is_some() {
            Token::Delimiter
        } else if cap.name("oppar").is_some() {
            Token::OpenParen
        } else if cap.name("clpar").is_some() {
            Token::CloseParen
        } else if cap.name("comma").is_some() {
            Token::Comma
        } else if let Some(op) = cap.name("operator") {
            Token::Operator(op.as_str().to_string())
        } else {
            unreachable!("token regex matched without a capture group");
        };

        res.push(token);
    }
    res.reverse();
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ignore_works() {
        assert_eq!(preprocess("# somebody \na"), "\na");
    }

    #[test]
    fn lex_works() {
        let input = "def add(x y) x + 1.0;";
        let tokenized = [
            Token::Delimiter,
            Token::Number(1.0),
            Token::Operator("+".to_string()),
            Token::Ident("x".to_string()),
            Token::CloseParen,
            Token::Ident("y".to_string()),
            Token::Ident("x".to_string()),
            Token::OpenParen,
            Token::Ident("add".to_string()),
            Token::Def,
        ];
        assert_eq!(lex(input), tokenized);
    }

    #[test]
    fn keywords_need_exact_match() {
        let input = "define extern deff";
        let tokenized = [
            Token::Ident("deff".to_string()),
            Token::Extern,
            Token::Ident("define".to_string()),
        ];
        assert_eq!(lex(input), tokenized);
    }

    #[test]
    fn call_punctuation_works() {
        let input = "foo(1, 2)";
        let tokenized = [
            Token::CloseParen,
            Token::Number(2.0),
            Token::Comma,
            Token::Number(1.0),
            Token::OpenParen,
            Token::Ident("foo".to_string()),
        ];
        assert_eq!(lex(input), tokenized);
    }

    #[test]
    fn unknown_characters_become_operators() {
        let input = "a $ b";
        let tokenized = [
            Token::Ident("b".to_string()),
            Token::Operator("$".to_string()),
            Token::Ident("a".to_string()),
        ];
        assert_eq!(lex(input), tokenized);
    }
}
