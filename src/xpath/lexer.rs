//! XPath tokenizer
//!
//! Whether `*` is a wildcard or a multiplication, and whether a name such as
//! `div` is an operator, depends on the preceding token: after an operand
//! they are operators, anywhere else they start a name test.

use std::fmt;

use super::parsers::XPathParseError;
use crate::names::{is_name_char, is_name_start_char, name_prefix_len};

/// XPath token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal
    Number(f64),
    /// String literal, quotes removed
    Literal(String),
    /// `$name`
    Variable(String),
    /// A (possibly prefixed) name
    Name(String),
    /// `*`, `prefix:*` or `*:local` in name-test position
    Wildcard {
        /// Prefix of `prefix:*`
        prefix: Option<String>,
        /// Local name of `*:local`
        local: Option<String>,
    },
    /// Operator name such as `and`, `div` or `return`
    OperatorName(String),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `.`
    Dot,
    /// `..`
    DotDot,
    /// `@`
    At,
    /// `,`
    Comma,
    /// `::`
    ColonColon,
    /// `/`
    Slash,
    /// `//`
    DoubleSlash,
    /// `|`
    Pipe,
    /// `||`
    Concat,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*` as multiplication
    Multiply,
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `<<`
    Precedes,
    /// `>>`
    Follows,
    /// `!`, the simple map operator
    Bang,
    /// `?` occurrence indicator
    Question,
}

const OPERATOR_NAMES: &[&str] = &[
    "and", "or", "mod", "div", "idiv", "union", "intersect", "except", "eq", "ne", "lt", "le",
    "gt", "ge", "to", "return", "satisfies", "then", "else", "in", "is", "instance", "treat",
    "castable", "cast",
];

impl Token {
    /// Whether a `*` or name after this token is an operator
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Number(_)
                | Token::Literal(_)
                | Token::Variable(_)
                | Token::Name(_)
                | Token::Wildcard { .. }
                | Token::RParen
                | Token::RBracket
                | Token::Dot
                | Token::DotDot
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Literal(s) => write!(f, "'{}'", s),
            Token::Variable(name) => write!(f, "${}", name),
            Token::Name(name) | Token::OperatorName(name) => write!(f, "{}", name),
            Token::Wildcard { prefix, local } => match (prefix, local) {
                (Some(prefix), _) => write!(f, "{}:*", prefix),
                (None, Some(local)) => write!(f, "*:{}", local),
                (None, None) => write!(f, "*"),
            },
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Dot => write!(f, "."),
            Token::DotDot => write!(f, ".."),
            Token::At => write!(f, "@"),
            Token::Comma => write!(f, ","),
            Token::ColonColon => write!(f, "::"),
            Token::Slash => write!(f, "/"),
            Token::DoubleSlash => write!(f, "//"),
            Token::Pipe => write!(f, "|"),
            Token::Concat => write!(f, "||"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Multiply => write!(f, "*"),
            Token::Eq => write!(f, "="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::Precedes => write!(f, "<<"),
            Token::Follows => write!(f, ">>"),
            Token::Bang => write!(f, "!"),
            Token::Question => write!(f, "?"),
        }
    }
}

/// Token with its byte offset in the expression
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token
    pub token: Token,
    /// Byte offset
    pub offset: usize,
}

/// Split an expression into tokens
pub fn tokenize(text: &str) -> Result<Vec<Spanned>, XPathParseError> {
    let mut tokens: Vec<Spanned> = Vec::new();
    let bytes = text.as_bytes();
    let mut pos = 0;

    while pos < text.len() {
        let rest = &text[pos..];
        let Some(c) = rest.chars().next() else { break };

        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        if rest.starts_with("(:") {
            pos += skip_comment(rest).ok_or(XPathParseError::UnexpectedEnd)?;
            continue;
        }

        let operator_context = tokens.last().map_or(false, |t| t.token.ends_operand());
        let start = pos;

        let (token, len) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            ',' => (Token::Comma, 1),
            '@' => (Token::At, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '=' => (Token::Eq, 1),
            '|' if rest.starts_with("||") => (Token::Concat, 2),
            '|' => (Token::Pipe, 1),
            '/' if rest.starts_with("//") => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '!' if rest.starts_with("!=") => (Token::NotEq, 2),
            '!' => (Token::Bang, 1),
            '?' => (Token::Question, 1),
            '<' if rest.starts_with("<<") => (Token::Precedes, 2),
            '<' if rest.starts_with("<=") => (Token::LtEq, 2),
            '<' => (Token::Lt, 1),
            '>' if rest.starts_with(">>") => (Token::Follows, 2),
            '>' if rest.starts_with(">=") => (Token::GtEq, 2),
            '>' => (Token::Gt, 1),
            ':' if rest.starts_with("::") => (Token::ColonColon, 2),
            '.' if rest.starts_with("..") => (Token::DotDot, 2),
            '.' if bytes.get(pos + 1).map_or(false, u8::is_ascii_digit) => lex_number(rest),
            '.' => (Token::Dot, 1),
            '0'..='9' => lex_number(rest),
            '"' | '\'' => lex_literal(rest, c)?,
            '$' => {
                let after = rest[1..].trim_start();
                let skipped = rest.len() - 1 - after.len();
                let len = name_prefix_len(after);
                if len == 0 {
                    return Err(XPathParseError::InvalidSyntax(format!(
                        "expected a variable name at offset {}",
                        pos
                    )));
                }
                (Token::Variable(after[..len].to_string()), 1 + skipped + len)
            }
            '*' if operator_context => (Token::Multiply, 1),
            '*' => {
                // `*:local`
                let after = &rest[1..];
                if after.starts_with(':') && !after.starts_with("::") {
                    let local_len = local_name_len(&after[1..]);
                    if local_len == 0 {
                        return Err(XPathParseError::InvalidSyntax(format!(
                            "expected a local name after '*:' at offset {}",
                            pos
                        )));
                    }
                    let local = after[1..1 + local_len].to_string();
                    (
                        Token::Wildcard {
                            prefix: None,
                            local: Some(local),
                        },
                        2 + local_len,
                    )
                } else {
                    (
                        Token::Wildcard {
                            prefix: None,
                            local: None,
                        },
                        1,
                    )
                }
            }
            c if is_name_start_char(c) => lex_name(rest, operator_context),
            other => {
                return Err(XPathParseError::InvalidSyntax(format!(
                    "unexpected character '{}' at offset {}",
                    other, pos
                )))
            }
        };

        tokens.push(Spanned { token, offset: start });
        pos += len;
    }

    Ok(tokens)
}

fn local_name_len(text: &str) -> usize {
    let mut end = 0;
    for (idx, c) in text.char_indices() {
        let ok = if idx == 0 { is_name_start_char(c) } else { is_name_char(c) };
        if !ok {
            break;
        }
        end = idx + c.len_utf8();
    }
    end
}

fn lex_name(rest: &str, operator_context: bool) -> (Token, usize) {
    let local_len = local_name_len(rest);
    let name = &rest[..local_len];

    if operator_context && OPERATOR_NAMES.contains(&name) {
        return (Token::OperatorName(name.to_string()), local_len);
    }

    let after = &rest[local_len..];
    if after.starts_with(':') && !after.starts_with("::") {
        if after[1..].starts_with('*') {
            return (
                Token::Wildcard {
                    prefix: Some(name.to_string()),
                    local: None,
                },
                local_len + 2,
            );
        }
        let second = local_name_len(&after[1..]);
        if second > 0 {
            let len = local_len + 1 + second;
            return (Token::Name(rest[..len].to_string()), len);
        }
    }

    (Token::Name(name.to_string()), local_len)
}

fn lex_number(rest: &str) -> (Token, usize) {
    let bytes = rest.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            end = exp;
        }
    }
    let value = rest[..end].parse::<f64>().unwrap_or(f64::NAN);
    (Token::Number(value), end)
}

fn lex_literal(rest: &str, quote: char) -> Result<(Token, usize), XPathParseError> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1).peekable();

    while let Some((idx, c)) = chars.next() {
        if c == quote {
            // doubled quote is an escaped quote
            if matches!(chars.peek(), Some(&(_, next)) if next == quote) {
                chars.next();
                value.push(quote);
                continue;
            }
            return Ok((Token::Literal(value), idx + 1));
        }
        value.push(c);
    }

    Err(XPathParseError::InvalidSyntax(
        "unterminated string literal".to_string(),
    ))
}

/// Length of a possibly nested `(: ... :)` comment at the start of `rest`
fn skip_comment(rest: &str) -> Option<usize> {
    let mut depth = 0;
    let mut pos = 0;
    while pos < rest.len() {
        let tail = &rest[pos..];
        if tail.starts_with("(:") {
            depth += 1;
            pos += 2;
        } else if tail.starts_with(":)") {
            depth -= 1;
            pos += 2;
            if depth == 0 {
                return Some(pos);
            }
        } else {
            pos += tail.chars().next().map_or(1, char::len_utf8);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_star_disambiguation() {
        assert_eq!(
            tokens("* * 2"),
            vec![
                Token::Wildcard {
                    prefix: None,
                    local: None
                },
                Token::Multiply,
                Token::Number(2.0)
            ]
        );
        assert_eq!(
            tokens("c:*"),
            vec![Token::Wildcard {
                prefix: Some("c".into()),
                local: None
            }]
        );
    }

    #[test]
    fn test_operator_names() {
        assert_eq!(
            tokens("div div div"),
            vec![
                Token::Name("div".into()),
                Token::OperatorName("div".into()),
                Token::Name("div".into())
            ]
        );
        assert_eq!(
            tokens("@a and not(b)"),
            vec![
                Token::At,
                Token::Name("a".into()),
                Token::OperatorName("and".into()),
                Token::Name("not".into()),
                Token::LParen,
                Token::Name("b".into()),
                Token::RParen
            ]
        );
    }

    #[test]
    fn test_names_and_axes() {
        assert_eq!(
            tokens("child::c:item[@max-weight]"),
            vec![
                Token::Name("child".into()),
                Token::ColonColon,
                Token::Name("c:item".into()),
                Token::LBracket,
                Token::At,
                Token::Name("max-weight".into()),
                Token::RBracket
            ]
        );
    }

    #[test]
    fn test_literals_numbers_variables() {
        assert_eq!(
            tokens(r#"'it''s' "x" .5 1.25e2 $max-weight"#),
            vec![
                Token::Literal("it's".into()),
                Token::Literal("x".into()),
                Token::Number(0.5),
                Token::Number(125.0),
                Token::Variable("max-weight".into())
            ]
        );
    }

    #[test]
    fn test_comments_and_concat() {
        assert_eq!(
            tokens("a (: note (: nested :) :) || b"),
            vec![Token::Name("a".into()), Token::Concat, Token::Name("b".into())]
        );
    }

    #[test]
    fn test_xpath2_operators() {
        assert_eq!(
            tokens("$a << $b, a>>b"),
            vec![
                Token::Variable("a".into()),
                Token::Precedes,
                Token::Variable("b".into()),
                Token::Comma,
                Token::Name("a".into()),
                Token::Follows,
                Token::Name("b".into())
            ]
        );
        assert_eq!(
            tokens("@w cast as xs:integer?"),
            vec![
                Token::At,
                Token::Name("w".into()),
                Token::OperatorName("cast".into()),
                Token::Name("as".into()),
                Token::Name("xs:integer".into()),
                Token::Question
            ]
        );
        assert_eq!(
            tokens("a ! b != c"),
            vec![
                Token::Name("a".into()),
                Token::Bang,
                Token::Name("b".into()),
                Token::NotEq,
                Token::Name("c".into())
            ]
        );
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a # b").is_err());
        assert!(tokenize("a ; b").is_err());
        assert!(tokenize("$").is_err());
        assert!(tokenize("a (: open").is_err());
    }
}
