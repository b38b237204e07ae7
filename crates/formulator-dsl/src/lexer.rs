//! Tokenizer for procedure text.
//!
//! Numbers, identifiers and punctuators are recognized with `nom`; string and
//! template literals are scanned by hand so unterminated literals can be
//! reported with a precise offset.

use crate::parser::ParseError;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, digit0, digit1, multispace0, one_of},
    combinator::{map, map_res, opt, recognize},
    sequence::{pair, tuple},
    IResult,
};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Template(Vec<TemplatePiece>),
    Ident(String),
    Punct(&'static str),
}

/// A piece of a template literal: raw text or the source of an embedded
/// `${...}` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePiece {
    Text(String),
    Expr { source: String, offset: usize },
}

/// A token with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(self, Token::Punct(q) if *q == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(self, Token::Ident(n) if n == name)
    }

    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string {s:?}"),
            Token::Template(_) => "template literal".to_string(),
            Token::Ident(name) => format!("'{name}'"),
            Token::Punct(p) => format!("'{p}'"),
        }
    }
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = source;

    loop {
        rest = skip_trivia(source, rest)?;
        if rest.is_empty() {
            break;
        }
        let offset = source.len() - rest.len();

        if rest.starts_with('"') || rest.starts_with('\'') {
            let (next, token) = scan_string(rest, offset)?;
            tokens.push(Spanned { token, offset });
            rest = next;
            continue;
        }
        if rest.starts_with('`') {
            let (next, token) = scan_template(rest, offset)?;
            tokens.push(Spanned { token, offset });
            rest = next;
            continue;
        }

        match alt((number, identifier, punct))(rest) {
            Ok((next, token)) => {
                tokens.push(Spanned { token, offset });
                rest = next;
            }
            Err(_) => {
                return Err(ParseError::UnexpectedChar {
                    offset,
                    found: rest.chars().next().unwrap_or('\0'),
                })
            }
        }
    }

    Ok(tokens)
}

fn skip_trivia<'a>(source: &str, mut rest: &'a str) -> Result<&'a str, ParseError> {
    loop {
        let trimmed: IResult<&str, &str> = multispace0(rest);
        if let Ok((next, _)) = trimmed {
            rest = next;
        }
        if let Some(after) = rest.strip_prefix("//") {
            rest = match after.find('\n') {
                Some(idx) => &after[idx + 1..],
                None => "",
            };
            continue;
        }
        if let Some(after) = rest.strip_prefix("/*") {
            match after.find("*/") {
                Some(idx) => {
                    rest = &after[idx + 2..];
                    continue;
                }
                None => {
                    return Err(ParseError::Unterminated {
                        what: "comment",
                        offset: source.len() - rest.len(),
                    })
                }
            }
        }
        return Ok(rest);
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn identifier(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(take_while1(is_ident_start), take_while(is_ident_continue))),
        |name: &str| Token::Ident(name.to_string()),
    )(input)
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

fn number(input: &str) -> IResult<&str, Token> {
    map(
        map_res(
            alt((
                recognize(tuple((digit1, opt(pair(pchar('.'), digit0)), opt(exponent)))),
                recognize(tuple((pchar('.'), digit1, opt(exponent)))),
            )),
            |text: &str| text.parse::<f64>(),
        ),
        Token::Number,
    )(input)
}

const PUNCTUATORS: &[&str] = &[
    "===", "!==", "**", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+=", "-=", "*=",
    "/=", "+", "-", "*", "/", "%", "<", ">", "!", "=", "?", ":", ".", ",", ";", "(", ")", "[",
    "]", "{", "}",
];

fn punct(input: &str) -> IResult<&str, Token> {
    for p in PUNCTUATORS {
        let parsed: IResult<&str, &str> = tag(*p)(input);
        if let Ok((rest, _)) = parsed {
            return Ok((rest, Token::Punct(*p)));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Tag,
    )))
}

fn scan_escape(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Option<char> {
    let (_, c) = chars.next()?;
    Some(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    })
}

fn scan_string(input: &str, offset: usize) -> Result<(&str, Token), ParseError> {
    let mut chars = input.char_indices().peekable();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => {
            return Err(ParseError::Unterminated {
                what: "string",
                offset,
            })
        }
    };
    let mut text = String::new();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match scan_escape(&mut chars) {
                Some(escaped) => text.push(escaped),
                None => break,
            },
            '\n' => break,
            c if c == quote => {
                return Ok((&input[idx + c.len_utf8()..], Token::Str(text)));
            }
            c => text.push(c),
        }
    }

    Err(ParseError::Unterminated {
        what: "string",
        offset,
    })
}

fn scan_template(input: &str, offset: usize) -> Result<(&str, Token), ParseError> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = input.char_indices().peekable();
    chars.next(); // opening backtick

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match scan_escape(&mut chars) {
                Some(escaped) => text.push(escaped),
                None => break,
            },
            '`' => {
                if !text.is_empty() {
                    pieces.push(TemplatePiece::Text(std::mem::take(&mut text)));
                }
                return Ok((&input[idx + 1..], Token::Template(pieces)));
            }
            '$' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                if !text.is_empty() {
                    pieces.push(TemplatePiece::Text(std::mem::take(&mut text)));
                }
                let start = idx + 2;
                let mut depth = 1usize;
                let mut end = None;
                for (j, d) in chars.by_ref() {
                    match d {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(j);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                match end {
                    Some(end) => pieces.push(TemplatePiece::Expr {
                        source: input[start..end].to_string(),
                        offset: offset + start,
                    }),
                    None => break,
                }
            }
            c => text.push(c),
        }
    }

    Err(ParseError::Unterminated {
        what: "template literal",
        offset,
    })
}
