//! Command parser — tokenizes a client command line with a JSON-aware
//! pass-through for SEND payloads.
//!
//! Grammar: whitespace separates bare tokens (ASCII letters/digits only); a
//! double-quoted run is one token regardless of internal whitespace; a
//! brace-balanced run is one opaque token so JSON envelopes pass through
//! intact even when they contain spaces — this is what makes `SEND <payload>
//! TO <recipient>` yield exactly four tokens without the caller having to
//! quote an encrypted envelope.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid character '{0}'")]
    InvalidCharacter(char),
    #[error("unclosed quotation mark")]
    UnclosedQuote,
    #[error("unclosed brace")]
    UnclosedBrace,
}

/// Recognized post-auth verbs (case-insensitive on input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Send,
    To,
    Exit,
    GetUsers,
    Help,
    PubKey,
    GetKey,
}

pub fn recognize_verb(token: &str) -> Option<Verb> {
    match token.to_ascii_uppercase().as_str() {
        "SEND" => Some(Verb::Send),
        "TO" => Some(Verb::To),
        "EXIT" => Some(Verb::Exit),
        "GETUSERS" => Some(Verb::GetUsers),
        "HELP" => Some(Verb::Help),
        "PUBKEY" => Some(Verb::PubKey),
        "GETKEY" => Some(Verb::GetKey),
        _ => None,
    }
}

/// Tokenize a command line already stripped of framing.
pub fn parse(input: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            tokens.push(read_quoted(&mut chars)?);
            continue;
        }
        if c == '{' {
            tokens.push(read_braced(&mut chars)?);
            continue;
        }
        if c.is_ascii_alphanumeric() {
            let mut tok = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() {
                    tok.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(tok);
            continue;
        }
        return Err(ParseError::InvalidCharacter(c));
    }

    Ok(tokens)
}

fn read_quoted(chars: &mut Peekable<Chars>) -> Result<String, ParseError> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err(ParseError::UnclosedQuote),
            Some('"') => return Ok(out),
            Some('\\') => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(c) => {
                    out.push('\\');
                    out.push(c);
                }
                None => return Err(ParseError::UnclosedQuote),
            },
            Some(c) => out.push(c),
        }
    }
}

fn read_braced(chars: &mut Peekable<Chars>) -> Result<String, ParseError> {
    let mut out = String::new();
    let mut depth = 0i32;
    loop {
        match chars.next() {
            None => return Err(ParseError::UnclosedBrace),
            Some(c) => {
                out.push(c);
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(out);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Render tokens back to a command line, quoting (and escaping inner quotes
/// in) any token that isn't a bare alnum run or a brace-balanced JSON blob.
/// Used by the round-trip tests below.
pub fn render(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| render_token(t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_token(tok: &str) -> String {
    if tok.starts_with('{') && tok.ends_with('}') {
        tok.to_string()
    } else if !tok.is_empty() && tok.chars().all(|c| c.is_ascii_alphanumeric()) {
        tok.to_string()
    } else {
        let escaped = tok.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }
}
