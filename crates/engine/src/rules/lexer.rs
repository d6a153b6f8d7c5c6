use super::RuleError;

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Splits an expression into tokens, tagging each with its byte offset.
pub(super) fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, RuleError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let two = |t: Token| (t, 2usize);
        let one = |t: Token| (t, 1usize);
        let simple = match (c, next) {
            ('&', Some('&')) => Some(two(Token::AndAnd)),
            ('|', Some('|')) => Some(two(Token::OrOr)),
            ('=', Some('=')) => {
                // `===` is accepted as an alias of `==`.
                if chars.get(i + 2).map(|(_, c)| *c) == Some('=') {
                    Some((Token::EqEq, 3))
                } else {
                    Some(two(Token::EqEq))
                }
            }
            ('!', Some('=')) => {
                if chars.get(i + 2).map(|(_, c)| *c) == Some('=') {
                    Some((Token::NotEq, 3))
                } else {
                    Some(two(Token::NotEq))
                }
            }
            ('<', Some('=')) => Some(two(Token::LtEq)),
            ('>', Some('=')) => Some(two(Token::GtEq)),
            ('<', _) => Some(one(Token::Lt)),
            ('>', _) => Some(one(Token::Gt)),
            ('!', _) => Some(one(Token::Bang)),
            ('.', n) if !n.is_some_and(|n| n.is_ascii_digit()) => Some(one(Token::Dot)),
            (',', _) => Some(one(Token::Comma)),
            ('(', _) => Some(one(Token::LParen)),
            (')', _) => Some(one(Token::RParen)),
            ('[', _) => Some(one(Token::LBracket)),
            (']', _) => Some(one(Token::RBracket)),
            ('?', _) => Some(one(Token::Question)),
            (':', _) => Some(one(Token::Colon)),
            ('+', _) => Some(one(Token::Plus)),
            ('-', _) => Some(one(Token::Minus)),
            ('*', _) => Some(one(Token::Star)),
            ('/', _) => Some(one(Token::Slash)),
            ('%', _) => Some(one(Token::Percent)),
            _ => None,
        };
        if let Some((token, len)) = simple {
            tokens.push((token, pos));
            i += len;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            let mut seen_dot = false;
            while i < chars.len() {
                let d = chars[i].1;
                if d.is_ascii_digit() {
                    i += 1;
                } else if d == '.' && !seen_dot {
                    seen_dot = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let number = text.parse::<f64>().map_err(|_| RuleError::Parse {
                position: pos,
                message: format!("invalid number literal {text:?}"),
            })?;
            tokens.push((Token::Number(number), pos));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut text = String::new();
            let mut closed = false;
            while i < chars.len() {
                let d = chars[i].1;
                if d == '\\' {
                    let escaped = chars.get(i + 1).map(|(_, c)| *c).ok_or(RuleError::Parse {
                        position: chars[i].0,
                        message: "unterminated escape".to_string(),
                    })?;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 2;
                } else if d == quote {
                    closed = true;
                    i += 1;
                    break;
                } else {
                    text.push(d);
                    i += 1;
                }
            }
            if !closed {
                return Err(RuleError::Parse {
                    position: pos,
                    message: "unterminated string literal".to_string(),
                });
            }
            tokens.push((Token::Str(text), pos));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() {
                let d = chars[i].1;
                if d.is_alphanumeric() || d == '_' || d == '$' {
                    i += 1;
                } else {
                    break;
                }
            }
            let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let token = match word.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" | "undefined" => Token::Null,
                _ => Token::Ident(word),
            };
            tokens.push((token, pos));
            continue;
        }

        return Err(RuleError::Parse {
            position: pos,
            message: format!("unexpected character {c:?}"),
        });
    }

    Ok(tokens)
}
