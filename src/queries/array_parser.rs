use std::{iter::Peekable, str::Chars};

use crate::queries::error::{QueryError, QueryResult};

/// Decodes the text form of `array_agg(ROW(...))`, e.g. `{"(1,Captain)","(2,Officer)"}`.
///
/// Empty positions become `None`; rows where every position is empty are dropped,
/// which is what a LEFT JOIN without matches aggregates into.
pub fn parse_postgres_row_array(text: &str) -> QueryResult<Vec<Vec<Option<String>>>> {
    let body = text
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| malformed(0, text))?;

    let mut rows = Vec::new();
    let mut chars = body.char_indices().peekable();

    while let Some(&(start, first)) = chars.peek() {
        let element = if first == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, escaped)) => value.push(escaped),
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(malformed(start + 1, text));
            }
            Some(value)
        } else {
            let mut value = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            (!value.eq_ignore_ascii_case("NULL")).then_some(value)
        };

        if let Some(element) = element {
            let row = parse_record(&element).ok_or_else(|| malformed(start + 1, text))?;
            if row.iter().any(Option::is_some) {
                rows.push(row);
            }
        }

        match chars.next() {
            None => break,
            Some((_, ',')) => {}
            Some((pos, _)) => return Err(malformed(pos + 1, text)),
        }
    }

    Ok(rows)
}

fn parse_record(element: &str) -> Option<Vec<Option<String>>> {
    let inner = element.strip_prefix('(')?.strip_suffix(')')?;
    let mut chars = inner.chars().peekable();
    let mut fields = Vec::new();

    loop {
        if chars.peek() == Some(&'"') {
            chars.next();
            fields.push(Some(read_quoted(&mut chars)?));
        } else {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                chars.next();
                if c == '\\' {
                    value.push(chars.next()?);
                } else {
                    value.push(c);
                }
            }
            fields.push((!value.is_empty()).then_some(value));
        }

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => return None,
        }
    }

    Some(fields)
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut value = String::new();
    loop {
        match chars.next()? {
            '"' if chars.peek() == Some(&'"') => {
                chars.next();
                value.push('"');
            }
            '"' => return Some(value),
            '\\' => value.push(chars.next()?),
            c => value.push(c),
        }
    }
}

fn malformed(position: usize, text: &str) -> QueryError {
    QueryError::MalformedArray {
        position,
        source_text: text.to_string(),
    }
}
