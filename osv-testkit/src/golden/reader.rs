//! Restricted reader for golden record text.
//!
//! Accepts Python-style literals (`None`, `True`, `False`, numbers, quoted
//! strings, `b'...'` bytes, lists, tuples, dicts) plus exactly two
//! constructors: `call[.attr...](...)` and `DatetimeWithNanoseconds(...)`.
//! Any other name is rejected; the reader never evaluates anything.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use super::value::{CallRecord, GoldenValue, Timestamp};

const MAX_DEPTH: usize = 128;
const UTC_TZINFO: &str = "datetime.timezone.utc";

/// Why a record could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The record names something outside the allowed vocabulary.
    #[error("line {line}, column {column}: '{name}' is not allowed in a golden record")]
    Rejected {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },
}

impl ParseError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Parse one golden record.
pub fn parse(text: &str) -> Result<GoldenValue, ParseError> {
    let mut parser = Parser {
        src: text,
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    let value = parser.expression()?;
    parser.skip_ws();
    if parser.pos < text.len() {
        return Err(parser.syntax("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        self.skip_ws();
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.syntax(format!("expected '{c}'")))
        }
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while !matches!(self.bump(), None | Some('\n')) {}
                }
                _ => break,
            }
        }
    }

    fn location(&self, offset: usize) -> (usize, usize) {
        let before = &self.src[..offset.min(self.src.len())];
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (line, column)
    }

    fn syntax(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self.location(self.pos);
        ParseError::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    fn rejected(&self, name: &str, at: usize) -> ParseError {
        let (line, column) = self.location(at);
        ParseError::Rejected {
            name: name.to_string(),
            line,
            column,
        }
    }

    fn expression(&mut self) -> Result<GoldenValue, ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.syntax("nesting too deep"));
        }
        let value = self.atom();
        self.depth -= 1;
        value
    }

    fn atom(&mut self) -> Result<GoldenValue, ParseError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.syntax("unexpected end of input")),
            Some('[') => {
                self.bump();
                let (items, _) = self.sequence(']')?;
                Ok(GoldenValue::List(items))
            }
            Some('(') => {
                self.bump();
                let (mut items, trailing_comma) = self.sequence(')')?;
                // `(x)` is grouping; `(x,)` and `()` are tuples.
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(GoldenValue::Tuple(items))
                }
            }
            Some('{') => {
                self.bump();
                self.dict()
            }
            Some('\'' | '"') => self.strings(),
            Some('b' | 'B') if matches!(self.rest()[1..].chars().next(), Some('\'' | '"')) => {
                self.bump();
                let quote = self.bump().unwrap_or('\'');
                Ok(GoldenValue::Bytes(self.bytes_body(quote)?))
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.name(),
            Some(c) => Err(self.syntax(format!("unexpected character '{c}'"))),
        }
    }

    /// Comma-separated values up to `close`; reports whether a trailing comma
    /// was present.
    fn sequence(&mut self, close: char) -> Result<(Vec<GoldenValue>, bool), ParseError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.expression()?);
            self.skip_ws();
            if self.eat(',') {
                trailing_comma = true;
                continue;
            }
            trailing_comma = false;
            self.expect(close)?;
            return Ok((items, trailing_comma));
        }
    }

    fn dict(&mut self) -> Result<GoldenValue, ParseError> {
        let mut map = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Ok(GoldenValue::Dict(map));
            }
            let key = self.expression()?;
            self.skip_ws();
            if !self.eat(':') {
                return Err(self.syntax("expected ':' in dict (set literals are not supported)"));
            }
            let value = self.expression()?;
            map.insert(key, value);
            self.skip_ws();
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(GoldenValue::Dict(map));
            }
        }
    }

    /// One or more adjacent string literals, concatenated.
    fn strings(&mut self) -> Result<GoldenValue, ParseError> {
        let mut out = String::new();
        while let Some(quote @ ('\'' | '"')) = self.peek() {
            self.bump();
            self.string_body(quote, &mut out)?;
            self.skip_ws();
        }
        Ok(GoldenValue::Str(out))
    }

    fn string_body(&mut self, quote: char, out: &mut String) -> Result<(), ParseError> {
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.syntax("unterminated string")),
                Some(c) if c == quote => return Ok(()),
                Some('\\') => {
                    let c = self.escape(true)?;
                    out.push(c);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn bytes_body(&mut self, quote: char) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.syntax("unterminated bytes literal")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let c = self.escape(false)?;
                    // Bytes escapes only ever produce values below 0x100.
                    out.push(c as u32 as u8);
                }
                Some(c) if c.is_ascii() => out.push(c as u8),
                Some(c) => return Err(self.syntax(format!("non-ASCII character '{c}' in bytes"))),
            }
        }
    }

    fn escape(&mut self, unicode: bool) -> Result<char, ParseError> {
        let c = self.bump().ok_or_else(|| self.syntax("unterminated escape"))?;
        let decoded = match c {
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            'x' => self.hex_escape(2)?,
            'u' if unicode => self.hex_escape(4)?,
            'U' if unicode => self.hex_escape(8)?,
            other => return Err(self.syntax(format!("unsupported escape '\\{other}'"))),
        };
        Ok(decoded)
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, ParseError> {
        let hex = self.rest().get(..digits).unwrap_or("");
        let code = Some(hex)
            .filter(|h| h.len() == digits && h.chars().all(|c| c.is_ascii_hexdigit()))
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .ok_or_else(|| self.syntax("invalid hex escape"))?;
        let c = char::from_u32(code).ok_or_else(|| self.syntax("escape is not a valid character"))?;
        self.pos += digits;
        Ok(c)
    }

    fn number(&mut self) -> Result<GoldenValue, ParseError> {
        let start = self.pos;
        let negative = self.eat('-');
        if !negative {
            self.eat('+');
        }
        if self.rest().starts_with("inf") {
            self.pos += 3;
            return Ok(GoldenValue::Float(if negative {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            }));
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('+' | '-')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }
        let literal: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        if is_float {
            literal
                .parse::<f64>()
                .map(GoldenValue::Float)
                .map_err(|_| self.syntax(format!("invalid float '{literal}'")))
        } else {
            literal
                .parse::<i64>()
                .map(GoldenValue::Int)
                .map_err(|_| self.syntax(format!("invalid or out-of-range integer '{literal}'")))
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    /// A dotted name such as `call.a.b` or `datetime.timezone.utc`.
    fn dotted_name(&mut self) -> Vec<&'a str> {
        let mut parts = vec![self.identifier()];
        loop {
            let save = self.pos;
            self.skip_ws();
            if self.eat('.') {
                self.skip_ws();
                let part = self.identifier();
                if !part.is_empty() {
                    parts.push(part);
                    continue;
                }
            }
            self.pos = save;
            return parts;
        }
    }

    fn name(&mut self) -> Result<GoldenValue, ParseError> {
        let start = self.pos;
        let parts = self.dotted_name();
        let dotted = parts.join(".");
        match parts.as_slice() {
            ["None"] => Ok(GoldenValue::None),
            ["True"] => Ok(GoldenValue::Bool(true)),
            ["False"] => Ok(GoldenValue::Bool(false)),
            ["nan"] => Ok(GoldenValue::Float(f64::NAN)),
            ["inf"] => Ok(GoldenValue::Float(f64::INFINITY)),
            ["call", path @ ..] => {
                let path = path.iter().map(|s| s.to_string()).collect();
                self.call(path, start)
            }
            ["DatetimeWithNanoseconds"] => self.datetime(),
            _ => Err(self.rejected(&dotted, start)),
        }
    }

    fn arguments(&mut self, accepts_tzinfo: bool) -> Result<Arguments, ParseError> {
        self.expect('(')?;
        let mut parsed = Arguments::default();
        loop {
            self.skip_ws();
            if self.eat(')') {
                return Ok(parsed);
            }
            let save = self.pos;
            let ident = self.identifier();
            self.skip_ws();
            if !ident.is_empty() && self.peek() == Some('=') {
                self.bump();
                if accepts_tzinfo && ident == "tzinfo" {
                    parsed.utc = self.tzinfo()?;
                } else {
                    let value = self.expression()?;
                    parsed.kwargs.push((ident.to_string(), value, save));
                }
            } else {
                self.pos = save;
                if !parsed.kwargs.is_empty() {
                    return Err(self.syntax("positional argument follows keyword argument"));
                }
                parsed.args.push(self.expression()?);
            }
            self.skip_ws();
            if !self.eat(',') {
                self.expect(')')?;
                return Ok(parsed);
            }
        }
    }

    /// `datetime.timezone.utc` or `None`; true for UTC.
    fn tzinfo(&mut self) -> Result<bool, ParseError> {
        self.skip_ws();
        let at = self.pos;
        let parts = self.dotted_name();
        match parts.as_slice() {
            ["datetime", "timezone", "utc"] => Ok(true),
            ["None"] => Ok(false),
            [""] => Err(self.syntax(format!("tzinfo must be {UTC_TZINFO} or None"))),
            _ => Err(self.rejected(&parts.join("."), at)),
        }
    }

    fn call(&mut self, path: Vec<String>, start: usize) -> Result<GoldenValue, ParseError> {
        self.skip_ws();
        if self.peek() != Some('(') {
            return Err(self.rejected(&format!("call.{}", path.join(".")), start));
        }
        let parsed = self.arguments(false)?;
        let mut record = CallRecord {
            path,
            args: parsed.args,
            kwargs: BTreeMap::new(),
        };
        for (name, value, at) in parsed.kwargs {
            if record.kwargs.contains_key(&name) {
                self.pos = at;
                return Err(self.syntax(format!("duplicate keyword argument '{name}'")));
            }
            record.kwargs.insert(name, value);
        }
        Ok(GoldenValue::Call(record))
    }

    fn datetime(&mut self) -> Result<GoldenValue, ParseError> {
        let parsed = self.arguments(true)?;
        if !(3..=7).contains(&parsed.args.len()) {
            return Err(self.syntax("DatetimeWithNanoseconds takes 3 to 7 positional arguments"));
        }
        let mut fields = [0i64, 1, 1, 0, 0, 0, 0];
        for (slot, arg) in fields.iter_mut().zip(&parsed.args) {
            match arg {
                GoldenValue::Int(n) => *slot = *n,
                other => {
                    return Err(self.syntax(format!(
                        "DatetimeWithNanoseconds arguments must be int, got {}",
                        other.kind()
                    )));
                }
            }
        }
        let [year, month, day, hour, minute, second, microsecond] = fields;
        let mut nanos = microsecond.checked_mul(1000);

        for (name, value, at) in parsed.kwargs {
            match (name.as_str(), value) {
                ("nanosecond", GoldenValue::Int(n)) => nanos = Some(n),
                ("nanosecond", other) => {
                    self.pos = at;
                    return Err(self.syntax(format!("nanosecond must be int, got {}", other.kind())));
                }
                (other, _) => {
                    return Err(self.rejected(&format!("DatetimeWithNanoseconds({other}=...)"), at));
                }
            }
        }

        let invalid = || self.syntax("DatetimeWithNanoseconds fields are out of range");
        let to_u32 = |v: i64| u32::try_from(v).ok();
        let date = i32::try_from(year)
            .ok()
            .zip(to_u32(month).zip(to_u32(day)))
            .and_then(|(y, (m, d))| NaiveDate::from_ymd_opt(y, m, d))
            .ok_or_else(invalid)?;
        let time = to_u32(hour)
            .zip(to_u32(minute))
            .zip(to_u32(second))
            .zip(nanos.and_then(to_u32).filter(|n| *n < 1_000_000_000))
            .and_then(|(((h, mi), s), ns)| NaiveTime::from_hms_nano_opt(h, mi, s, ns))
            .ok_or_else(invalid)?;
        Ok(GoldenValue::Datetime(Timestamp {
            naive: NaiveDateTime::new(date, time),
            utc: parsed.utc,
        }))
    }
}

/// Arguments of a constructor call, keyword values tagged with their offset.
#[derive(Default)]
struct Arguments {
    args: Vec<GoldenValue>,
    kwargs: Vec<(String, GoldenValue, usize)>,
    utc: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_literals() {
        assert_eq!(parse("None").unwrap(), GoldenValue::None);
        assert_eq!(parse(" True ").unwrap(), GoldenValue::Bool(true));
        assert_eq!(parse("-42").unwrap(), GoldenValue::Int(-42));
        assert_eq!(parse("1_000").unwrap(), GoldenValue::Int(1000));
        assert_eq!(parse("2.5e3").unwrap(), GoldenValue::Float(2500.0));
        assert_eq!(parse("'it\\'s'").unwrap(), GoldenValue::from("it's"));
        assert_eq!(parse("\"caf\\xe9 \\u2603\"").unwrap(), GoldenValue::from("café ☃"));
        assert_eq!(
            parse("b'\\x00ab'").unwrap(),
            GoldenValue::bytes(vec![0u8, b'a', b'b'])
        );
    }

    #[test]
    fn test_containers() {
        let value = parse("{'b': [1, 2,], 'a': (3,), 'c': (), 'd': (4)}").unwrap();
        let expected = GoldenValue::dict([
            ("a", GoldenValue::tuple([3])),
            ("b", GoldenValue::from(vec![1, 2])),
            ("c", GoldenValue::Tuple(vec![])),
            ("d", GoldenValue::Int(4)),
        ]);
        assert_eq!(value, expected);
    }

    #[test]
    fn test_adjacent_strings_concatenate() {
        let value = parse("('first half '\n 'second half')").unwrap();
        assert_eq!(value, GoldenValue::from("first half second half"));
    }

    #[test]
    fn test_call_records() {
        let value = parse("[call.publish('topic', data=b'x'), call()]").unwrap();
        assert_eq!(
            value,
            GoldenValue::from(vec![
                GoldenValue::Call(
                    CallRecord::new("publish")
                        .arg("topic")
                        .kwarg("data", GoldenValue::bytes(b"x".to_vec()))
                ),
                GoldenValue::Call(CallRecord::new("")),
            ])
        );
    }

    #[test]
    fn test_datetime_with_nanoseconds() {
        let value = parse(
            "DatetimeWithNanoseconds(2021, 1, 2, 3, 4, 5, 6, tzinfo=datetime.timezone.utc)",
        )
        .unwrap();
        let GoldenValue::Datetime(ts) = value else {
            panic!("expected datetime, got {value:?}");
        };
        assert!(ts.utc);
        assert_eq!(ts.naive.to_string(), "2021-01-02 03:04:05.000006");

        let value = parse("DatetimeWithNanoseconds(2021, 1, 1, 0, 0, nanosecond=7)").unwrap();
        let GoldenValue::Datetime(ts) = value else {
            panic!("expected datetime, got {value:?}");
        };
        assert!(!ts.utc);
        assert_eq!(ts.naive.nanosecond(), 7);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        for text in [
            "__import__('os').system('true')",
            "open('/etc/passwd')",
            "[1, eval('2')]",
            "call.x(datetime.timezone.utc)",
            "call.attr",
            "DatetimeWithNanoseconds(2021, 1, 1, fold=1)",
        ] {
            let err = parse(text).unwrap_err();
            assert!(err.is_rejection(), "{text}: {err}");
        }
    }

    #[test]
    fn test_syntax_errors_carry_location() {
        let err = parse("[1,\n  2 3]").unwrap_err();
        match err {
            ParseError::Syntax { line, column, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(parse("{1, 2}").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("99999999999999999999").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = "[".repeat(MAX_DEPTH + 1) + &"]".repeat(MAX_DEPTH + 1);
        assert!(matches!(parse(&deep), Err(ParseError::Syntax { .. })));
    }
}
