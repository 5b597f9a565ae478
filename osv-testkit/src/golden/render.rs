//! Deterministic text form of golden values.
//!
//! Output reads back through [`super::reader::parse`] to an equal value.
//! Anything that fits in [`WIDTH`] columns stays on one line; larger
//! containers put one element per line, indented four spaces, with a
//! trailing comma.

use std::fmt::Write;

use chrono::{Datelike, Timelike};

use super::value::{CallRecord, GoldenValue, Timestamp, fold_leap_second};

pub const WIDTH: usize = 80;
const INDENT: usize = 4;

/// Render `value` as golden record text.
pub fn render(value: &GoldenValue) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0);
    out
}

/// Single-line form.
pub fn render_compact(value: &GoldenValue) -> String {
    let mut out = String::new();
    write_compact(&mut out, value);
    out
}

fn current_column(out: &str) -> usize {
    let line_start = out.rfind('\n').map_or(0, |i| i + 1);
    out[line_start..].chars().count()
}

fn write_value(out: &mut String, value: &GoldenValue, indent: usize) {
    let compact = render_compact(value);
    if current_column(out) + compact.chars().count() <= WIDTH || !is_container(value) {
        out.push_str(&compact);
        return;
    }
    let pad = " ".repeat(indent + INDENT);
    let close_pad = " ".repeat(indent);
    match value {
        GoldenValue::List(items) => write_block(out, "[", "]", items, indent),
        GoldenValue::Tuple(items) => write_block(out, "(", ")", items, indent),
        GoldenValue::Dict(map) => {
            out.push_str("{\n");
            for (key, item) in map {
                out.push_str(&pad);
                write_value(out, key, indent + INDENT);
                out.push_str(": ");
                write_value(out, item, indent + INDENT);
                out.push_str(",\n");
            }
            out.push_str(&close_pad);
            out.push('}');
        }
        GoldenValue::Call(call) => {
            write_call_name(out, call);
            out.push_str("(\n");
            for arg in &call.args {
                out.push_str(&pad);
                write_value(out, arg, indent + INDENT);
                out.push_str(",\n");
            }
            for (name, arg) in &call.kwargs {
                out.push_str(&pad);
                out.push_str(name);
                out.push('=');
                write_value(out, arg, indent + INDENT);
                out.push_str(",\n");
            }
            out.push_str(&close_pad);
            out.push(')');
        }
        _ => out.push_str(&compact),
    }
}

fn write_block(out: &mut String, open: &str, close: &str, items: &[GoldenValue], indent: usize) {
    let pad = " ".repeat(indent + INDENT);
    out.push_str(open);
    out.push('\n');
    for item in items {
        out.push_str(&pad);
        write_value(out, item, indent + INDENT);
        out.push_str(",\n");
    }
    out.push_str(&" ".repeat(indent));
    out.push_str(close);
}

fn is_container(value: &GoldenValue) -> bool {
    match value {
        GoldenValue::List(items) | GoldenValue::Tuple(items) => !items.is_empty(),
        GoldenValue::Dict(map) => !map.is_empty(),
        GoldenValue::Call(call) => !call.args.is_empty() || !call.kwargs.is_empty(),
        _ => false,
    }
}

fn write_compact(out: &mut String, value: &GoldenValue) {
    match value {
        GoldenValue::None => out.push_str("None"),
        GoldenValue::Bool(true) => out.push_str("True"),
        GoldenValue::Bool(false) => out.push_str("False"),
        GoldenValue::Int(n) => {
            let _ = write!(out, "{n}");
        }
        GoldenValue::Float(f) => write_float(out, *f),
        GoldenValue::Str(s) => write_str(out, s),
        GoldenValue::Bytes(b) => write_bytes(out, b),
        GoldenValue::List(items) => {
            out.push('[');
            write_joined(out, items);
            out.push(']');
        }
        GoldenValue::Tuple(items) => {
            out.push('(');
            write_joined(out, items);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        GoldenValue::Dict(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_compact(out, key);
                out.push_str(": ");
                write_compact(out, item);
            }
            out.push('}');
        }
        GoldenValue::Call(call) => {
            write_call_name(out, call);
            out.push('(');
            write_joined(out, &call.args);
            for (i, (name, arg)) in call.kwargs.iter().enumerate() {
                if i > 0 || !call.args.is_empty() {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push('=');
                write_compact(out, arg);
            }
            out.push(')');
        }
        GoldenValue::Datetime(ts) => write_datetime(out, ts),
    }
}

fn write_joined(out: &mut String, items: &[GoldenValue]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_compact(out, item);
    }
}

fn write_call_name(out: &mut String, call: &CallRecord) {
    out.push_str("call");
    for part in &call.path {
        out.push('.');
        out.push_str(part);
    }
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("nan");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "inf" } else { "-inf" });
    } else {
        // `{:?}` is the shortest text that parses back to the same f64 and
        // always carries a '.' or an exponent.
        let _ = write!(out, "{f:?}");
    }
}

fn write_str(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let code = c as u32;
                let _ = if code < 0x100 {
                    write!(out, "\\x{code:02x}")
                } else if code < 0x10000 {
                    write!(out, "\\u{code:04x}")
                } else {
                    write!(out, "\\U{code:08x}")
                };
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn write_bytes(out: &mut String, bytes: &[u8]) {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push(quote as char);
}

fn write_datetime(out: &mut String, ts: &Timestamp) {
    let dt = fold_leap_second(ts.naive);
    let _ = write!(
        out,
        "DatetimeWithNanoseconds({}, {}, {}, {}, {}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute()
    );
    let nanos = dt.nanosecond();
    if dt.second() != 0 || nanos != 0 {
        let _ = write!(out, ", {}", dt.second());
    }
    if nanos % 1000 == 0 {
        if nanos != 0 {
            let _ = write!(out, ", {}", nanos / 1000);
        }
    } else {
        let _ = write!(out, ", nanosecond={nanos}");
    }
    if ts.utc {
        out.push_str(", tzinfo=datetime.timezone.utc");
    }
    out.push(')');
}
