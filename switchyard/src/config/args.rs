//! Configuration-string splitting and typed argument parsing.
//!
//! An element's configuration string is a comma-separated argument list;
//! commas inside parentheses, brackets, braces, or quotes do not split, and
//! `//` and `/* */` comments vanish. Elements consume the split list through
//! [`Args`], reading positional and `KEYWORD value` arguments into typed
//! variables and finishing with [`Args::complete`], which rejects anything
//! left over.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::element::ElementError;
use crate::nameinfo::{EtherAddress, IpPrefix};

/// Splits a configuration string into top-level comma-separated arguments.
///
/// Quotes, nesting brackets, and comments are respected; leading and
/// trailing whitespace is trimmed; empty arguments are dropped.
pub fn split_args(s: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                current.push(c);
                while let Some(c) = chars.next() {
                    current.push(c);
                    match c {
                        '\\' => {
                            if let Some(next) = chars.next() {
                                current.push(next);
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '\'' => {
                current.push(c);
                for c in chars.by_ref() {
                    current.push(c);
                    if c == '\'' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                current.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                current.push(' ');
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                let item = current.trim().to_owned();
                if !item.is_empty() {
                    items.push(item);
                }
                current.clear();
            }
            c => current.push(c),
        }
    }
    let item = current.trim().to_owned();
    if !item.is_empty() {
        items.push(item);
    }
    items
}

/// Removes one level of double quoting, processing backslash escapes.
pub fn unquote(s: &str) -> String {
    let s = s.trim();
    let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return s.to_owned();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some(c) => out.push(c),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// True for arguments whose first word is an all-caps keyword.
fn keyword_form(item: &str) -> bool {
    let first = item.split_whitespace().next().unwrap_or("");
    first
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
        && first
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Types readable from one configuration argument.
pub trait FromArg: Sized {
    /// Parses the argument text.
    fn from_arg(arg: &str) -> Result<Self, String>;
}

impl FromArg for String {
    fn from_arg(arg: &str) -> Result<Self, String> {
        Ok(unquote(arg))
    }
}

impl FromArg for bool {
    fn from_arg(arg: &str) -> Result<Self, String> {
        match arg {
            "" | "true" | "TRUE" | "1" => Ok(true),
            "false" | "FALSE" | "0" => Ok(false),
            _ => Err(format!("expected boolean, not {:?}", arg)),
        }
    }
}

macro_rules! int_from_arg {
    ($($t:ty),*) => {$(
        impl FromArg for $t {
            fn from_arg(arg: &str) -> Result<Self, String> {
                arg.parse().map_err(|_| format!("expected integer, not {:?}", arg))
            }
        }
    )*};
}

int_from_arg!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl FromArg for f64 {
    fn from_arg(arg: &str) -> Result<Self, String> {
        arg.parse().map_err(|_| format!("expected number, not {:?}", arg))
    }
}

impl FromArg for Duration {
    /// Seconds, with optional `s`, `ms`, or `us` suffix.
    fn from_arg(arg: &str) -> Result<Self, String> {
        let (digits, scale) = if let Some(d) = arg.strip_suffix("ms") {
            (d, 1e-3)
        } else if let Some(d) = arg.strip_suffix("us") {
            (d, 1e-6)
        } else if let Some(d) = arg.strip_suffix('s') {
            (d, 1.0)
        } else {
            (arg, 1.0)
        };
        let value: f64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("expected time, not {:?}", arg))?;
        if value < 0.0 {
            return Err(format!("expected non-negative time, not {:?}", arg));
        }
        Ok(Duration::from_secs_f64(value * scale))
    }
}

impl FromArg for Ipv4Addr {
    fn from_arg(arg: &str) -> Result<Self, String> {
        arg.parse().map_err(|_| format!("expected IP address, not {:?}", arg))
    }
}

impl FromArg for Ipv6Addr {
    fn from_arg(arg: &str) -> Result<Self, String> {
        arg.parse().map_err(|_| format!("expected IPv6 address, not {:?}", arg))
    }
}

impl FromArg for IpPrefix {
    fn from_arg(arg: &str) -> Result<Self, String> {
        arg.parse()
    }
}

impl FromArg for EtherAddress {
    fn from_arg(arg: &str) -> Result<Self, String> {
        arg.parse()
    }
}

/// A split argument list being consumed by an element's `configure`.
///
/// Reads chain; errors accumulate and surface from [`Args::complete`]:
///
/// ```
/// use switchyard::config::args::{split_args, Args};
///
/// let mut capacity = 1000usize;
/// let mut label = String::new();
/// let mut args = Args::new(split_args("9, CAPACITY 64"));
/// args.read_p("LABEL", &mut label)
///     .read("CAPACITY", &mut capacity);
/// assert!(args.complete().is_ok());
/// assert_eq!((label.as_str(), capacity), ("9", 64));
/// ```
pub struct Args {
    items: Vec<Option<String>>,
    errors: Vec<String>,
}

impl Args {
    /// Wraps a split argument list.
    pub fn new(items: Vec<String>) -> Args {
        Args {
            items: items.into_iter().map(Some).collect(),
            errors: Vec::new(),
        }
    }

    /// Number of arguments not yet consumed.
    pub fn remaining(&self) -> usize {
        self.items.iter().flatten().count()
    }

    fn take_keyword(&mut self, keyword: &str) -> Option<String> {
        for slot in &mut self.items {
            let Some(item) = slot else { continue };
            if let Some(rest) = item.strip_prefix(keyword) {
                if rest.is_empty() {
                    slot.take();
                    return Some(String::new());
                }
                if rest.starts_with(char::is_whitespace) {
                    let value = rest.trim_start().to_owned();
                    slot.take();
                    return Some(value);
                }
            }
        }
        None
    }

    fn take_positional(&mut self) -> Option<String> {
        // Keyword-form arguments (an all-caps first word, like
        // `CAPACITY 64`) are never consumed positionally.
        self.items
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|item| !keyword_form(item)))?
            .take()
    }

    fn parse_into<T: FromArg>(&mut self, keyword: &str, value: &str, dst: &mut T) {
        match T::from_arg(value) {
            Ok(v) => *dst = v,
            Err(e) => self.errors.push(format!("{}: {}", keyword, e)),
        }
    }

    /// Reads an optional `KEYWORD value` argument.
    pub fn read<T: FromArg>(&mut self, keyword: &str, dst: &mut T) -> &mut Self {
        if let Some(value) = self.take_keyword(keyword) {
            self.parse_into(keyword, &value, dst);
        }
        self
    }

    /// Reads a mandatory `KEYWORD value` argument.
    pub fn read_m<T: FromArg>(&mut self, keyword: &str, dst: &mut T) -> &mut Self {
        match self.take_keyword(keyword) {
            Some(value) => self.parse_into(keyword, &value, dst),
            None => self.errors.push(format!("{} required", keyword)),
        }
        self
    }

    /// Reads an optional argument, positionally or as `KEYWORD value`.
    pub fn read_p<T: FromArg>(&mut self, keyword: &str, dst: &mut T) -> &mut Self {
        if let Some(value) = self.take_keyword(keyword) {
            self.parse_into(keyword, &value, dst);
        } else if let Some(value) = self.take_positional() {
            self.parse_into(keyword, &value, dst);
        }
        self
    }

    /// Reads a mandatory argument, positionally or as `KEYWORD value`.
    pub fn read_mp<T: FromArg>(&mut self, keyword: &str, dst: &mut T) -> &mut Self {
        if let Some(value) = self.take_keyword(keyword) {
            self.parse_into(keyword, &value, dst);
        } else if let Some(value) = self.take_positional() {
            self.parse_into(keyword, &value, dst);
        } else {
            self.errors.push(format!("{} required", keyword));
        }
        self
    }

    /// Consumes and returns every remaining argument, in order. For
    /// elements whose configuration is a free-form list.
    pub fn take_rest(&mut self) -> Vec<String> {
        self.items.iter_mut().filter_map(Option::take).collect()
    }

    /// Records a parse error against `what`.
    pub fn error(&mut self, what: &str, message: &str) -> &mut Self {
        self.errors.push(format!("{}: {}", what, message));
        self
    }

    /// Finishes parsing: leftover arguments and accumulated parse errors
    /// become one configure failure.
    pub fn complete(&mut self) -> Result<(), ElementError> {
        for item in self.items.iter().flatten() {
            self.errors.push(format!("unknown argument {:?}", item));
        }
        self.items.clear();
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ElementError::config(self.errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitting_respects_nesting_and_quotes() {
        assert_eq!(split_args("a, b, c"), vec!["a", "b", "c"]);
        assert_eq!(split_args("f(a, b), c"), vec!["f(a, b)", "c"]);
        assert_eq!(split_args("\"a, b\", c"), vec!["\"a, b\"", "c"]);
        assert_eq!(split_args("a /* x, y */, b"), vec!["a", "b"]);
        assert_eq!(split_args("a // trailing, comment\n, b"), vec!["a", "b"]);
        assert_eq!(split_args(""), Vec::<String>::new());
        assert_eq!(split_args("  ,, "), Vec::<String>::new());
    }

    #[test]
    fn unquoting() {
        assert_eq!(unquote("\"a b\""), "a b");
        assert_eq!(unquote("\"a\\nb\""), "a\nb");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn keyword_and_positional_reads() {
        let mut cap = 0u32;
        let mut active = false;
        let mut name = String::new();
        let mut args = Args::new(split_args("front, CAPACITY 17, ACTIVE true"));
        args.read_p("NAME", &mut name)
            .read("CAPACITY", &mut cap)
            .read("ACTIVE", &mut active);
        assert!(args.complete().is_ok());
        assert_eq!((name.as_str(), cap, active), ("front", 17, true));
    }

    #[test]
    fn leftover_arguments_fail() {
        let mut args = Args::new(split_args("1, 2"));
        let mut first = 0u32;
        args.read_p("FIRST", &mut first);
        let err = args.complete().unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }

    #[test]
    fn missing_mandatory_fails() {
        let mut args = Args::new(Vec::new());
        let mut cap = 0u32;
        args.read_m("CAPACITY", &mut cap);
        assert!(args.complete().is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(Duration::from_arg("2").unwrap(), Duration::from_secs(2));
        assert_eq!(Duration::from_arg("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(Duration::from_arg("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(Duration::from_arg("10us").unwrap(), Duration::from_micros(10));
        assert!(Duration::from_arg("-1").is_err());
    }

    #[test]
    fn bad_values_accumulate() {
        let mut args = Args::new(split_args("CAPACITY many"));
        let mut cap = 0u32;
        args.read("CAPACITY", &mut cap);
        assert!(args.complete().is_err());
    }
}
