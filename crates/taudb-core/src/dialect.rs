//! Per-engine SQL rendering rules.
//!
//! All statement text is assembled facade-side, so the dialect carries
//! everything that differs between engines: identifier quoting, string
//! literal escaping, the current-time function, and limit/offset syntax.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    fn quote_char(self) -> char {
        match self {
            Dialect::Sqlite | Dialect::Postgres => '"',
            Dialect::Mysql => '`',
        }
    }

    /// Render a string as a complete SQL literal.
    ///
    /// SQLite and PostgreSQL double embedded quotes. MySQL additionally
    /// backslash-escapes control characters. A SQLite string containing a
    /// NUL byte cannot appear inside a quoted literal at all, so it is
    /// rendered as a hex blob cast back to text, which preserves the byte.
    pub fn quote_str(self, s: &str) -> String {
        match self {
            Dialect::Sqlite => {
                if s.contains('\0') {
                    let mut out = String::with_capacity(s.len() * 2 + 16);
                    out.push_str("CAST(x'");
                    for b in s.as_bytes() {
                        let _ = write!(out, "{:02x}", b);
                    }
                    out.push_str("' AS TEXT)");
                    return out;
                }
                format!("'{}'", s.replace('\'', "''"))
            }
            Dialect::Postgres => format!("'{}'", s.replace('\'', "''")),
            Dialect::Mysql => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\0' => out.push_str("\\0"),
                        '\'' => out.push_str("\\'"),
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\x1a' => out.push_str("\\Z"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
                out
            }
        }
    }

    /// Render a byte string as a complete SQL literal.
    pub fn quote_bytes(self, bytes: &[u8]) -> String {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(hex, "{:02x}", b);
        }
        match self {
            Dialect::Sqlite | Dialect::Mysql => format!("x'{}'", hex),
            Dialect::Postgres => format!("'\\x{}'", hex),
        }
    }

    /// Quote an identifier.
    ///
    /// Special cases: a dotted name is quoted per segment; `*` is never
    /// quoted; a name containing `(` is taken to be a function call and
    /// passes through verbatim, except that a trailing ` as alias` still
    /// gets its alias quoted.
    pub fn quote_ident(self, name: &str) -> String {
        let name = name.trim();
        if name == "*" {
            return name.to_string();
        }
        if name.contains('(') {
            // Only the text after the closing paren can carry an alias;
            // " as " inside the call (CAST(a AS INT)) is part of the call.
            let tail_start = name.rfind(')').map_or(0, |i| i + 1);
            if let Some((_, alias)) = split_alias(&name[tail_start..]) {
                let expr = name[..tail_start].trim();
                return format!("{} AS {}", expr, self.quote_segment(alias));
            }
            return name.to_string();
        }
        name.split('.')
            .map(|seg| {
                let seg = seg.trim();
                if seg == "*" {
                    seg.to_string()
                } else {
                    self.quote_segment(seg)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn quote_segment(self, seg: &str) -> String {
        let q = self.quote_char();
        let doubled = format!("{q}{q}");
        format!("{q}{}{q}", seg.replace(q, &doubled))
    }

    /// The dialect's current-time expression.
    pub fn now(self) -> &'static str {
        match self {
            Dialect::Sqlite => "CURRENT_TIMESTAMP",
            Dialect::Postgres | Dialect::Mysql => "NOW()",
        }
    }

    /// Booleans render as integer literals everywhere.
    pub fn bool_literal(self, b: bool) -> &'static str {
        if b { "1" } else { "0" }
    }

    pub fn null_literal(self) -> &'static str {
        "NULL"
    }

    /// Limit/offset tail, without a leading space.
    pub fn limit_clause(self, limit: u64, offset: Option<u64>) -> String {
        match (self, offset) {
            (Dialect::Postgres, Some(off)) => format!("LIMIT {} OFFSET {}", limit, off),
            (_, Some(off)) => format!("LIMIT {}, {}", off, limit),
            (_, None) => format!("LIMIT {}", limit),
        }
    }
}

/// Split `expr as alias` on the first case-insensitive ` as ` token.
pub fn split_alias(name: &str) -> Option<(&str, &str)> {
    // scans the original bytes so multibyte identifiers keep valid offsets
    let bytes = name.as_bytes();
    let pos = bytes
        .windows(4)
        .position(|w| w.eq_ignore_ascii_case(b" as "))?;
    let expr = name[..pos].trim();
    let alias = name[pos + 4..].trim();
    if alias.is_empty() {
        return None;
    }
    Some((expr, alias))
}
