//! Statements and their text formatting.
//!
//! A [`Statement`] is SQL text with positional `$n` arguments. Adapters send
//! statements as a single line unless pretty SQL is enabled, which keeps
//! server logs and error positions readable.

use serde_json::Value;

/// Positional argument bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    /// SQL `NULL`.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double precision.
    Float(f64),
    /// Text.
    Text(String),
    /// `jsonb`.
    Json(Value),
}

impl From<bool> for SqlArg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlArg {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlArg {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SqlArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SqlArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for SqlArg {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<SqlArg>> From<Option<T>> for SqlArg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// SQL text plus its arguments.
///
/// # Examples
/// ```
/// use starter::domain::Statement;
///
/// let statement = Statement::new("select * from users where id = $1")
///     .bind(42_i64)
///     .append_arg("limit", 10_i64);
/// assert_eq!(statement.text(), "select * from users where id = $1 limit $2");
/// assert_eq!(statement.args().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    text: String,
    args: Vec<SqlArg>,
}

impl Statement {
    /// Statement without arguments.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            args: Vec::new(),
        }
    }

    /// Bind the next positional argument.
    #[must_use]
    pub fn bind(mut self, arg: impl Into<SqlArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a clause separated by a space.
    #[must_use]
    pub fn append(mut self, clause: &str) -> Self {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(clause);
        self
    }

    /// Append `keyword $n` and bind `arg` as the `n`th argument.
    #[must_use]
    pub fn append_arg(mut self, keyword: &str, arg: impl Into<SqlArg>) -> Self {
        self.args.push(arg.into());
        let clause = format!("{keyword} ${}", self.args.len());
        self.append(&clause)
    }

    /// Embed the text between `prefix` and `suffix`, keeping the arguments.
    #[must_use]
    pub fn wrapped(&self, prefix: &str, suffix: &str) -> Self {
        Self {
            text: format!("{prefix}{}{suffix}", self.text),
            args: self.args.clone(),
        }
    }

    /// SQL text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bound arguments in position order.
    pub fn args(&self) -> &[SqlArg] {
        &self.args
    }
}

impl From<&str> for Statement {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Collapse `sql` onto one line.
///
/// Comments are dropped and whitespace runs become one space. String
/// literals, quoted identifiers and dollar-quoted bodies are kept verbatim.
///
/// ```
/// use starter::domain::sql::single_line;
///
/// let sql = "select a, -- first\n       'x  y'\n  from t /* note */ where b = $1";
/// assert_eq!(single_line(sql), "select a, 'x  y' from t where b = $1");
/// ```
pub fn single_line(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;
    let mut rest = sql;

    while let Some(ch) = rest.chars().next() {
        let token_len = if ch.is_whitespace() {
            pending_space = true;
            rest.len() - rest.trim_start().len()
        } else if rest.starts_with("--") {
            pending_space = true;
            rest.find('\n').unwrap_or(rest.len())
        } else if rest.starts_with("/*") {
            pending_space = true;
            block_comment_len(rest)
        } else {
            let len = match ch {
                '\'' => quoted_len(rest, ch, !pending_space && opens_escape_string(&out)),
                '"' => quoted_len(rest, ch, false),
                '$' => dollar_quoted_len(rest).unwrap_or(1),
                _ => ch.len_utf8(),
            };
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push_str(&rest[..len]);
            len
        };
        rest = &rest[token_len..];
    }
    out
}

/// Whether `out` ends with a standalone `E` prefix, making the next literal
/// an escape string.
fn opens_escape_string(out: &str) -> bool {
    let mut previous = out.chars().rev();
    matches!(previous.next(), Some('E' | 'e'))
        && !previous
            .next()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_' || ch == '$')
}

/// Length of a quoted token starting at `text[0] == quote`, treating a
/// doubled quote as an escape, and a backslash too when `backslash_escapes`.
/// Unterminated tokens run to the end.
fn quoted_len(text: &str, quote: char, backslash_escapes: bool) -> usize {
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((index, ch)) = chars.next() {
        if backslash_escapes && ch == '\\' {
            chars.next();
            continue;
        }
        if ch != quote {
            continue;
        }
        if chars.peek().is_some_and(|(_, next)| *next == quote) {
            chars.next();
            continue;
        }
        return index + ch.len_utf8();
    }
    text.len()
}

/// Length of a possibly nested block comment at the start of `text`.
fn block_comment_len(text: &str) -> usize {
    let mut depth = 0_usize;
    let mut index = 0;
    while index < text.len() {
        let rest = &text[index..];
        if rest.starts_with("/*") {
            depth += 1;
            index += 2;
        } else if rest.starts_with("*/") {
            depth -= 1;
            index += 2;
            if depth == 0 {
                return index;
            }
        } else {
            index += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    text.len()
}

/// Length of a `$tag$ ... $tag$` body at the start of `text`, or `None` when
/// the dollar sign does not open one (for example a `$1` placeholder).
fn dollar_quoted_len(text: &str) -> Option<usize> {
    let after = &text[1..];
    let tag_end = after.find('$')?;
    let tag = &after[..tag_end];
    let valid_tag = tag
        .chars()
        .next()
        .is_none_or(|first| first.is_alphabetic() || first == '_')
        && tag.chars().all(|ch| ch.is_alphanumeric() || ch == '_');
    if !valid_tag {
        return None;
    }
    let delimiter = &text[..tag_end + 2];
    let body_start = delimiter.len();
    let close = text[body_start..]
        .find(delimiter)
        .map_or(text.len(), |offset| body_start + offset + delimiter.len());
    Some(close)
}
