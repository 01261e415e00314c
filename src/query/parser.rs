//! Query text splitting and command-line option access.
//!
//! The pipeline language is line oriented: statements are separated by
//! `;`, commands by `|` and arguments by whitespace. Separators inside
//! quotes or any kind of bracket belong to the enclosing token, so nested
//! queries such as `<(gor a.gor | top 2)` stay in one piece.

use crate::gor::{GorError, Result};

/// Split `text` on `sep` where it appears outside quotes and brackets.
pub fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            current.push(c);
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth <= 0 => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Statements of a query, trimmed, without empty ones.
pub fn split_statements(text: &str) -> Vec<String> {
    split_top_level(text, ';')
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Commands of one pipeline.
pub fn split_pipes(text: &str) -> Result<Vec<String>> {
    let parts: Vec<String> = split_top_level(text, '|')
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(GorError::parse("query", format!("Empty command in '{}'", text.trim())));
    }
    Ok(parts)
}

/// Whitespace separated tokens; quoted and bracketed text stays whole.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            current.push(c);
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            c if c.is_whitespace() && depth <= 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Strip one pair of matching surrounding quotes.
pub fn unquote(text: &str) -> &str {
    let t = text.trim();
    if t.len() >= 2 {
        let (first, last) = (t.as_bytes()[0], t.as_bytes()[t.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &t[1..t.len() - 1];
        }
    }
    t
}

/// Query text of a nested source token `<(query)`.
pub fn nested_query(token: &str) -> Option<&str> {
    token
        .strip_prefix("<(")
        .and_then(|t| t.strip_suffix(')'))
        .map(str::trim)
}

/// Pipeline text of a tee target `>(pipeline)`.
pub fn sub_pipeline(token: &str) -> Option<&str> {
    token
        .strip_prefix(">(")
        .and_then(|t| t.strip_suffix(')'))
        .map(str::trim)
}

/// Contents of a braced token `{...}`.
pub fn braced(token: &str) -> Option<&str> {
    token
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .map(str::trim)
}

fn is_option(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next() == Some('-') && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// One command of a pipeline: its name and argument tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    name: String,
    args: String,
    tokens: Vec<String>,
}

impl CommandLine {
    pub fn parse(text: &str) -> Result<CommandLine> {
        let text = text.trim();
        let (name, args) = match text.find(char::is_whitespace) {
            Some(i) => (&text[..i], text[i..].trim()),
            None => (text, ""),
        };
        if name.is_empty() {
            return Err(GorError::parse("query", "Missing command"));
        }
        Ok(CommandLine {
            name: name.to_lowercase(),
            args: args.to_string(),
            tokens: tokenize(args),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw argument text after the command name.
    pub fn args(&self) -> &str {
        &self.args
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Split the arguments into flags, valued options and positionals.
    ///
    /// Any option not listed is a parse error naming the option.
    pub fn options(&self, flags: &[&str], valued: &[&str]) -> Result<Options> {
        let mut options = Options {
            command: self.name.clone(),
            flags: Vec::new(),
            values: Vec::new(),
            positional: Vec::new(),
        };
        let mut iter = self.tokens.iter();
        while let Some(token) = iter.next() {
            if !is_option(token) {
                options.positional.push(token.clone());
                continue;
            }
            let lower = token.to_lowercase();
            if flags.contains(&lower.as_str()) {
                options.flags.push(lower);
            } else if valued.contains(&lower.as_str()) {
                let value = iter.next().ok_or_else(|| {
                    GorError::parse_option(&self.name, &lower, "Missing option value")
                })?;
                options.values.push((lower, unquote(value).to_string()));
            } else {
                return Err(GorError::parse_option(
                    &self.name,
                    token.as_str(),
                    "Unknown option",
                ));
            }
        }
        Ok(options)
    }
}

/// Options of one command after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    command: String,
    flags: Vec<String>,
    values: Vec<(String, String)>,
    positional: Vec<String>,
}

impl Options {
    pub fn has(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag) || self.values.iter().any(|(k, _)| k == flag)
    }

    /// Last value given for `option`.
    pub fn value(&self, option: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k == option)
            .map(|(_, v)| v.as_str())
    }

    pub fn required(&self, option: &str) -> Result<&str> {
        self.value(option).ok_or_else(|| {
            GorError::parse_option(&self.command, option, "Option is required")
        })
    }

    pub fn int(&self, option: &str) -> Result<Option<i64>> {
        self.value(option)
            .map(|v| {
                v.parse::<i64>().map_err(|_| {
                    GorError::parse_option(
                        &self.command,
                        option,
                        format!("Invalid number '{}'", v),
                    )
                })
            })
            .transpose()
    }

    /// Non-negative integer option, `default` when absent.
    pub fn count(&self, option: &str, default: usize) -> Result<usize> {
        match self.int(option)? {
            None => Ok(default),
            Some(n) if n >= 0 => Ok(n as usize),
            Some(n) => Err(GorError::parse_option(
                &self.command,
                option,
                format!("Value must not be negative, got {}", n),
            )),
        }
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Error naming this command.
    pub fn error(&self, message: impl Into<String>) -> GorError {
        GorError::parse(&self.command, message)
    }

    /// Error naming this command and one of its options.
    pub fn option_error(&self, option: &str, message: impl Into<String>) -> GorError {
        GorError::parse_option(&self.command, option, message)
    }
}
