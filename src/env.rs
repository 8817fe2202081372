//! Environment interpolation and env-file loading.
//!
//! Scalar strings in the manifest may reference environment variables as
//! `${NAME:-default}`, `${NAME}` or `$NAME`. Expansion is a single pass:
//! substituted text is never rescanned, so a value containing `$` comes
//! through untouched.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

/// A resolved set of environment variables
pub type EnvMap = BTreeMap<String, String>;

/// Expand `${NAME:-default}`, `${NAME}` and `$NAME` against `env`.
///
/// Unset variables expand to the empty string unless a `:-` default is
/// given. A `$` that does not introduce a valid reference is kept literal.
pub fn interpolate(input: &str, env: &EnvMap) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if ch != '$' {
            output.push(ch);
            continue;
        }

        match chars.peek() {
            Some((_, '{')) => {
                let rest = &input[index + 2..];
                let Some(close) = rest.find('}') else {
                    // Unterminated brace, keep the text literal.
                    output.push(ch);
                    continue;
                };
                let body = &rest[..close];
                let (name, default) = match body.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (body, None),
                };
                match env.get(name) {
                    Some(value) => output.push_str(value),
                    None => output.push_str(default.unwrap_or("")),
                }
                // Skip past `{body}`.
                for _ in 0..body.chars().count() + 2 {
                    chars.next();
                }
            }
            Some((_, next)) if is_name_start(*next) => {
                let rest = &input[index + 1..];
                let end = rest
                    .find(|c: char| !is_name_char(c))
                    .unwrap_or(rest.len());
                let name = &rest[..end];
                output.push_str(env.get(name).map(String::as_str).unwrap_or(""));
                for _ in 0..name.len() {
                    chars.next();
                }
            }
            _ => output.push(ch),
        }
    }

    output
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Load a `KEY=VALUE` env file.
///
/// Blank lines and `#` comments are skipped, a leading `export ` is
/// accepted, and matching single or double quotes around the value are
/// stripped. A line with no `=` fails with the file and line number.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<EnvMap> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_env_contents(&contents, path)
}

fn parse_env_contents(contents: &str, path: &Path) -> Result<EnvMap> {
    let mut env = EnvMap::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::EnvFileParse {
                path: path.to_path_buf(),
                line: number + 1,
            });
        };
        env.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }
    Ok(env)
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Merge environments, later maps overriding earlier ones
pub fn merge<I>(envs: I) -> EnvMap
where
    I: IntoIterator<Item = EnvMap>,
{
    let mut merged = EnvMap::new();
    for env in envs {
        merged.extend(env);
    }
    merged
}

/// Snapshot the process environment
pub fn process_env() -> EnvMap {
    std::env::vars().collect()
}
