//! `${VAR}` substitution for job configuration files.
//!
//! Recognised forms:
//! - `$VAR`, `${VAR}`: required, reported when unset
//! - `${VAR:-fallback}`: fallback when unset or empty
//! - `${VAR-fallback}`: fallback only when unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::fmt;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escape>\$\$)
        |
        \$\{
            (?P<braced>[A-Za-z_][A-Za-z0-9_]*)
            (?:(?P<op>:?-)(?P<fallback>[^}]*))?
        \}
        |
        \$(?P<bare>[A-Za-z_][A-Za-z0-9_]*)
        ",
    )
    .expect("placeholder pattern is valid")
});

/// Problem found while substituting a single placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    Unset(String),
    Multiline(String),
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::Unset(name) => write!(f, "environment variable '{name}' is not set"),
            Issue::Multiline(name) => write!(
                f,
                "environment variable '{name}' contains newlines, which is not allowed"
            ),
        }
    }
}

/// Output of [`interpolate`]: the rewritten text plus every issue found.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute every placeholder in `input`.
///
/// Unresolvable placeholders are left verbatim and reported, so a single pass
/// surfaces all missing variables.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut issues = Vec::new();
    let text = PLACEHOLDER
        .replace_all(input, |caps: &Captures| match resolve(caps) {
            Ok(value) => value,
            Err(issue) => {
                issues.push(issue);
                caps[0].to_string()
            }
        })
        .into_owned();

    InterpolationResult {
        text,
        errors: issues.iter().map(ToString::to_string).collect(),
    }
}

fn resolve(caps: &Captures) -> Result<String, Issue> {
    if caps.name("escape").is_some() {
        return Ok("$".to_string());
    }

    let name = caps
        .name("braced")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let op = caps.name("op").map(|m| m.as_str());
    let fallback = caps.name("fallback").map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains('\n') || value.contains('\r') => {
            Err(Issue::Multiline(name.to_string()))
        }
        Ok(value) if value.is_empty() && op == Some(":-") => {
            Ok(fallback.unwrap_or_default().to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => fallback
            .map(str::to_string)
            .ok_or_else(|| Issue::Unset(name.to_string())),
    }
}
