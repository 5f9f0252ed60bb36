//! Placeholder expansion for constructor arguments, action arguments and exports.
//!
//! Recognised forms:
//!
//! * `{env:VAR}` - value from the [`Environment`]; unset or empty leaves the token in place.
//! * `{address:Name}` - address of the deployed contract `Name` (case-insensitive).
//! * `{deployment:Name:field}` - `address`, `deployer_address` or `deployer_private_key` of `Name`.
//! * `${Name}` - legacy spelling of `{address:Name}`.
//!
//! Payloads never contain braces, so every family matches its innermost occurrence first and
//! `{address:{env:TOKEN_NAME}}` resolves in two passes. Passes repeat until nothing changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use alloy::hex;
use regex::{Captures, Regex};
use tracing::trace;

use crate::abi;
use crate::error::{Error, Result};
use crate::records::{DeploymentRecord, find_record};

/// Upper bound on resolution passes; an env value that refers to itself stops here.
pub const MAX_PASSES: usize = 8;

/// Prefix marking a constructor argument that is computed call data rather than a literal.
pub const GENERATOR_PREFIX: &str = "CAST_CALLDATA:";

static ENV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{env:([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex")
});
static ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{address:([^{}:]+)\}").expect("static regex"));
static DEPLOYMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{deployment:([^{}:]+):([^{}:]+)\}").expect("static regex")
});
static LEGACY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^{}]+)\}").expect("static regex"));
static LEFTOVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:env|address|deployment):|\$\{").expect("static regex")
});

/// Environment visible to templates: an explicit overlay that shadows the process environment.
///
/// Exports from earlier deployments land in the overlay, so nothing here mutates the process.
#[derive(Clone, Default)]
pub struct Environment {
    overlay: BTreeMap<String, String>,
    inherit: bool,
}

impl Environment {
    /// Overlay on top of the process environment.
    pub fn from_process() -> Self {
        Self {
            overlay: BTreeMap::new(),
            inherit: true,
        }
    }

    /// Overlay only; the process environment is never consulted.
    pub fn isolated() -> Self {
        Self::default()
    }

    /// Value of `key`, treating an empty value as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match self.overlay.get(key) {
            Some(value) => Some(value.clone()),
            None if self.inherit => std::env::var(key).ok(),
            None => None,
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overlay.insert(key.into(), value.into());
    }

    pub fn overlay(&self) -> &BTreeMap<String, String> {
        &self.overlay
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Environment {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may hold keys; only names are printed.
        f.debug_struct("Environment")
            .field("overlay", &self.overlay.keys().collect::<Vec<_>>())
            .field("inherit", &self.inherit)
            .finish()
    }
}

/// Expands placeholders against the records deployed so far and an environment.
pub struct TemplateResolver<'a> {
    records: &'a [DeploymentRecord],
    env: &'a Environment,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(records: &'a [DeploymentRecord], env: &'a Environment) -> Self {
        Self { records, env }
    }

    /// Resolve every placeholder in `input`.
    ///
    /// Placeholder-free input comes back unchanged. Anything that still looks like a
    /// placeholder afterwards fails with [`Error::UnresolvedPlaceholder`] carrying `input`.
    pub fn resolve(&self, input: &str) -> Result<String> {
        let mut current = input.to_string();
        for pass in 0..MAX_PASSES {
            let next = self.pass(&current)?;
            if next == current {
                break;
            }
            trace!(pass, "template pass");
            current = next;
        }
        if LEFTOVER.is_match(&current) {
            return Err(Error::UnresolvedPlaceholder(input.to_string()));
        }
        Ok(current)
    }

    /// Resolve a constructor or action argument, expanding `CAST_CALLDATA:` generators.
    pub fn resolve_argument(&self, raw: &str) -> Result<String> {
        match raw.strip_prefix(GENERATOR_PREFIX) {
            Some(body) => self.generate_calldata(raw, body),
            None => self.resolve(raw),
        }
    }

    pub fn resolve_arguments<S: AsRef<str>>(&self, raws: &[S]) -> Result<Vec<String>> {
        raws.iter()
            .map(|raw| self.resolve_argument(raw.as_ref()))
            .collect()
    }

    fn pass(&self, input: &str) -> Result<String> {
        let text = replace(&ENV, input, |caps| Ok(self.env.get(&caps[1])))?;
        let text = replace(&ADDRESS, &text, |caps| {
            self.record(&caps[1]).map(|r| Some(r.address.to_string()))
        })?;
        let text = replace(&DEPLOYMENT, &text, |caps| {
            let record = self.record(&caps[1])?;
            let value = match caps[2].trim() {
                "address" => record.address.to_string(),
                "deployer_address" => record.deployer_address.to_string(),
                "deployer_private_key" => record.deployer_private_key.clone(),
                field => {
                    return Err(Error::UnknownDeploymentField {
                        field: field.to_string(),
                        placeholder: caps[0].to_string(),
                    });
                }
            };
            Ok(Some(value))
        })?;
        replace(&LEGACY, &text, |caps| {
            self.record(&caps[1]).map(|r| Some(r.address.to_string()))
        })
    }

    fn record(&self, name: &str) -> Result<&'a DeploymentRecord> {
        let name = name.trim();
        find_record(self.records, name)
            .ok_or_else(|| Error::MissingDeploymentRecord(name.to_string()))
    }

    /// `signature` or `signature:value:value...`, values resolved then encoded in-process.
    fn generate_calldata(&self, literal: &str, body: &str) -> Result<String> {
        let invalid = |reason: &str| Error::InvalidGenerator {
            literal: literal.to_string(),
            reason: reason.to_string(),
        };
        let open = body.find('(').ok_or_else(|| invalid("missing `(` in signature"))?;
        let close = closing_paren(body, open).ok_or_else(|| invalid("missing `)` in signature"))?;
        let (signature, rest) = body.split_at(close + 1);
        let values = match rest {
            "" => Vec::new(),
            _ => {
                let rest = rest
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("expected `:` after signature"))?;
                split_values(rest)
                    .iter()
                    .map(|value| self.resolve(strip_quotes(value)))
                    .collect::<Result<Vec<_>>>()?
            }
        };
        let calldata = abi::encode_with_signature(signature, &values)
            .map_err(|e| invalid(&e.to_string()))?;
        Ok(hex::encode_prefixed(calldata))
    }
}

/// `re.replace_all` with a fallible replacer; `Ok(None)` keeps the match as is.
fn replace<F>(re: &Regex, text: &str, mut replacer: F) -> Result<String>
where
    F: FnMut(&Captures<'_>) -> Result<Option<String>>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        match replacer(&caps)? {
            Some(value) => out.push_str(&value),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Byte index of the `)` closing the `(` at `open`.
fn closing_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split generator values on `:` outside braces and double quotes.
fn split_values(input: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            '{' if !quoted => depth += 1,
            '}' if !quoted => depth = depth.saturating_sub(1),
            ':' if !quoted && depth == 0 => {
                values.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    values.push(current);
    values
}

fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
