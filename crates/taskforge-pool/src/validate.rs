//! Strict-mode input validation.
//!
//! Two checks run at submission time when strict mode is enabled: a
//! case-insensitive scan of the function payload for disallowed substrings
//! (via an [`aho_corasick`] automaton), and a shape check over the argument
//! values. The scan is coarse by design -- it is a defence-in-depth hint in
//! front of the worker runtime's isolation, not a sandbox.

use aho_corasick::AhoCorasick;
use regex::Regex;

use crate::error::{PoolError, Result};

/// Disallowed payload substrings, matched case-insensitively.
///
/// Dynamic module loading, dynamic code construction, process/global access,
/// source-path globals, and subprocess/filesystem identifiers.
const BANNED_PATTERNS: &[&str] = &[
    "import(",
    "require(",
    "new function",
    "eval(",
    "process.",
    "globalthis",
    "global.",
    "__dirname",
    "__filename",
    "child_process",
    "fs.",
];

/// Accepted payload shapes: an arrow form, or a `function` keyword
/// (optionally `async`).
const FUNCTION_FORM: &str =
    r"^\s*(?:async\s+)?(?:function\b|(?:\([^)]*\)|[A-Za-z_$][A-Za-z0-9_$]*)\s*=>)";

/// Nesting depth past which an argument is no longer considered
/// transport-safe.
const MAX_ARG_DEPTH: usize = 32;

/// Submission-time validator for payload text and argument values.
pub struct Validator {
    banned: AhoCorasick,
    form: Regex,
}

impl Validator {
    /// Build the automaton and the form pattern.
    pub fn new() -> Result<Self> {
        let banned = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(BANNED_PATTERNS)
            .map_err(|e| PoolError::Internal(format!("failed to build validator automaton: {e}")))?;

        let form = Regex::new(FUNCTION_FORM)
            .map_err(|e| PoolError::Internal(format!("invalid function-form pattern: {e}")))?;

        Ok(Self { banned, form })
    }

    /// Check the textual function payload against the policy.
    pub fn check_payload(&self, payload: &str) -> Result<()> {
        if !self.form.is_match(payload) {
            return Err(PoolError::Validation {
                reason: "payload is not an arrow function or function declaration".to_string(),
            });
        }

        if let Some(found) = self.banned.find(payload) {
            let pattern = BANNED_PATTERNS[found.pattern().as_usize()];
            tracing::warn!(pattern = %pattern, "submission rejected by payload policy");
            return Err(PoolError::Validation {
                reason: format!("payload contains disallowed pattern `{pattern}`"),
            });
        }

        Ok(())
    }

    /// Check that each argument is transitively a scalar, a sequence of
    /// such, or a string-keyed map of such, within the depth bound.
    pub fn check_args(&self, args: &[serde_json::Value]) -> Result<()> {
        for (index, arg) in args.iter().enumerate() {
            if !transport_safe(arg, MAX_ARG_DEPTH) {
                return Err(PoolError::Validation {
                    reason: format!("argument {index} is not transport-safe"),
                });
            }
        }
        Ok(())
    }
}

/// Recursive shape check with a depth budget.
fn transport_safe(value: &serde_json::Value, depth: usize) -> bool {
    if depth == 0 {
        return false;
    }
    match value {
        serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Number(_)
        | serde_json::Value::String(_) => true,
        serde_json::Value::Array(items) => items.iter().all(|v| transport_safe(v, depth - 1)),
        serde_json::Value::Object(map) => map.values().all(|v| transport_safe(v, depth - 1)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
