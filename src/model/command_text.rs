//! Recognition of embedded command expressions.
//!
//! A prompt or reference value of the shape
//! `{{ DEFAULT "…" HASROLE(…) SAYS "…" }}` is not resolved or evaluated here;
//! the editor only needs to recognize the syntax so it can store the text
//! verbatim (deferred evaluation) or skip the interactive field-creation
//! steps.

use regex::Regex;
use std::sync::LazyLock;

static OUTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\{\{.+\}\}$").expect("outer command regex"));

// Quoted strings are matched escape-aware ("…\"…") rather than with
// look-behind, which the regex crate does not support.
static VALID: LazyLock<Regex> = LazyLock::new(|| {
    let quoted = r#""(?:[^"\\]|\\.)*""#;
    let params = format!(r"(?:\d{{16,23}}(?:\s*,\s*\d{{16,23}})*|{quoted}(?:\s*,\s*{quoted})*)");
    let clause = format!(r"(?:HASROLE|HASANYROLE|FIELDVALUE)\(\s*{params}\s*\)\s*SAYS\s*{quoted}");
    Regex::new(&format!(
        r"(?si)^\{{\{{\s*DEFAULT\s*{quoted}(?:\s*{clause})+\s*\}}\}}$"
    ))
    .expect("valid command regex")
});

/// Whether the text has the outer `{{…}}` command shape at all.
pub fn is_command(text: &str) -> bool {
    OUTER.is_match(text)
}

/// Whether the text is a complete, well-formed command expression.
pub fn is_valid_command(text: &str) -> bool {
    VALID.is_match(text)
}

/// A command expression the editor should keep verbatim instead of treating
/// as user input to be resolved.
pub fn is_recognized(text: &str) -> bool {
    is_command(text) && is_valid_command(text)
}
