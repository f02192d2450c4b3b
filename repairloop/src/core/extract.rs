//! Code extraction from completions and entry-point discovery.

use std::sync::LazyLock;

use regex::Regex;

static PYTHON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)[^\n]*\n(.*?)(?:```|\z)").expect("python fence regex")
});

static ANY_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)(?:```|\z)").expect("fence regex"));

static TOP_LEVEL_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("def regex")
});

/// Extract program text from a model completion.
///
/// Prefers the first ```` ```python ```` block, then the first fenced block of
/// any language, then the whole completion. An unterminated fence runs to the
/// end of the text. The result is trimmed and may be empty.
pub fn extract_code(completion: &str) -> String {
    if let Some(caps) = PYTHON_FENCE_RE.captures(completion) {
        return caps[1].trim().to_string();
    }
    if let Some(caps) = ANY_FENCE_RE.captures(completion) {
        return caps[1].trim().to_string();
    }
    completion.trim().to_string()
}

/// Name of the first top-level function definition, if any.
pub fn find_entry_point(code: &str) -> Option<String> {
    TOP_LEVEL_DEF_RE
        .captures(code)
        .map(|caps| caps[1].to_string())
}

/// True if `code` defines `name` as a top-level function.
pub fn defines_function(code: &str, name: &str) -> bool {
    TOP_LEVEL_DEF_RE
        .captures_iter(code)
        .any(|caps| &caps[1] == name)
}

/// Decide which callable the harness should exercise.
///
/// A configured entry point must be defined at top level; without one the
/// first top-level function is used.
pub fn resolve_entry_point(code: &str, configured: Option<&str>) -> Option<String> {
    match configured {
        Some(name) => defines_function(code, name).then(|| name.to_string()),
        None => find_entry_point(code),
    }
}

/// True for completions that carry no usable program text.
pub fn is_blank(code: &str) -> bool {
    let trimmed = code.trim();
    trimmed.is_empty() || trimmed == "error"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_python_fence_over_other_fences() {
        let completion =
            "Here:\n```text\nnot code\n```\n```python\ndef f(x):\n    return x\n```\nDone.";
        assert_eq!(extract_code(completion), "def f(x):\n    return x");
    }

    #[test]
    fn extracts_generic_fence_when_no_python_fence() {
        let completion = "```\ndef g():\n    pass\n```";
        assert_eq!(extract_code(completion), "def g():\n    pass");
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let completion = "```python\ndef h():\n    return 1\n";
        assert_eq!(extract_code(completion), "def h():\n    return 1");
    }

    #[test]
    fn plain_text_is_trimmed() {
        assert_eq!(extract_code("  def k(): pass \n"), "def k(): pass");
    }

    #[test]
    fn finds_first_top_level_def_only() {
        let code = "import math\n\n    def inner():\n        pass\n\ndef outer(a):\n    return a\n\ndef second():\n    pass\n";
        assert_eq!(find_entry_point(code).as_deref(), Some("outer"));
    }

    #[test]
    fn no_def_means_no_entry_point() {
        assert_eq!(find_entry_point("x = 1\nprint(x)\n"), None);
    }

    #[test]
    fn configured_entry_point_must_be_defined() {
        let code = "def helper():\n    pass\n\ndef sum_list(xs):\n    return sum(xs)\n";
        assert_eq!(
            resolve_entry_point(code, Some("sum_list")).as_deref(),
            Some("sum_list")
        );
        assert_eq!(resolve_entry_point(code, Some("missing")), None);
        assert_eq!(resolve_entry_point(code, None).as_deref(), Some("helper"));
    }

    #[test]
    fn error_marker_counts_as_blank() {
        assert!(is_blank("  "));
        assert!(is_blank("error"));
        assert!(!is_blank("def f(): pass"));
    }
}
