//! Model name comparison.

/// Whether two model names refer to the same model.
///
/// Names match when equal, or when one is the other plus an explicit tag:
/// `llama3.1` matches `llama3.1:latest` and `llama3.1:8b`, but `llama3` does
/// not match `llama3.1`. An empty name never matches.
pub fn same_model(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || is_tagged_form(a, b) || is_tagged_form(b, a)
}

fn is_tagged_form(tagged: &str, base: &str) -> bool {
    tagged
        .strip_prefix(base)
        .is_some_and(|rest| rest.starts_with(':'))
}
