/// Returns true when `candidate` is a usable display name: at least one
/// character, all of them ASCII letters or digits.
pub fn is_valid(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}
