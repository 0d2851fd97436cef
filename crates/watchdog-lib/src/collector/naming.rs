/// Label used when no candidate name is usable
const UNKNOWN_NAME: &str = "unknown";

/// Pick a display name from runtime-supplied candidates
///
/// Docker reports names with a leading slash (`/web`), which is stripped.
pub fn display_name(candidates: &[String]) -> String {
    candidates
        .iter()
        .map(|c| c.trim().trim_start_matches('/'))
        .find(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_NAME)
        .to_string()
}
