use rand::{RngCore, rngs::OsRng};

/// 12 hex chars of OS randomness, enough to keep scratch directories apart.
pub fn short_id() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Turns a branch name into something usable as a single path component.
/// `feature/login` -> `feature-login`
pub fn slug(branch: &str) -> String {
    let slug: String = branch
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '-',
        })
        .collect();
    slug.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Name of a never-before-used scratch directory for `branch`.
pub fn scratch_name(branch: &str) -> String {
    format!("{}-{}", slug(branch), short_id())
}
