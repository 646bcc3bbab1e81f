use crate::registry::split_extension;

pub const MAX_NAME_CHARS: usize = 200;
const MAX_KEPT_EXTENSION_CHARS: usize = 20;
const INVALID: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Makes `name` safe to use as a single path component on every platform
/// the vault may be synced to.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }
    if trimmed.chars().count() <= MAX_NAME_CHARS {
        return trimmed.to_string();
    }

    let (stem, ext) = split_extension(trimmed);
    let ext_chars = ext.chars().count();
    if ext.is_empty() || ext_chars > MAX_KEPT_EXTENSION_CHARS {
        return trimmed.chars().take(MAX_NAME_CHARS).collect();
    }
    let stem: String = stem.chars().take(MAX_NAME_CHARS - ext_chars).collect();
    format!("{stem}{ext}")
}
