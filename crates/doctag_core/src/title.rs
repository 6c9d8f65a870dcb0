pub const DOC_SUFFIX: &str = "/doc";

pub fn is_doc_title(title: &str) -> bool {
    title.ends_with(DOC_SUFFIX)
}

/// Documentation subpage for `candidate`. Already-suffixed titles pass through.
pub fn doc_title(candidate: &str) -> String {
    if is_doc_title(candidate) {
        candidate.to_string()
    } else {
        format!("{candidate}{DOC_SUFFIX}")
    }
}

/// Full title of page `key` in the namespace called `namespace_name`.
///
/// Listing cursors are database keys, so underscores become spaces.
pub fn qualified_title(namespace_name: &str, key: &str) -> String {
    let key = key.replace('_', " ");
    if namespace_name.is_empty() {
        key
    } else {
        format!("{namespace_name}:{key}")
    }
}

/// Listing cursor for a stored checkpoint title.
///
/// Older records hold the last processed doc page as a full title
/// (`Template:X/doc`). Those resume at the base page key `X`. Bare keys are
/// used as they are.
pub fn resume_key(title: &str, namespace_name: &str) -> String {
    let title = title.trim();
    let legacy = match title.split_once(':') {
        Some((prefix, rest)) if !namespace_name.is_empty() => prefix
            .trim()
            .eq_ignore_ascii_case(namespace_name)
            .then_some(rest.trim()),
        _ => None,
    };
    let key = match legacy {
        Some(rest) => rest.strip_suffix(DOC_SUFFIX).unwrap_or(rest),
        None => title,
    };
    key.replace(' ', "_")
}
