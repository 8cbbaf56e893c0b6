//! Release version comparison.

/// Returns `true` if `latest` is newer than `current`.
///
/// Both sides are tried as semver first (a leading `v` is ignored). When
/// either fails to parse, falls back to comparing the dotted numeric
/// segments, where a release without a suffix beats a pre-release of the
/// same numbers.
pub fn is_newer(current: &str, latest: &str) -> bool {
    let current = current.trim().trim_start_matches('v');
    let latest = latest.trim().trim_start_matches('v');

    if let (Ok(c), Ok(l)) = (
        semver::Version::parse(current),
        semver::Version::parse(latest),
    ) {
        return l > c;
    }

    let numeric = |v: &str| -> Vec<u64> {
        v.split(['-', '+'])
            .next()
            .unwrap_or_default()
            .split('.')
            .filter_map(|s| s.parse::<u64>().ok())
            .collect()
    };

    let c_parts = numeric(current);
    let l_parts = numeric(latest);

    for i in 0..std::cmp::max(c_parts.len(), l_parts.len()) {
        let cv = c_parts.get(i).unwrap_or(&0);
        let lv = l_parts.get(i).unwrap_or(&0);
        if lv > cv {
            return true;
        }
        if cv > lv {
            return false;
        }
    }

    // Same numbers: stable beats pre-release, two pre-releases compare lexically.
    let has_suffix = |v: &str| v.contains('-') || v.chars().any(char::is_alphabetic);
    match (has_suffix(current), has_suffix(latest)) {
        (true, false) => true,
        (true, true) => latest > current,
        _ => false,
    }
}
