use crate::store;

// checked in this order so that `b` does not shadow `beta`
const QUALIFIERS: [&str; 4] = ["rc", "alpha", "beta", "b"];
const SEPARATORS: [char; 3] = ['.', '_', '-'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualifier {
    pub name: String,
    pub number: Option<u32>,
}

/// A tag name reduced to a comparable version vector.
#[derive(Debug, Clone)]
pub struct ParsedTag {
    pub original: String,
    pub revision: String,
    pub corrected_revision: Option<String>,
    pub version: Vec<u32>,
    pub qualifier: Option<Qualifier>,
    pub flier: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TagFilter {
    pub discard_qualifiers: bool,
    pub discard_fliers: bool,
    pub discard_patch: bool,
}

impl Default for TagFilter {
    fn default() -> TagFilter {
        TagFilter {
            discard_qualifiers: true,
            discard_fliers: true,
            discard_patch: false,
        }
    }
}

/// Parse every tag of the project into a version vector, mark fliers, and
/// apply the requested filters.
pub fn filter_tags(project: &str, tags: &[&store::Tag], options: &TagFilter) -> Vec<ParsedTag> {
    let mut parsed: Vec<ParsedTag> = tags
        .iter()
        .map(|tag| {
            let (version, qualifier) = parse_version(&tag.name, project);
            ParsedTag {
                original: tag.name.clone(),
                revision: tag.revision_hash.clone(),
                corrected_revision: tag.corrected_revision.clone(),
                version,
                qualifier,
                flier: false,
            }
        })
        .collect();

    mark_fliers(&mut parsed);

    if options.discard_qualifiers {
        parsed.retain(|tag| tag.qualifier.is_none());
    }
    if options.discard_fliers {
        parsed.retain(|tag| !tag.flier);
    }
    if options.discard_patch {
        for tag in &mut parsed {
            tag.version.truncate(2);
        }
    }
    parsed
}

/// Reduce a tag name to a zero-padded version vector plus an optional
/// pre-release qualifier.
fn parse_version(name: &str, project: &str) -> (Vec<u32>, Option<Qualifier>) {
    let mut remainder = name.to_lowercase();

    let mut qualifier = None;
    for candidate in QUALIFIERS {
        if let Some(pos) = remainder.find(candidate) {
            let suffix = remainder[pos + candidate.len()..].to_string();
            let number = if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                suffix.parse().ok()
            } else {
                None
            };
            qualifier = Some(Qualifier {
                name: candidate.to_string(),
                number,
            });
            remainder.truncate(pos);
            break;
        }
    }

    let remainder = remainder.replace(&project.to_lowercase(), "");
    let cleaned: String = remainder.chars().filter(|c| !c.is_alphabetic()).collect();

    let mut version: Vec<u32> = cleaned
        .split(best_separator(&cleaned))
        .map(|part| part.chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|digits| !digits.is_empty())
        .filter_map(|digits| digits.parse().ok())
        .collect();
    while version.len() < 3 {
        version.push(0);
    }

    (version, qualifier)
}

/// The separator that yields the most all-digit components; earlier
/// candidates win ties.
fn best_separator(cleaned: &str) -> char {
    let mut best = SEPARATORS[0];
    let mut best_count = 0;
    for separator in SEPARATORS {
        let count = cleaned
            .split(separator)
            .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
            .count();
        if count > best_count {
            best = separator;
            best_count = count;
        }
    }
    best
}

/// Mark tags whose major version falls outside `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`
/// over the sample of tag majors.
fn mark_fliers(tags: &mut [ParsedTag]) {
    if tags.len() < 2 {
        return;
    }
    let mut majors: Vec<f64> = tags.iter().map(|tag| tag.version[0] as f64).collect();
    majors.sort_by(f64::total_cmp);

    let q1 = percentile(&majors, 0.25);
    let q3 = percentile(&majors, 0.75);
    let reach = 1.5 * (q3 - q1);
    for tag in tags {
        let major = tag.version[0] as f64;
        tag.flier = major < q1 - reach || major > q3 + reach;
    }
}

// midpoint of the neighbors when the quantile index is integral, the next
// sample otherwise
fn percentile(sorted: &[f64], quantile: f64) -> f64 {
    let index = quantile * sorted.len() as f64;
    if index.fract() == 0.0 {
        let i = (index as usize).clamp(1, sorted.len() - 1);
        (sorted[i - 1] + sorted[i]) / 2.0
    } else {
        sorted[(index.floor() as usize).min(sorted.len() - 1)]
    }
}

/// Normalize an issue-tracker "affects version" string into a version vector
/// comparable against parsed tags.
pub fn affected_version(raw: &str, project: &str, jira_key: &str) -> Option<Vec<u32>> {
    let mut value = raw.to_lowercase();
    value = value.replace(&project.to_lowercase(), "");
    if !jira_key.is_empty() {
        value = value.replace(&jira_key.to_lowercase(), "");
    }

    let parts: Vec<u32> = value
        .split('.')
        .map(|part| part.chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|digits| !digits.is_empty())
        .filter_map(|digits| digits.parse().ok())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// Whether the affected version is a numeric prefix of the tag version:
/// `3.0` from the tracker matches tags `3.0.0` and `3.0.4` but not `3.1.0`.
pub fn prefix_matches(tag_version: &[u32], affected: &[u32]) -> bool {
    affected
        .iter()
        .zip(tag_version.iter())
        .all(|(affected_part, tag_part)| affected_part == tag_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> store::Tag {
        store::Tag {
            id: 0,
            vcs_system_id: 0,
            name: name.to_string(),
            revision_hash: "0000".to_string(),
            corrected_revision: None,
        }
    }

    fn parse_all(project: &str, names: &[&str], options: &TagFilter) -> Vec<ParsedTag> {
        let tags: Vec<store::Tag> = names.iter().map(|name| tag(name)).collect();
        let refs: Vec<&store::Tag> = tags.iter().collect();
        filter_tags(project, &refs, options)
    }

    #[test]
    fn semver_tag_parses_to_three_components() {
        let (version, qualifier) = parse_version("3.1.4", "foo");
        assert_eq!(version, vec![3, 1, 4]);
        assert!(qualifier.is_none());
    }

    #[test]
    fn short_versions_are_zero_padded() {
        assert_eq!(parse_version("3.0", "foo").0, vec![3, 0, 0]);
        assert_eq!(parse_version("3", "foo").0, vec![3, 0, 0]);
    }

    #[test]
    fn qualifier_is_split_off_before_parsing() {
        let (version, qualifier) = parse_version("foo-3.0rc1", "foo");
        assert_eq!(version, vec![3, 0, 0]);
        assert_eq!(
            qualifier,
            Some(Qualifier {
                name: "rc".to_string(),
                number: Some(1),
            })
        );
    }

    #[test]
    fn beta_wins_over_plain_b() {
        let (_, qualifier) = parse_version("1.2.0-beta2", "foo");
        assert_eq!(qualifier.unwrap().name, "beta");
    }

    #[test]
    fn underscore_separated_tags_parse() {
        assert_eq!(parse_version("release_1_2_3", "foo").0, vec![1, 2, 3]);
    }

    #[test]
    fn project_name_is_removed() {
        assert_eq!(parse_version("foo-2.5", "foo").0, vec![2, 5, 0]);
    }

    #[test]
    fn qualifiers_are_discarded_by_default() {
        let parsed = parse_all("foo", &["3.0", "3.0rc1"], &TagFilter::default());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].original, "3.0");
    }

    #[test]
    fn qualifiers_can_be_kept() {
        let options = TagFilter {
            discard_qualifiers: false,
            ..TagFilter::default()
        };
        let parsed = parse_all("foo", &["3.0", "3.0rc1"], &options);
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn discard_patch_truncates_versions() {
        let options = TagFilter {
            discard_patch: true,
            ..TagFilter::default()
        };
        let parsed = parse_all("foo", &["1.2.3"], &options);
        assert_eq!(parsed[0].version, vec![1, 2]);
    }

    #[test]
    fn outlier_majors_are_marked_as_fliers() {
        let options = TagFilter {
            discard_fliers: false,
            ..TagFilter::default()
        };
        let parsed = parse_all("foo", &["1.0", "1.1", "1.2", "1.3", "99.0"], &options);
        let fliers: Vec<bool> = parsed.iter().map(|tag| tag.flier).collect();
        assert_eq!(fliers, vec![false, false, false, false, true]);

        let kept = parse_all("foo", &["1.0", "1.1", "1.2", "1.3", "99.0"], &TagFilter::default());
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn affected_versions_are_normalized() {
        assert_eq!(affected_version("3.0.1", "foo", "FOO"), Some(vec![3, 0, 1]));
        assert_eq!(affected_version("foo 3.0", "foo", "FOO"), Some(vec![3, 0]));
        assert_eq!(affected_version("unknown", "foo", "FOO"), None);
    }

    #[test]
    fn prefix_match_is_numeric() {
        assert!(prefix_matches(&[3, 0, 0], &[3, 0]));
        assert!(prefix_matches(&[3, 0, 4], &[3, 0]));
        assert!(!prefix_matches(&[3, 1, 0], &[3, 0]));
        assert!(prefix_matches(&[3, 0, 0], &[3, 0, 0]));
    }
}
