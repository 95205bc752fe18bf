use regex::Regex;
use std::sync::OnceLock;

/// Class code and term id pulled out of the `filename` column embedded in an
/// extract row, e.g. `"EHSS-03 final 28-06-21_2021T2T2E"` -> ("EHSS-03", "2021T2T2E").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub class_code: String,
    pub term_id: String,
}

pub fn parse_descriptor(raw: &str) -> SourceDescriptor {
    // Term id is whatever follows the last underscore. A descriptor without
    // any underscore yields itself, which downstream treats as low-confidence.
    let term_id = raw.rsplit('_').next().unwrap_or(raw).to_string();

    let class_code = if raw.contains(' ') {
        raw.split_whitespace().next().unwrap_or(raw)
    } else {
        raw.split('_').next().unwrap_or(raw)
    };

    SourceDescriptor {
        class_code: class_code.to_string(),
        term_id,
    }
}

fn leading_zero_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]{4})-0(\d+)").unwrap())
}

fn base_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]{4}-\d+)").unwrap())
}

/// Derive the LIKE pattern that matches every term-specific class identifier
/// sharing the base course code.
///
/// - `EHSS-03` -> `%EHSS-3%` (single leading zero stripped)
/// - `EHSS-7A` -> `%EHSS-7%` (section suffix discarded)
/// - anything else -> `%<code>%` verbatim, which can overmatch; callers treat
///   results from that form as lower confidence.
pub fn class_pattern(class_code: &str) -> String {
    if let Some(caps) = leading_zero_re().captures(class_code) {
        return format!("%{}-{}%", &caps[1], &caps[2]);
    }
    if let Some(caps) = base_code_re().captures(class_code) {
        return format!("%{}%", &caps[1]);
    }
    format!("%{}%", class_code)
}

fn extract_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^grades_extract_([^_]+)_.*\.csv$").unwrap())
}

/// Term id from an extract file name, e.g.
/// `grades_extract_2021T2T2E_EHSS-02.csv` -> `2021T2T2E`.
pub fn term_id_from_extract_name(file_name: &str) -> Option<String> {
    extract_name_re()
        .captures(file_name)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_with_space_and_term() {
        let d = parse_descriptor("EHSS-03 final 28-06-21_2021T2T2E");
        assert_eq!(d.class_code, "EHSS-03");
        assert_eq!(d.term_id, "2021T2T2E");
    }

    #[test]
    fn descriptor_underscore_form() {
        let d = parse_descriptor("GESL-01_2022T1T1E");
        assert_eq!(d.class_code, "GESL-01");
        assert_eq!(d.term_id, "2022T1T1E");
    }

    #[test]
    fn descriptor_without_structure_falls_back_to_itself() {
        let d = parse_descriptor("whatever");
        assert_eq!(d.class_code, "whatever");
        assert_eq!(d.term_id, "whatever");
    }

    #[test]
    fn pattern_strips_single_leading_zero() {
        assert_eq!(class_pattern("EHSS-03"), "%EHSS-3%");
        assert_eq!(class_pattern("GESL-01"), "%GESL-1%");
        // Only one zero is stripped; the rest of the digits stay.
        assert_eq!(class_pattern("EHSS-003"), "%EHSS-03%");
    }

    #[test]
    fn pattern_discards_section_suffix() {
        assert_eq!(class_pattern("EHSS-7A"), "%EHSS-7%");
        assert_eq!(class_pattern("GESL-12B"), "%GESL-12%");
    }

    #[test]
    fn pattern_fallback_wraps_verbatim() {
        assert_eq!(class_pattern("X1"), "%X1%");
        assert_eq!(class_pattern(""), "%%");
    }

    #[test]
    fn pattern_matches_stripped_form_of_origin() {
        // The derived pattern must match the zero-stripped form of the code
        // it came from.
        let pattern = class_pattern("EHSS-03");
        let inner = pattern.trim_matches('%');
        assert!("EHSS-3".contains(inner));
    }

    #[test]
    fn term_id_from_extract_file_name() {
        assert_eq!(
            term_id_from_extract_name("grades_extract_2021T2T2E_EHSS-02.csv"),
            Some("2021T2T2E".to_string())
        );
        assert_eq!(term_id_from_extract_name("notes.csv"), None);
        assert_eq!(term_id_from_extract_name("grades_extract_.csv"), None);
    }
}
