//! Heuristic extraction of structured constraints from a free-text query.
//!
//! Rules, applied independently:
//!
//! 1. Instructor mentions: every known instructor name of at least
//!    [`MIN_NAME_CHARS`] characters that occurs in the query. Names are
//!    compared both verbatim against the raw query and in normalized form
//!    (NFKC, lowercase, no whitespace) against the normalized query.
//! 2. Negation: when the query contains one of [`NEGATION_MARKERS`] (or an
//!    English negation word), the first name attached to a title marker is
//!    taken as the excluded instructor: "芳賀先生", "佐藤教授",
//!    "Professor Sato Taro".
//! 3. Time slot: the first of periods 1–5 written as "N限", "N講時",
//!    "N時限" (half- or full-width digit) or "period N".

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::corpus::InstructorIndex;
use crate::tokenizer::{name_key, normalize};

/// Shorter names produce too many accidental substring hits.
pub const MIN_NAME_CHARS: usize = 2;

pub const NEGATION_MARKERS: &[&str] = &["以外", "除く", "除いて", "除外", "じゃない", "ではない", "でない"];

lazy_static! {
    static ref ENGLISH_NEGATION: Regex =
        Regex::new(r"(?i)\b(?:not|except|excluding|besides|other than)\b").expect("valid regex");
    // Name run first, title marker after it.
    static ref TITLED_NAME_JA: Regex =
        Regex::new(r"([\p{Han}\p{Katakana}ー々]{1,8}?)\s*(?:准教授|教授|先生|講師|氏)").expect("valid regex");
    // Title marker first, then one to three capitalized words.
    static ref TITLED_NAME_EN: Regex =
        Regex::new(r"(?:(?i:professor|prof\.|dr\.))\s+([A-Z][A-Za-z'\-]*(?:\s+[A-Z][A-Za-z'\-]*){0,2})").expect("valid regex");
    static ref PERIOD_LABELS: Vec<(String, char)> = {
        let mut labels = Vec::new();
        for (half, full) in ['1', '2', '3', '4', '5'].into_iter().zip(['１', '２', '３', '４', '５']) {
            for digit in [half, full] {
                for suffix in ["限", "講時", "時限"] {
                    labels.push((format!("{digit}{suffix}"), half));
                }
            }
            labels.push((format!("period {half}"), half));
        }
        labels
    };
}

/// A query plus the constraints extracted from it. Built per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalQuery {
    pub text: String,
    /// Known instructor names found in the query, as they appear in the corpus.
    pub matched_instructors: Vec<String>,
    pub excluded_instructor: Option<String>,
    /// Half-width digit '1'..='5'.
    pub time_slot_hint: Option<char>,
}

impl RetrievalQuery {
    /// True when `instructor` is the excluded instructor. A partial name
    /// only matches on a name boundary: one whitespace-separated part of the
    /// instructor's name ("芳賀先生" excludes "芳賀 博英"), or the leading
    /// characters of a name written without spaces ("芳賀博英").
    pub fn excludes(&self, instructor: &str) -> bool {
        let Some(excluded) = self.excluded_instructor.as_deref() else {
            return false;
        };
        let excluded = name_key(excluded);
        let key = name_key(instructor);
        if excluded.is_empty() || key.is_empty() {
            return false;
        }
        if key == excluded {
            return true;
        }
        if excluded.chars().count() < MIN_NAME_CHARS {
            return false;
        }
        let mut parts = instructor.split_whitespace();
        if parts.clone().nth(1).is_none() {
            return key.starts_with(&excluded);
        }
        parts.any(|part| name_key(part) == excluded)
    }

    /// True when `instructor` equals one of the matched instructor names.
    pub fn mentions(&self, instructor: &str) -> bool {
        let key = name_key(instructor);
        !key.is_empty() && self.matched_instructors.iter().any(|m| name_key(m) == key)
    }
}

pub fn interpret(raw_query: &str, instructors: &InstructorIndex) -> RetrievalQuery {
    RetrievalQuery {
        text: raw_query.to_string(),
        matched_instructors: match_instructors(raw_query, instructors),
        excluded_instructor: excluded_instructor(raw_query),
        time_slot_hint: time_slot(raw_query),
    }
}

fn match_instructors(raw_query: &str, instructors: &InstructorIndex) -> Vec<String> {
    let query_key = name_key(raw_query);
    let mut matched: Vec<String> = Vec::new();
    for (original, key) in instructors.iter() {
        let hit = (original.chars().count() >= MIN_NAME_CHARS && raw_query.contains(original))
            || (key.chars().count() >= MIN_NAME_CHARS && query_key.contains(key));
        if hit && !matched.iter().any(|m| name_key(m) == key) {
            matched.push(original.to_string());
        }
    }
    matched
}

fn is_negated(raw_query: &str) -> bool {
    NEGATION_MARKERS.iter().any(|m| raw_query.contains(m)) || ENGLISH_NEGATION.is_match(raw_query)
}

fn excluded_instructor(raw_query: &str) -> Option<String> {
    if !is_negated(raw_query) {
        return None;
    }
    let from = |re: &Regex| re.captures(raw_query).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string());
    let name = from(&TITLED_NAME_JA).or_else(|| {
        from(&TITLED_NAME_EN).map(|n| n.trim_end_matches("'s").trim_end_matches('\'').to_string())
    })?;
    (name.chars().count() >= MIN_NAME_CHARS).then_some(name)
}

fn time_slot(raw_query: &str) -> Option<char> {
    let folded = normalize(raw_query);
    PERIOD_LABELS
        .iter()
        .find(|(label, _)| raw_query.contains(label.as_str()) || folded.contains(label.as_str()))
        .map(|(_, digit)| *digit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use serde_json::json;

    fn instructors(names: &[&str]) -> InstructorIndex {
        let records = names.iter().enumerate().map(|(i, n)| {
            let v = json!({"科目名": format!("科目{i}"), "教授名": n});
            v.as_object().cloned().unwrap_or_default()
        });
        Corpus::from_records(records).instructors().clone()
    }

    #[test]
    fn matches_name_despite_spacing() {
        let idx = instructors(&["芳賀 博英", "佐藤 太郎"]);
        let q = interpret("芳賀博英先生の授業を教えて", &idx);
        assert_eq!(q.matched_instructors, vec!["芳賀 博英"]);

        let q = interpret("What does Sato Taro teach?", &instructors(&["Sato Taro"]));
        assert_eq!(q.matched_instructors, vec!["Sato Taro"]);
    }

    #[test]
    fn full_width_space_in_corpus_matches_plain_query() {
        let idx = instructors(&["芳賀\u{3000}博英"]);
        let q = interpret("芳賀 博英 の講義", &idx);
        assert_eq!(q.matched_instructors, vec!["芳賀\u{3000}博英"]);
        assert!(q.mentions("芳賀博英"));
    }

    #[test]
    fn single_character_names_never_match() {
        let idx = instructors(&["林"]);
        assert!(interpret("林の授業", &idx).matched_instructors.is_empty());
    }

    #[test]
    fn negation_extracts_titled_name() {
        let idx = InstructorIndex::default();
        let q = interpret("芳賀先生以外の講義を教えて", &idx);
        assert_eq!(q.excluded_instructor.as_deref(), Some("芳賀"));
        assert!(q.excludes("芳賀 博英"));
        assert!(q.excludes("芳賀\u{3000}博英"));
        assert!(q.excludes("芳賀博英"));
        assert!(!q.excludes("佐藤 太郎"));
        assert!(!q.excludes("古芳賀 一郎"));

        let q = interpret("情報系の佐藤准教授を除く授業", &idx);
        assert_eq!(q.excluded_instructor.as_deref(), Some("佐藤"));

        let q = interpret("all courses except Professor Sato Taro", &idx);
        assert_eq!(q.excluded_instructor.as_deref(), Some("Sato Taro"));
    }

    #[test]
    fn titled_name_without_negation_is_not_excluded() {
        let q = interpret("芳賀先生の授業", &InstructorIndex::default());
        assert_eq!(q.excluded_instructor, None);
    }

    #[test]
    fn time_slot_in_both_widths() {
        let idx = InstructorIndex::default();
        assert_eq!(interpret("2限の授業", &idx).time_slot_hint, Some('2'));
        assert_eq!(interpret("３講時に空きがある", &idx).time_slot_hint, Some('3'));
        assert_eq!(interpret("courses in Period 5", &idx).time_slot_hint, Some('5'));
        assert_eq!(interpret("6限", &idx).time_slot_hint, None);
    }
}
