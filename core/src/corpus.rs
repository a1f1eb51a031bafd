use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CorpusError;
use crate::tokenizer::name_key;
use crate::Document;

/// One syllabus entry as found in the source, before rendering.
///
/// Field names follow the Japanese syllabus export; English names are
/// accepted as well.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourseRecord {
    #[serde(rename = "科目名", alias = "subject", alias = "title")]
    pub subject: Option<String>,
    #[serde(rename = "学科", alias = "department")]
    pub department: Option<String>,
    #[serde(rename = "教授名", alias = "instructor", alias = "担当者")]
    pub instructor: Option<String>,
    #[serde(rename = "開講学期", alias = "semester")]
    pub semester: Option<String>,
    #[serde(rename = "曜日・時限", alias = "day_period")]
    pub day_period: Option<String>,
    #[serde(rename = "単位数", alias = "credits", default, deserialize_with = "string_or_number")]
    pub credits: Option<String>,
    #[serde(rename = "授業形態", alias = "format")]
    pub format: Option<String>,
    /// Face-to-face, online, ...
    #[serde(rename = "実施方法", alias = "delivery")]
    pub delivery: Option<String>,
    #[serde(rename = "概要", alias = "overview")]
    pub overview: Option<String>,
    #[serde(rename = "到達目標", alias = "objectives")]
    pub objectives: Option<String>,
    #[serde(rename = "授業計画", alias = "schedule", default, deserialize_with = "lenient")]
    pub schedule: Option<Vec<ScheduleEntry>>,
    #[serde(rename = "成績評価基準", alias = "grading_criteria", default, deserialize_with = "lenient")]
    pub grading_criteria: Option<Vec<GradingCriterion>>,
    #[serde(rename = "成績評価結果", alias = "grading_results", default, deserialize_with = "lenient")]
    pub grading_results: Option<BTreeMap<String, Value>>,
    /// Pre-flattened free text from older exports.
    #[serde(rename = "text", alias = "本文")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEntry {
    #[serde(rename = "回", alias = "session", alias = "period", default, deserialize_with = "string_or_number")]
    pub session: Option<String>,
    #[serde(rename = "内容", alias = "content")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradingCriterion {
    #[serde(rename = "項目", alias = "item")]
    pub item: Option<String>,
    #[serde(rename = "割合", alias = "proportion", default, deserialize_with = "string_or_number")]
    pub proportion: Option<String>,
    #[serde(rename = "詳細", alias = "detail")]
    pub detail: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Nested fields that do not have the expected shape are ignored rather
/// than failing the whole record.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(value) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed nested field");
            Ok(None)
        }
    }
}

/// Source column names per record field, canonical name first.
const FIELD_NAMES: &[&[&str]] = &[
    &["科目名", "subject", "title"],
    &["学科", "department"],
    &["教授名", "instructor", "担当者"],
    &["開講学期", "semester"],
    &["曜日・時限", "day_period"],
    &["単位数", "credits"],
    &["授業形態", "format"],
    &["実施方法", "delivery"],
    &["概要", "overview"],
    &["到達目標", "objectives"],
    &["授業計画", "schedule"],
    &["成績評価基準", "grading_criteria"],
    &["成績評価結果", "grading_results"],
    &["text", "本文"],
];

/// Fields whose delimited-file cells hold JSON.
const NESTED_FIELDS: &[&str] = &["授業計画", "成績評価基準", "成績評価結果"];

fn canonical_field(key: &str) -> &str {
    FIELD_NAMES
        .iter()
        .find(|names| names.contains(&key))
        .map(|names| names[0])
        .unwrap_or(key)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_labeled(lines: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        lines.push(format!("{label}: {v}"));
    }
}

impl CourseRecord {
    /// Render every present field into one labeled text blob, in a fixed order.
    pub fn render_text(&self) -> String {
        let mut lines = Vec::new();
        push_labeled(&mut lines, "科目名", self.subject.as_deref());
        push_labeled(&mut lines, "学科", self.department.as_deref());
        push_labeled(&mut lines, "教授名", self.instructor.as_deref());
        push_labeled(&mut lines, "開講学期", self.semester.as_deref());
        push_labeled(&mut lines, "曜日・時限", self.day_period.as_deref());
        push_labeled(&mut lines, "単位数", self.credits.as_deref());
        push_labeled(&mut lines, "授業形態", self.format.as_deref());
        push_labeled(&mut lines, "実施方法", self.delivery.as_deref());
        push_labeled(&mut lines, "概要", self.overview.as_deref());
        push_labeled(&mut lines, "到達目標", self.objectives.as_deref());

        if let Some(schedule) = self.schedule.as_ref().filter(|s| !s.is_empty()) {
            lines.push("授業計画:".to_string());
            for (i, entry) in schedule.iter().enumerate() {
                let session = entry.session.clone().unwrap_or_else(|| (i + 1).to_string());
                let content = entry.content.as_deref().unwrap_or("").trim();
                lines.push(format!("  - 第{session}回: {content}"));
            }
        }

        if let Some(criteria) = self.grading_criteria.as_ref().filter(|c| !c.is_empty()) {
            lines.push("成績評価基準:".to_string());
            for c in criteria {
                let item = c.item.as_deref().unwrap_or("").trim();
                let mut line = format!("  - {item}");
                if let Some(p) = c.proportion.as_deref().filter(|p| !p.trim().is_empty()) {
                    line.push_str(&format!(" ({})", p.trim()));
                }
                if let Some(d) = c.detail.as_deref().filter(|d| !d.trim().is_empty()) {
                    line.push_str(&format!(": {}", d.trim()));
                }
                lines.push(line);
            }
        }

        if let Some(results) = self.grading_results.as_ref().filter(|r| !r.is_empty()) {
            let summary = results
                .iter()
                .map(|(grade, value)| format!("{grade}: {}", display_value(value)))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("成績評価結果: {summary}"));
        }

        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            lines.push(text.to_string());
        }

        lines.join("\n")
    }

    fn period(&self) -> String {
        [self.semester.as_deref(), self.day_period.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Document {
    /// Returns `None` when the record has no subject name.
    pub fn from_record(record: &CourseRecord, raw: Map<String, Value>) -> Option<Document> {
        let title = record.subject.as_deref().map(str::trim).filter(|s| !s.is_empty())?.to_string();
        Some(Document {
            title,
            instructor: record.instructor.as_deref().map(str::trim).unwrap_or("").to_string(),
            period: record.period(),
            text: record.render_text(),
            raw,
        })
    }
}

#[derive(Debug, Clone)]
struct InstructorName {
    original: String,
    key: String,
}

/// Known instructor names, kept in original and whitespace-normalized form.
#[derive(Debug, Clone, Default)]
pub struct InstructorIndex {
    names: Vec<InstructorName>,
}

impl InstructorIndex {
    pub fn from_documents(documents: &[Document]) -> Self {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for doc in documents {
            let original = doc.instructor().trim();
            if original.is_empty() || !seen.insert(original.to_string()) {
                continue;
            }
            names.push(InstructorName { original: original.to_string(), key: name_key(original) });
        }
        names.sort_by(|a, b| a.original.cmp(&b.original));
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `(original, normalized)` pairs in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|n| (n.original.as_str(), n.key.as_str()))
    }
}

/// The loaded documents plus the instructor side-index. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<Document>,
    instructors: InstructorIndex,
    source: Option<PathBuf>,
}

impl Corpus {
    /// Build a corpus from raw key/value records, skipping records that are
    /// malformed or have no subject name.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let mut documents = Vec::new();
        let mut skipped = 0usize;
        for raw in records {
            let cleaned = clean_record(&raw);
            let record: CourseRecord = match serde_json::from_value(Value::Object(cleaned)) {
                Ok(r) => r,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping malformed record");
                    skipped += 1;
                    continue;
                }
            };
            match Document::from_record(&record, raw) {
                Some(doc) => documents.push(doc),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "records without a usable subject name were skipped");
        }
        let instructors = InstructorIndex::from_documents(&documents);
        Self { documents, instructors, source: None }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, doc_id: crate::DocId) -> Option<&Document> {
        self.documents.get(doc_id as usize)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn instructors(&self) -> &InstructorIndex {
        &self.instructors
    }

    /// Path the corpus was loaded from, if any. Identifies the dense-vector cache.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Trim string values, drop empty or null fields so that blank CSV cells
/// read as absent, and fold alias column names onto one canonical name.
/// When a record carries a field under several names the first non-empty
/// one wins.
fn clean_record(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = Map::new();
    for (key, value) in raw {
        let key = key.trim_start_matches('\u{feff}').trim();
        if key.is_empty() {
            continue;
        }
        let value = match value {
            Value::Null => continue,
            Value::String(s) => match s.trim() {
                "" => continue,
                s => Value::String(s.to_string()),
            },
            other => other.clone(),
        };
        let field = canonical_field(key);
        if cleaned.contains_key(field) {
            tracing::debug!(field, alias = key, "ignoring duplicate field");
            continue;
        }
        cleaned.insert(field.to_string(), value);
    }
    cleaned
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Json,
    JsonLines,
    Delimited(u8),
}

impl SourceFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|s| s.to_str())?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "jsonl" => Some(Self::JsonLines),
            "csv" => Some(Self::Delimited(b',')),
            "tsv" => Some(Self::Delimited(b'\t')),
            _ => None,
        }
    }
}

/// Load a corpus from a JSON array, JSON Lines, CSV or TSV file.
pub fn load_corpus<P: AsRef<Path>>(path: P) -> Result<Corpus, CorpusError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CorpusError::NotFound(path.to_path_buf()));
    }
    let format = SourceFormat::from_path(path).ok_or_else(|| CorpusError::UnsupportedFormat(path.to_path_buf()))?;
    let content = fs::read_to_string(path).map_err(|source| CorpusError::Io { path: path.to_path_buf(), source })?;
    let content = content.trim_start_matches('\u{feff}');

    let parse_error = |message: String| CorpusError::Parse { path: path.to_path_buf(), message };
    let records = match format {
        SourceFormat::Json => parse_json(content).map_err(|e| parse_error(e.to_string()))?,
        SourceFormat::JsonLines => parse_json_lines(content),
        SourceFormat::Delimited(delimiter) => parse_delimited(content, delimiter).map_err(|e| parse_error(e.to_string()))?,
    };

    let mut corpus = Corpus::from_records(records);
    if corpus.is_empty() {
        return Err(CorpusError::Empty(path.to_path_buf()));
    }
    corpus.source = Some(path.to_path_buf());
    tracing::info!(
        path = %path.display(),
        num_docs = corpus.len(),
        num_instructors = corpus.instructors().len(),
        "loaded corpus"
    );
    Ok(corpus)
}

fn parse_json(content: &str) -> Result<Vec<Map<String, Value>>, serde_json::Error> {
    let json: Value = serde_json::from_str(content)?;
    Ok(match json {
        Value::Array(arr) => arr
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    })
}

fn parse_json_lines(content: &str) -> Vec<Map<String, Value>> {
    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => records.push(map),
            Ok(_) => tracing::debug!(line = lineno + 1, "skipping non-object line"),
            Err(err) => tracing::debug!(line = lineno + 1, error = %err, "skipping malformed line"),
        }
    }
    records
}

fn parse_delimited(content: &str, delimiter: u8) -> Result<Vec<Map<String, Value>>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (rowno, row) in reader.records().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(row = rowno + 1, error = %err, "skipping unreadable row");
                continue;
            }
        };
        let mut map = Map::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            let cell = cell.trim_start_matches('\u{feff}').trim();
            if header.is_empty() || cell.is_empty() {
                continue;
            }
            map.insert(header.clone(), cell_value(header, cell));
        }
        records.push(map);
    }
    Ok(records)
}

/// Nested fields arrive as JSON text inside a single cell. Every other cell,
/// and a nested cell that is not valid JSON, stays a string.
fn cell_value(header: &str, cell: &str) -> Value {
    if NESTED_FIELDS.contains(&canonical_field(header)) {
        match serde_json::from_str(cell) {
            Ok(v) => return v,
            Err(err) => tracing::debug!(field = header, error = %err, "nested cell is not JSON"),
        }
    }
    Value::String(cell.to_string())
}
