use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tokenizer::ngram_counts;
use crate::{DocId, TermId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub weight: f32, // normalized tf-idf weight
}

/// Character n-gram inverted index with L2-normalized TF-IDF document vectors.
///
/// Scoring a query is a sparse dot product against the postings of the
/// query's known n-grams, i.e. cosine similarity.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NgramIndex {
    pub dictionary: HashMap<String, TermId>,
    pub idf: Vec<f32>,
    pub postings: Vec<Vec<Posting>>, // indexed by term id, sorted by doc_id
    pub num_docs: u32,
}

#[inline]
fn sublinear_tf(tf_raw: u32) -> f32 {
    if tf_raw > 0 { 1.0 + (tf_raw as f32).ln() } else { 0.0 }
}

/// Smoothed IDF, ln((1 + N) / (1 + df)) + 1. Always positive.
#[inline]
fn smoothed_idf(num_docs: u32, df: u32) -> f32 {
    ((1.0 + num_docs as f32) / (1.0 + df as f32)).ln() + 1.0
}

impl NgramIndex {
    /// Build from document texts; document ids follow iteration order.
    pub fn build<'a, I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut dictionary: HashMap<String, TermId> = HashMap::new();
        let mut df: Vec<u32> = Vec::new();
        let mut postings_raw: Vec<Vec<(DocId, u32)>> = Vec::new();
        let mut num_docs: u32 = 0;

        for text in texts {
            let doc_id = num_docs;
            num_docs += 1;
            // Sort so term ids are assigned deterministically
            let mut counts: Vec<(String, u32)> = ngram_counts(text).into_iter().collect();
            counts.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            for (term, tf_raw) in counts {
                let next_id = dictionary.len() as TermId;
                let tid = *dictionary.entry(term).or_insert(next_id);
                if tid == next_id {
                    df.push(0);
                    postings_raw.push(Vec::new());
                }
                df[tid as usize] += 1;
                postings_raw[tid as usize].push((doc_id, tf_raw));
            }
        }

        let idf: Vec<f32> = df.iter().map(|&d| smoothed_idf(num_docs, d)).collect();

        // First pass: accumulate document norms
        let mut doc_norms: Vec<f32> = vec![0.0; num_docs as usize];
        for (tid, plist) in postings_raw.iter().enumerate() {
            for &(doc_id, tf_raw) in plist {
                let w = sublinear_tf(tf_raw) * idf[tid];
                doc_norms[doc_id as usize] += w * w;
            }
        }
        for dn in doc_norms.iter_mut() {
            *dn = dn.sqrt();
            if *dn == 0.0 { *dn = 1.0; }
        }

        // Second pass: normalized postings
        let postings = postings_raw
            .into_iter()
            .enumerate()
            .map(|(tid, plist)| {
                plist
                    .into_iter()
                    .map(|(doc_id, tf_raw)| Posting {
                        doc_id,
                        weight: sublinear_tf(tf_raw) * idf[tid] / doc_norms[doc_id as usize],
                    })
                    .collect()
            })
            .collect();

        tracing::debug!(num_docs, num_terms = dictionary.len(), "built n-gram index");
        Self { dictionary, idf, postings, num_docs }
    }

    pub fn num_terms(&self) -> usize { self.dictionary.len() }

    /// Cosine similarity of `query` against every document, in document order.
    /// N-grams absent from the corpus are ignored; no overlap scores 0.0.
    pub fn score(&self, query: &str) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.num_docs as usize];

        let mut q_weights: Vec<(TermId, f32)> = ngram_counts(query)
            .into_iter()
            .filter_map(|(term, tf_raw)| {
                let tid = *self.dictionary.get(&term)?;
                Some((tid, sublinear_tf(tf_raw) * self.idf[tid as usize]))
            })
            .collect();
        if q_weights.is_empty() {
            return scores;
        }
        let norm = q_weights.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in q_weights.iter_mut() { *w /= norm; }
        }

        for (tid, q_w) in q_weights {
            for p in &self.postings[tid as usize] {
                scores[p.doc_id as usize] += p.weight * q_w;
            }
        }
        scores
    }
}
