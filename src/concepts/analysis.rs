/// 語彙の健全性レポート。
///
/// マスタ語彙を読み取り専用で走査し、運用者向けに
/// ハブ概念・重複疑い・表記ゆれペアを列挙します。語彙は変更しません。
use serde::Serialize;

use super::resolver::cosine_similarity;
use super::store::ConceptDocument;
use crate::util::text::{concept_key, fold_width};

/// 多数の別表記を集めた概念。
#[derive(Debug, Clone, Serialize)]
pub(crate) struct HubConcept {
    pub(crate) name: String,
    pub(crate) alias_count: usize,
}

/// 埋め込み類似度が高いのに別エントリのままのペア。
#[derive(Debug, Clone, Serialize)]
pub(crate) struct DuplicatePair {
    pub(crate) a: String,
    pub(crate) b: String,
    pub(crate) similarity: f64,
}

/// 中点・空白の有無だけが違う表記ペア。
#[derive(Debug, Clone, Serialize)]
pub(crate) struct NotationPair {
    pub(crate) a: String,
    pub(crate) b: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ConceptReport {
    pub(crate) total_concepts: usize,
    pub(crate) hubs: Vec<HubConcept>,
    pub(crate) likely_duplicates: Vec<DuplicatePair>,
    pub(crate) notation_pairs: Vec<NotationPair>,
}

const HUB_ALIAS_THRESHOLD: usize = 3;

/// 語彙ドキュメントからレポートを構築する。
///
/// `duplicate_threshold` は重複疑いとみなすコサイン類似度の下限。
/// 解決閾値よりやや低い値を渡して「マージ寸前」のペアを拾う想定。
#[must_use]
pub(crate) fn build_report(document: &ConceptDocument, duplicate_threshold: f64) -> ConceptReport {
    let mut hubs: Vec<HubConcept> = document
        .concepts
        .iter()
        .filter(|concept| concept.aliases.len() >= HUB_ALIAS_THRESHOLD)
        .map(|concept| HubConcept {
            name: concept.name.clone(),
            alias_count: concept.aliases.len(),
        })
        .collect();
    hubs.sort_by(|a, b| b.alias_count.cmp(&a.alias_count));

    let mut likely_duplicates = Vec::new();
    let mut notation_pairs = Vec::new();
    for (i, a) in document.concepts.iter().enumerate() {
        for b in document.concepts.iter().skip(i + 1) {
            if notation_key(&a.name) == notation_key(&b.name) {
                notation_pairs.push(NotationPair {
                    a: a.name.clone(),
                    b: b.name.clone(),
                });
                continue;
            }
            if let (Some(ea), Some(eb)) = (a.embedding.as_ref(), b.embedding.as_ref()) {
                let similarity = cosine_similarity(ea, eb);
                if similarity >= duplicate_threshold {
                    likely_duplicates.push(DuplicatePair {
                        a: a.name.clone(),
                        b: b.name.clone(),
                        similarity,
                    });
                }
            }
        }
    }
    likely_duplicates.sort_by(|x, y| {
        y.similarity
            .partial_cmp(&x.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    ConceptReport {
        total_concepts: document.concepts.len(),
        hubs,
        likely_duplicates,
        notation_pairs,
    }
}

/// 表記ゆれ判定用キー。正規化キーからさらに中点類を落とす。
fn notation_key(name: &str) -> String {
    let folded = fold_width(name);
    concept_key(&folded)
        .chars()
        .filter(|c| !matches!(c, '・' | '·' | '･' | '.'))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::concepts::store::MasterConcept;

    fn concept(name: &str, aliases: &[&str], embedding: Option<Vec<f32>>) -> MasterConcept {
        MasterConcept {
            name: name.to_string(),
            aliases: aliases.iter().map(|s| (*s).to_string()).collect(),
            embedding,
            usage_count: 1,
            source: "test".to_string(),
            first_seen: Utc::now(),
        }
    }

    #[test]
    fn hubs_require_alias_threshold() {
        let document = ConceptDocument {
            concepts: vec![
                concept("機械学習", &["ML", "machine learning", "機械 学習"], None),
                concept("戦略", &["strategy"], None),
            ],
        };
        let report = build_report(&document, 0.8);
        assert_eq!(report.hubs.len(), 1);
        assert_eq!(report.hubs[0].name, "機械学習");
        assert_eq!(report.hubs[0].alias_count, 3);
    }

    #[test]
    fn high_similarity_pair_is_reported_as_duplicate() {
        let document = ConceptDocument {
            concepts: vec![
                concept("機械学習", &[], Some(vec![1.0, 0.0])),
                concept("マシンラーニング", &[], Some(vec![0.99, 0.05])),
                concept("簿記", &[], Some(vec![0.0, 1.0])),
            ],
        };
        let report = build_report(&document, 0.8);
        assert_eq!(report.likely_duplicates.len(), 1);
        assert_eq!(report.likely_duplicates[0].a, "機械学習");
        assert_eq!(report.likely_duplicates[0].b, "マシンラーニング");
    }

    #[test]
    fn interpunct_variants_are_notation_pairs() {
        let document = ConceptDocument {
            concepts: vec![
                concept("データ・サイエンス", &[], None),
                concept("データサイエンス", &[], None),
            ],
        };
        let report = build_report(&document, 0.8);
        assert_eq!(report.notation_pairs.len(), 1);
        assert!(report.likely_duplicates.is_empty());
    }

    #[test]
    fn empty_vocabulary_yields_empty_report() {
        let report = build_report(&ConceptDocument::default(), 0.8);
        assert_eq!(report.total_concepts, 0);
        assert!(report.hubs.is_empty());
        assert!(report.likely_duplicates.is_empty());
        assert!(report.notation_pairs.is_empty());
    }
}
