/// 章アーティファクトの集約と書籍レベル合成。
///
/// finalizeが全章のアーティファクトを突き合わせ、欠損章を明示的な
/// プレースホルダで埋め、書籍レベルの合成入力を組み立てます。
use serde::Deserialize;
use serde_json::Value;

use crate::clients::model_gateway::ContentPart;
use crate::store::jobs::ChapterArtifact;

/// 書籍レベルの合成結果。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BookSynthesis {
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) author: Option<String>,
    #[serde(default)]
    pub(crate) suggested_subfolder: Option<String>,
    pub(crate) all_key_concepts: Vec<String>,
    pub(crate) summary: String,
}

impl BookSynthesis {
    /// 合成モデルが結果を返さなかった場合の縮退値。
    /// 概念は各章の和集合、要約は明示的な失敗表示になる。
    #[must_use]
    pub(crate) fn fallback(book_title: &str, chapters: &[ChapterArtifact]) -> Self {
        Self {
            title: book_title.to_string(),
            author: None,
            suggested_subfolder: None,
            all_key_concepts: dedup_concepts(chapters),
            summary: "(全体要約の生成に失敗しました)".to_string(),
        }
    }

    pub(crate) fn from_validated(value: Value) -> anyhow::Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| anyhow::anyhow!("failed to deserialize book synthesis: {e}"))
    }
}

/// `[0, total)` を密に埋めた章リストを作る。
///
/// 存在しないインデックスは「結果が見つかりませんでした」プレースホルダで
/// 置換する。期待完了時刻を過ぎた章を恒久喪失として扱うのは呼び出し側の
/// 判断で、ここは与えられた欠損を埋めるだけ。
#[must_use]
pub(crate) fn fill_missing(present: Vec<ChapterArtifact>, total: usize) -> Vec<ChapterArtifact> {
    let mut ordered: Vec<Option<ChapterArtifact>> = vec![None; total];
    for artifact in present {
        let index = artifact.index;
        if index < total {
            ordered[index] = Some(artifact);
        }
    }
    ordered
        .into_iter()
        .enumerate()
        .map(|(index, artifact)| artifact.unwrap_or_else(|| ChapterArtifact::lost(index)))
        .collect()
}

/// 全章のキーコンセプトの重複排除済み和集合（出現順維持）。
#[must_use]
pub(crate) fn dedup_concepts(chapters: &[ChapterArtifact]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut union = Vec::new();
    for chapter in chapters {
        for concept in &chapter.key_concepts {
            if seen.insert(concept.clone()) {
                union.push(concept.clone());
            }
        }
    }
    union
}

/// 書籍レベル合成のプロンプトを組み立てる。
#[must_use]
pub(crate) fn synthesis_parts(book_title: &str, chapters: &[ChapterArtifact]) -> Vec<ContentPart> {
    let mut prompt = String::new();
    prompt.push_str("以下は書籍の章ごとの要約です。書籍全体の要約と主要概念をJSONで返してください。\n");
    prompt.push_str("出力フィールド: title, author, suggestedSubfolder, allKeyConcepts, summary\n\n");
    prompt.push_str(&format!("書籍タイトル: {book_title}\n\n"));
    for chapter in chapters {
        prompt.push_str(&format!("## {}\n{}\n\n", chapter.title, chapter.summary));
    }
    vec![ContentPart::text(prompt)]
}
