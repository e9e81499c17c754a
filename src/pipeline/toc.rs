/// Vision目次抽出結果の後処理。
///
/// モデルが返した {number, title, start_page} の配列を、
/// ページ範囲が検証済みで開始ページ昇順のチャプター候補に整形します。
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// 目次から導出したチャプター候補。
///
/// `start_page`/`end_page` は1始まりで両端を含む。
/// `end_page` は次候補の開始ページ-1、最終候補は総ページ数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TocCandidate {
    pub(crate) number: Option<String>,
    pub(crate) title: String,
    pub(crate) start_page: usize,
    pub(crate) end_page: usize,
}

#[derive(Debug, Deserialize)]
struct RawTocResponse {
    chapters: Vec<RawTocEntry>,
}

#[derive(Debug, Deserialize)]
struct RawTocEntry {
    #[serde(default)]
    number: Option<String>,
    title: String,
    start_page: Value,
}

/// スキーマ検証済みの目次レスポンスを候補リストへ変換する。
///
/// - 開始ページは整数へ強制変換（文字列表現を許容）
/// - 数値化できない・0・総ページ数超の開始ページは破棄
/// - 開始ページ昇順に整列し、同一開始ページは先勝ち
#[must_use]
pub(crate) fn postprocess(response: &Value, total_pages: usize) -> Vec<TocCandidate> {
    let Ok(raw) = serde_json::from_value::<RawTocResponse>(response.clone()) else {
        return Vec::new();
    };

    let mut entries: Vec<(Option<String>, String, usize)> = Vec::new();
    for entry in raw.chapters {
        let Some(start_page) = coerce_page(&entry.start_page) else {
            debug!(title = %entry.title, "discarding TOC entry with non-numeric start page");
            continue;
        };
        if start_page == 0 || start_page > total_pages {
            debug!(
                title = %entry.title,
                start_page,
                total_pages,
                "discarding TOC entry with out-of-range start page"
            );
            continue;
        }
        entries.push((entry.number, entry.title, start_page));
    }

    entries.sort_by_key(|(_, _, start)| *start);
    entries.dedup_by_key(|(_, _, start)| *start);

    let mut candidates = Vec::with_capacity(entries.len());
    for i in 0..entries.len() {
        let end_page = if i + 1 < entries.len() {
            entries[i + 1].2 - 1
        } else {
            total_pages
        };
        let (number, title, start_page) = entries[i].clone();
        candidates.push(TocCandidate {
            number,
            title,
            start_page,
            end_page,
        });
    }
    candidates
}

fn coerce_page(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => {
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse().ok()
            }
        }
        _ => None,
    }
}
