/// セグメンテーションエンジン。
///
/// ドキュメントを順序付きの章リストへ分割します。戦略は優先順に:
///
/// 1. Vision目次抽出の候補（[`super::toc`] で後処理済み）から章を切り出す
/// 2. 正規表現による見出し検出（複数の番号記法と和英両スクリプト対応）
/// 3. 最終フォールバック: 全文を1章として返す
///
/// 正規表現フォールバックには暴走ガード（非現実的な章数で中断）と、
/// ヘッダー/フッター誤検出をまとめる重複圧縮が入ります。
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::toc::TocCandidate;
use crate::clients::document_source::PageText;
use crate::store::jobs::ChapterInput;
use crate::util::error::StageError;
use crate::util::text::{chapter_number_token, clean_extracted_text};

/// 章見出しパターン。行頭の章・部見出しを検出する。
static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)^[ \t　]*((?:第[0-9０-９一二三四五六七八九十百]+[章部])|(?:Chapter[ \t]+\d+)|(?:Part[ \t]+(?:\d+|[IVXivx]+))|(?:パート[ \t　]*[0-9０-９]+))[^\n]*",
    )
    .expect("heading pattern")
});

pub(crate) struct SegmentationEngine {
    /// 正規表現候補がこの数を超えたら暴走として中断する。
    runaway_limit: usize,
    /// 候補がこの数を超えたら番号トークンによる重複圧縮を行う。
    dedup_threshold: usize,
}

impl SegmentationEngine {
    pub(crate) fn new(runaway_limit: usize, dedup_threshold: usize) -> Self {
        Self {
            runaway_limit,
            dedup_threshold,
        }
    }

    /// 目次候補とページテキストから章入力を構築する。
    ///
    /// 候補のページ範囲に対応するテキストを連結し、OCRノイズを除去する。
    /// 本文が空になった候補は捨てる。インデックスは0始まりで密に振り直す。
    #[must_use]
    pub(crate) fn chapters_from_toc(
        &self,
        candidates: &[TocCandidate],
        pages: &[PageText],
    ) -> Vec<ChapterInput> {
        let mut chapters = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let body: String = pages
                .iter()
                .filter(|page| page.page >= candidate.start_page && page.page <= candidate.end_page)
                .map(|page| page.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let body = clean_extracted_text(&body);
            if body.is_empty() {
                debug!(title = %candidate.title, "dropping TOC chapter with empty body");
                continue;
            }
            chapters.push(ChapterInput {
                index: chapters.len(),
                title: candidate.title.clone(),
                content: body,
            });
        }
        chapters
    }

    /// 全文テキストから見出し検出で章入力を構築する。
    ///
    /// 最初の見出しより前の内容（前書き・目次など）は捨てる。
    /// 候補数が暴走上限を超えた場合は検出見出しを添えて
    /// [`StageError::Runaway`] を返す。
    pub(crate) fn chapters_from_text(
        &self,
        full_text: &str,
    ) -> Result<Vec<ChapterInput>, StageError> {
        let matches: Vec<(usize, usize, String)> = HEADING
            .find_iter(full_text)
            .map(|m| (m.start(), m.end(), m.as_str().trim().to_string()))
            .collect();

        if matches.len() > self.runaway_limit {
            warn!(
                count = matches.len(),
                limit = self.runaway_limit,
                "heading detection runaway, aborting segmentation"
            );
            return Err(StageError::Runaway {
                count: matches.len(),
                headings: matches.into_iter().map(|(_, _, h)| h).collect(),
            });
        }

        // 見出し境界から (見出し, 本文) を切り出す
        let mut candidates: Vec<(String, String)> = Vec::with_capacity(matches.len());
        for (i, (start, _, heading)) in matches.iter().enumerate() {
            let body_end = if i + 1 < matches.len() {
                matches[i + 1].0
            } else {
                full_text.len()
            };
            let body = clean_extracted_text(&full_text[*start..body_end]);
            candidates.push((heading.clone(), body));
        }

        if candidates.len() > self.dedup_threshold {
            let before = candidates.len();
            candidates = collapse_repeated_numbers(candidates);
            if candidates.len() < before {
                info!(
                    before,
                    after = candidates.len(),
                    "collapsed repeated chapter-number headings"
                );
            }
        }

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(index, (title, content))| ChapterInput {
                index,
                title,
                content,
            })
            .collect())
    }

    /// 最終フォールバック: 全文を1章として返す。
    #[must_use]
    pub(crate) fn whole_document(&self, book_title: &str, full_text: &str) -> Vec<ChapterInput> {
        vec![ChapterInput {
            index: 0,
            title: format!("{book_title}（全文）"),
            content: clean_extracted_text(full_text),
        }]
    }
}

/// 同じ正規化章番号トークンを持つ候補を1つに圧縮する。
///
/// ヘッダー/フッターが毎ページ章見出しとして誤検出されるケースの防御で、
/// 同番号の候補のうち本文が最長のものだけを残す。番号トークンを持たない
/// 候補はそのまま残す。元の出現順は維持する。
fn collapse_repeated_numbers(candidates: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut kept: Vec<(Option<String>, String, String)> = Vec::new();
    for (heading, body) in candidates {
        let token = chapter_number_token(&heading);
        if let Some(token_value) = token.as_ref() {
            if let Some(existing) = kept
                .iter_mut()
                .find(|(t, _, _)| t.as_deref() == Some(token_value.as_str()))
            {
                if body.len() > existing.2.len() {
                    existing.1 = heading;
                    existing.2 = body;
                }
                continue;
            }
        }
        kept.push((token, heading, body));
    }
    kept.into_iter().map(|(_, h, b)| (h, b)).collect()
}
