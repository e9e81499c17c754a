/// テキスト正規化ユーティリティ。
///
/// 幅正規化（全角→半角）、OCRノイズ除去、概念キー生成、
/// 章番号トークンの正規化を提供します。
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// NFKC正規化で全角英数字を半角に折りたたむ。
#[must_use]
pub(crate) fn fold_width(text: &str) -> String {
    text.nfkc().collect()
}

/// 概念名を比較用キーに正規化する。
///
/// NFKC折りたたみ → 小文字化 → 空白とハイフンの除去。
/// 「ＡＩ倫理」と「AI倫理」、「machine-learning」と「Machine Learning」が
/// 同一キーになります。
#[must_use]
pub(crate) fn concept_key(name: &str) -> String {
    fold_width(name)
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

static NOISE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[：:；;！!．.…‐\-ｉｌI]{3,}").expect("noise run pattern"));
static STRAY_ARTIFACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[：:；;！!．.\s])[IiｉｌＩ](?:$|[：:；;！!．.\s])").expect("stray pattern")
});
static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("space run pattern"));
static NEWLINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("newline run pattern"));

/// 抽出テキストからOCRノイズを除去する。
///
/// - 3文字以上連続する記号列（`:::`、`！！！`、`…‐‐`など）
/// - 空白や句読点に挟まれた孤立した `I`/`i`/`l`（OCRアーティファクト）
/// - 連続する空白・改行
#[must_use]
pub(crate) fn clean_extracted_text(text: &str) -> String {
    let cleaned = NOISE_RUN.replace_all(text, " ");
    // 孤立アーティファクトは前後の区切り文字を残して本体だけ落とす
    let cleaned = STRAY_ARTIFACT.replace_all(&cleaned, |caps: &regex::Captures<'_>| {
        caps[0]
            .chars()
            .filter(|c| !matches!(c, 'I' | 'i' | 'ｉ' | 'ｌ' | 'Ｉ'))
            .collect::<String>()
    });
    let cleaned = SPACE_RUN.replace_all(&cleaned, " ");
    let cleaned = NEWLINE_RUN.replace_all(&cleaned, "\n\n");
    cleaned.trim().to_string()
}

/// 見出し文字列から章番号トークンを取り出し、正規化する。
///
/// 全角数字は半角へ、漢数字とローマ数字は十進数へ変換します。
/// ヘッダー/フッターの誤検出をまとめる重複判定は、この正規化後の
/// トークン同士の等価比較で行います（生文字列の比較は過小検出になる）。
#[must_use]
pub(crate) fn chapter_number_token(heading: &str) -> Option<String> {
    static NUMBER_PART: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(\d+|[一二三四五六七八九十百]+|[IVXivx]+)").expect("number part pattern")
    });

    let folded = fold_width(heading);
    let stripped: String = folded
        .chars()
        .filter(|c| !matches!(c, '：' | '；' | '！' | '…' | '‐'))
        .collect();
    let caps = NUMBER_PART.captures(&stripped)?;
    let token = caps.get(1)?.as_str();

    if token.chars().all(|c| c.is_ascii_digit()) {
        let trimmed = token.trim_start_matches('0');
        if trimmed.is_empty() {
            return Some("0".to_string());
        }
        return Some(trimmed.to_string());
    }
    if let Some(value) = kanji_to_u32(token) {
        return Some(value.to_string());
    }
    roman_to_u32(token).map(|value| value.to_string())
}

/// 漢数字（一〜九百九十九程度）を数値に変換する。
fn kanji_to_u32(token: &str) -> Option<u32> {
    let mut total = 0u32;
    let mut current = 0u32;
    let mut seen_any = false;
    for c in token.chars() {
        let digit = match c {
            '一' => 1,
            '二' => 2,
            '三' => 3,
            '四' => 4,
            '五' => 5,
            '六' => 6,
            '七' => 7,
            '八' => 8,
            '九' => 9,
            '十' => {
                seen_any = true;
                let multiplier = if current == 0 { 1 } else { current };
                total += multiplier * 10;
                current = 0;
                continue;
            }
            '百' => {
                seen_any = true;
                let multiplier = if current == 0 { 1 } else { current };
                total += multiplier * 100;
                current = 0;
                continue;
            }
            _ => return None,
        };
        seen_any = true;
        current = digit;
    }
    if !seen_any {
        return None;
    }
    Some(total + current)
}

/// ローマ数字（I〜XXXIX程度）を数値に変換する。
fn roman_to_u32(token: &str) -> Option<u32> {
    let mut total = 0i64;
    let mut prev = 0i64;
    for c in token.chars() {
        let value = match c.to_ascii_uppercase() {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            _ => return None,
        };
        if value > prev && prev > 0 {
            total += value - 2 * prev;
        } else {
            total += value;
        }
        prev = value;
    }
    u32::try_from(total).ok().filter(|v| *v > 0)
}
