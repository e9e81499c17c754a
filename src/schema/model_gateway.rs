/// モデルゲートウェイAPIのJSON Schema定義。
///
/// 目次抽出・章要約・書籍要約・クリップ解析のレスポンススキーマ。
use once_cell::sync::Lazy;
use serde_json::{Value, json};

/// Vision目次抽出レスポンスのJSON Schema。
///
/// `start_page` はモデルが文字列で返すことがあるため integer/string 両対応。
/// 後処理（[`crate::pipeline::toc`]）で整数に強制変換されます。
pub(crate) static TOC_RESPONSE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "TOC Extraction Response",
        "type": "object",
        "properties": {
            "volume_info": {
                "type": "string",
                "description": "Volume descriptor (e.g. 上巻/下巻/全1巻)"
            },
            "chapters": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "number": { "type": "string" },
                        "title": { "type": "string" },
                        "start_page": {
                            "type": ["integer", "string"],
                            "description": "1-based content start page"
                        }
                    },
                    "required": ["title", "start_page"]
                }
            }
        },
        "required": ["chapters"]
    })
});

/// 章要約レスポンスのJSON Schema。
pub(crate) static CHAPTER_SUMMARY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "Chapter Summary Response",
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "summary": {
                "type": "string",
                "minLength": 1,
                "description": "Bullet-point summary in Japanese"
            },
            "keyConcepts": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 },
                "maxItems": 20
            }
        },
        "required": ["summary", "keyConcepts"]
    })
});

/// 書籍レベル要約レスポンスのJSON Schema。
pub(crate) static BOOK_SUMMARY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "Book Summary Response",
        "type": "object",
        "properties": {
            "title": { "type": "string", "minLength": 1 },
            "author": { "type": "string" },
            "suggestedSubfolder": { "type": "string" },
            "allKeyConcepts": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 },
                "maxItems": 15
            },
            "summary": { "type": "string", "minLength": 1 }
        },
        "required": ["title", "allKeyConcepts", "summary"]
    })
});

/// クリップ解析レスポンスのJSON Schema。
pub(crate) static CLIP_ANALYSIS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "Clip Analysis Response",
        "type": "object",
        "properties": {
            "summary": { "type": "string", "minLength": 1 },
            "concepts": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 },
                "maxItems": 10
            },
            "category": { "type": "string" }
        },
        "required": ["summary", "concepts"]
    })
});
