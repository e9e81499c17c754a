/// クロスジョブインデックスの冪等更新。
///
/// 書籍インデックス（タイトル/著者の台帳）と概念インデックス
/// （概念→出典の台帳）はどちらも追記専用のMarkdownドキュメントで、
/// 既に存在する行は二度と追加しません。finalizeの再配送下で
/// 重複エントリが生まれないことがここでの不変条件です。
use anyhow::Result;

use crate::store::blob::{BlobStore, get_text};

pub(crate) const BOOKS_INDEX_KEY: &str = "vault/index/books.md";
pub(crate) const CONCEPTS_INDEX_KEY: &str = "vault/index/concepts.md";

const BOOKS_HEADER: &str = "# 書籍インデックス\n";
const CONCEPTS_HEADER: &str = "# 概念インデックス\n";

/// 書籍インデックスに1冊分のエントリを追記する（既存なら何もしない）。
pub(crate) async fn update_books_index(
    blobs: &dyn BlobStore,
    book_title: &str,
    author: Option<&str>,
    category: &str,
    subcategory: &str,
    output_key: &str,
) -> Result<()> {
    let line = match author {
        Some(author) => {
            format!("- [{book_title}]({output_key}) — {author} — {category}/{subcategory}")
        }
        None => format!("- [{book_title}]({output_key}) — {category}/{subcategory}"),
    };
    append_unique_lines(blobs, BOOKS_INDEX_KEY, BOOKS_HEADER, &[line]).await
}

/// 概念インデックスに概念→出典のエントリを追記する（既存行は追加しない）。
pub(crate) async fn update_concepts_index(
    blobs: &dyn BlobStore,
    concepts: &[String],
    book_title: &str,
) -> Result<()> {
    let lines: Vec<String> = concepts
        .iter()
        .map(|concept| format!("- [[{concept}]] ← [[{book_title}]]"))
        .collect();
    append_unique_lines(blobs, CONCEPTS_INDEX_KEY, CONCEPTS_HEADER, &lines).await
}

/// ドキュメントに未出現の行だけを追記する。
///
/// 行単位の完全一致で既存判定するため、同一エントリの再追記は
/// 何度呼んでもno-opになる。
async fn append_unique_lines(
    blobs: &dyn BlobStore,
    key: &str,
    header: &str,
    lines: &[String],
) -> Result<()> {
    let mut document = get_text(blobs, key)
        .await?
        .unwrap_or_else(|| header.to_string());

    let mut changed = false;
    for line in lines {
        let exists = document.lines().any(|existing| existing == line);
        if !exists {
            if !document.ends_with('\n') {
                document.push('\n');
            }
            document.push_str(line);
            document.push('\n');
            changed = true;
        }
    }

    if changed {
        blobs.put(key, document.as_bytes()).await?;
    }
    Ok(())
}
