/// 最終Markdownドキュメントのレンダリング。
///
/// YAMLフロントマター、書籍概要、`[[wiki-link]]` 形式の概念リンク、
/// 章ごとのセクションを持つナレッジヴォルト向けドキュメントを生成します。
use chrono::{DateTime, Utc};

/// レンダリング済み章。概念は解決済みの正規名。
#[derive(Debug, Clone)]
pub(crate) struct RenderChapter {
    pub(crate) title: String,
    pub(crate) summary: String,
    pub(crate) concepts: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RenderInput {
    pub(crate) book_title: String,
    pub(crate) author: Option<String>,
    pub(crate) category: String,
    pub(crate) subcategory: String,
    pub(crate) summary: String,
    /// 書籍レベルの主要概念（解決済み正規名、重複なし）。
    pub(crate) concepts: Vec<String>,
    pub(crate) chapters: Vec<RenderChapter>,
    pub(crate) generated_at: DateTime<Utc>,
}

const FAILURE_PLACEHOLDER: &str = "(要約の生成に失敗しました)";

/// 出力キーに使えるようタイトルを整形する。
/// パス区切りや制御文字をアンダースコアへ置換する。
#[must_use]
pub(crate) fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized
    }
}

/// 最終ドキュメントのBlobキー。
#[must_use]
pub(crate) fn output_key(subcategory: &str, book_title: &str) -> String {
    format!(
        "vault/reading/{}/{}.md",
        sanitize_title(subcategory),
        sanitize_title(book_title)
    )
}

/// 最終Markdownドキュメントを組み立てる。
#[must_use]
pub(crate) fn render_markdown(input: &RenderInput) -> String {
    let mut out = String::new();

    // YAMLフロントマター
    out.push_str("---\n");
    out.push_str(&format!("title: \"{}\"\n", escape_yaml(&input.book_title)));
    if let Some(author) = input.author.as_deref() {
        out.push_str(&format!("author: \"{}\"\n", escape_yaml(author)));
    }
    out.push_str(&format!("category: \"{}\"\n", escape_yaml(&input.category)));
    out.push_str(&format!(
        "subcategory: \"{}\"\n",
        escape_yaml(&input.subcategory)
    ));
    out.push_str(&format!(
        "date: {}\n",
        input.generated_at.format("%Y-%m-%d")
    ));
    if !input.concepts.is_empty() {
        out.push_str("concepts:\n");
        for concept in &input.concepts {
            out.push_str(&format!("  - \"{}\"\n", escape_yaml(concept)));
        }
    }
    out.push_str("---\n\n");

    out.push_str(&format!("# {}\n\n", input.book_title));

    out.push_str("## 概要\n\n");
    out.push_str(&format!("{}\n\n", presentable_summary(&input.summary)));

    if !input.concepts.is_empty() {
        out.push_str("## 主要概念\n\n");
        for concept in &input.concepts {
            out.push_str(&format!("- [[{concept}]]\n"));
        }
        out.push('\n');
    }

    for chapter in &input.chapters {
        out.push_str(&format!("## {}\n\n", chapter.title));
        out.push_str(&format!("{}\n", presentable_summary(&chapter.summary)));
        if !chapter.concepts.is_empty() {
            let links: Vec<String> = chapter
                .concepts
                .iter()
                .map(|c| format!("[[{c}]]"))
                .collect();
            out.push_str(&format!("\n**キーコンセプト**: {}\n", links.join(", ")));
        }
        out.push('\n');
    }

    out
}

/// 空白のみの要約を明示的な失敗表示へ縮退させる。
fn presentable_summary(summary: &str) -> &str {
    if summary.trim().is_empty() {
        FAILURE_PLACEHOLDER
    } else {
        summary.trim()
    }
}

fn escape_yaml(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
