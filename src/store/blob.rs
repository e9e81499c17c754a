/// 耐久キーバリューBlobストア。
///
/// ジョブのメタデータ・章入力・章アーティファクト・語彙ドキュメント・
/// ナレッジヴォルトの出力は、すべてこのストア越しに読み書きされます。
/// 呼び出し間で共有されるのはここに書かれた状態だけです
/// （ステートレスハンドラ間のインメモリ共有は存在しない）。
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

#[async_trait]
pub(crate) trait BlobStore: Send + Sync {
    /// キーが存在するかどうかを返す。
    async fn exists(&self, key: &str) -> Result<bool>;

    /// キーの内容を取得する。存在しない場合は `None`。
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// キーに内容を書き込む（上書き、last-writer-wins）。
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// 指定プレフィックスで始まるキーを昇順で列挙する。
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// UTF-8テキストとして取得するヘルパ。
pub(crate) async fn get_text(store: &dyn BlobStore, key: &str) -> Result<Option<String>> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };
    let text = String::from_utf8(bytes).with_context(|| format!("blob {key} is not UTF-8"))?;
    Ok(Some(text))
}

/// JSONドキュメントとして取得するヘルパ。
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<Option<T>> {
    let Some(bytes) = store.get(key).await? else {
        return Ok(None);
    };
    let value =
        serde_json::from_slice(&bytes).with_context(|| format!("blob {key} is not valid JSON"))?;
    Ok(Some(value))
}

/// JSONドキュメントとして書き込むヘルパ。
pub(crate) async fn put_json<T: serde::Serialize + ?Sized>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize blob {key}"))?;
    store.put(key, &bytes).await
}

/// PostgreSQLをバックエンドとするBlobストア。
///
/// `blobs (key TEXT PRIMARY KEY, data BYTEA, updated_at TIMESTAMPTZ)` テーブルを
/// 使用します。
#[derive(Debug, Clone)]
pub(crate) struct PgBlobStore {
    pool: PgPool,
}

impl PgBlobStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlobStore for PgBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM blobs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to check existence of blob {key}"))?;
        Ok(row.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT data FROM blobs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read blob {key}"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let data: Vec<u8> = row.try_get("data").context("failed to decode blob data")?;
        Ok(Some(data))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO blobs (key, data, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE
            SET data = EXCLUDED.data,
                updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write blob {key}"))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query("SELECT key FROM blobs WHERE key LIKE $1 ORDER BY key ASC")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to list blobs under {prefix}"))?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("key").context("failed to decode key"))
            .collect()
    }
}

/// インメモリBlobストア。テストとローカル実行用。
#[derive(Debug, Default)]
pub(crate) struct MemoryBlobStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
