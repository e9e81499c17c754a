/// エラー分類とステージエラーの定義。
///
/// パイプライン各ステージの失敗は [`StageError`] に分類され、
/// タスク配送側がHTTPステータスから再配送の要否を判断できるようにします。
use axum::http::StatusCode;
use thiserror::Error;

/// パイプラインステージの失敗分類。
#[derive(Debug, Error)]
pub(crate) enum StageError {
    /// 不正な入力。同期的に拒否され、再試行されない。
    #[error("validation failed: {0}")]
    Validation(String),

    /// 参照先の外部オブジェクトが存在しない。ジョブを失敗させ、
    /// タスクはACKして再配送を止める。
    #[error("not found: {0}")]
    NotFound(String),

    /// 一時的なI/O失敗。タスク配送側の再試行に委ねる。
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// セグメンテーションが非現実的な数の章候補を検出した。
    /// ジョブを中断し、マッチした見出しを診断用に保存する。
    #[error("segmentation runaway: {count} heading candidates")]
    Runaway { count: usize, headings: Vec<String> },

    /// finalizeが全チャプター完了前に呼ばれた。エラーではなく、
    /// 成功とも失敗とも区別されるスケジュール再試行シグナル。
    #[error("not ready: {completed}/{total} chapter artifacts present")]
    NotReady { completed: usize, total: usize },
}

impl StageError {
    /// タスク配送側へ返すHTTPステータス。
    ///
    /// - 2xx: ACK（これ以上の配送は無意味）
    /// - 404/400: 恒久失敗（再配送しても改善しない）
    /// - 429: スケジュール再試行（NotReady）
    /// - 5xx: 一時障害（バックオフ付き再配送）
    #[must_use]
    pub(crate) fn http_status(&self) -> StatusCode {
        match self {
            StageError::Validation(_) => StatusCode::BAD_REQUEST,
            StageError::NotFound { .. } => StatusCode::NOT_FOUND,
            StageError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StageError::Runaway { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            StageError::NotReady { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// モデルゲートウェイ呼び出しのエラー種別。
///
/// 待機ポリシー（[`super::retry::WaitPolicy`]）のキーになります。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModelErrorClass {
    /// ネットワーク・SSL・タイムアウト・5xx
    Network,
    /// 429 / クォータ超過
    RateLimit,
    /// JSONとして解釈できない、またはスキーマ検証に失敗したレスポンス
    MalformedResponse,
}

/// reqwestエラーをモデルエラー種別に分類する。
#[must_use]
pub(crate) fn classify_http_error(error: &reqwest::Error) -> ModelErrorClass {
    if error.is_timeout() || error.is_connect() {
        return ModelErrorClass::Network;
    }
    if let Some(status) = error.status() {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return ModelErrorClass::RateLimit;
        }
        if status.is_server_error() {
            return ModelErrorClass::Network;
        }
    }
    if error.is_decode() {
        return ModelErrorClass::MalformedResponse;
    }
    ModelErrorClass::Network
}

/// HTTPステータスコードをモデルエラー種別に分類する。
#[must_use]
pub(crate) fn classify_status(status: reqwest::StatusCode) -> ModelErrorClass {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ModelErrorClass::RateLimit
    } else {
        ModelErrorClass::Network
    }
}
