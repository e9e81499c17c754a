/// 永続化レイヤ。
///
/// Blobストア（PostgreSQL / インメモリ）と、その上に構築された
/// ジョブ状態ストアを提供します。
pub(crate) mod blob;
pub(crate) mod jobs;
