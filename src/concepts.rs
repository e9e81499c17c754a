/// 概念語彙レイヤ。
///
/// マスタ語彙の永続化、アイデンティティ解決、カテゴリ正規化、
/// 健全性レポートを提供します。
pub(crate) mod analysis;
pub(crate) mod categories;
pub(crate) mod resolver;
pub(crate) mod store;
