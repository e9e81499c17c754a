/// 耐久タスクキューレイヤ。
///
/// タスク型、PostgreSQLバックエンドのストア、HTTP配送デーモン。
pub(crate) mod store;
pub(crate) mod types;
pub(crate) mod worker;
