pub(crate) mod error;
pub(crate) mod retry;
pub(crate) mod text;
