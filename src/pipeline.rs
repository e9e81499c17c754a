pub(crate) mod aggregate;
pub(crate) mod indexes;
pub(crate) mod orchestrator;
pub(crate) mod render;
pub(crate) mod segment;
pub(crate) mod toc;
