pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod seed;
pub mod sql;
pub mod sweep;
pub mod wal;
pub mod wire;
