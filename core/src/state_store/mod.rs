//! L0 of §2: the durable state store every other layer reads and writes
//! through. `model` defines the row shapes; `sqlite` is the concrete,
//! production-default backend.

pub mod model;
pub mod sqlite;

pub use model::*;
pub use sqlite::SqliteStateStore;
