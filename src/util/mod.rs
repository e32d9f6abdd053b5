pub mod atomic_file;
pub mod percentile;

pub use atomic_file::{append_jsonl, atomic_write_json, read_json_or_default};
pub use percentile::percentile;
