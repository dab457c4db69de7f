mod schema;
mod writer;

pub use schema::{SCHEMA_VERSION, get_meta};
pub use writer::{
    LeafEntry, RecordingSummary, Storage, load_profiles, query_summary, query_top_leaves,
};
