//! The out-of-core matching engine: chunked candidate generation, field
//! matching, streaming merges, and the entity/link resolvers.

pub mod blocking;
pub mod chunk;
pub mod entities;
pub mod external_sort;
pub mod extract;
pub mod matcher;
pub mod pipeline;
pub mod relationship;

/// Column-name prefix for the left side of a candidate pair.
pub const LEFT_PREFIX: &str = "LEFT_";
/// Column-name prefix for the right side of a candidate pair.
pub const RIGHT_PREFIX: &str = "RIGHT_";
/// Step sequence number attached to every matched pair.
pub const STEP_COLUMN: &str = "STEP";
/// Entity identifier column (DEDUP outputs).
pub const ENTITY_ID_COLUMN: &str = "ENTITY_ID";
/// Link identifier column (LINK outputs).
pub const LINK_ID_COLUMN: &str = "LINK_ID";
/// Record identifier column of the entity index file.
pub const REC_ID_COLUMN: &str = "REC_ID";
