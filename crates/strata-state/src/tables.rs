//! redb table definitions for the Strata system database.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Pool service records keyed by pool UUID (hyphenated, lowercase).
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Pool label index: label → pool UUID.
pub const POOL_LABELS: TableDefinition<&str, &str> = TableDefinition::new("pool_labels");

/// Members keyed by zero-padded rank so iteration is rank-ascending.
pub const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("members");

/// System scalars (group map version).
pub const SYSTEM: TableDefinition<&str, u64> = TableDefinition::new("system");

/// Key under [`SYSTEM`] holding the group map version.
pub const MAP_VERSION_KEY: &str = "map_version";
