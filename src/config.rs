//! Application configuration and storage constants.
//!
//! Single source of truth for the on-disk format: table name prefixes,
//! column names, padding sizes, and the default key-derivation parameters.

/// The application name used in diagnostics.
pub const APP_NAME: &str = "SealDB";

/// The application version written into the manifest of every new database.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Size of the random database identifier in bytes.
///
/// The DBID is stored hex-encoded (uppercase) and doubles as a cheap
/// "was this file produced by us" marker.
pub const DBID_SIZE: usize = 3;

/// Number of random bytes encrypted for the password check.
pub const KEY_CHECK_SIZE: usize = 1337;

/// SHAKE-128 digest size used for the password check, in bytes.
pub const KEY_CHECK_DIGEST_SIZE: usize = 16;

/// SHAKE-128 digest size of the hash-search column, in bytes.
pub const HS_HASH_DIGEST_SIZE: usize = 16;

/// Prefix of the physical data table backing a user table.
///
/// Raw names have the form `table_NNN` with a zero-padded counter,
/// so user-chosen table names never appear in the schema.
pub const RAW_TABLE_PREFIX: &str = "table_";

/// Prefix of the per-table IV table (`iv_table_NNN`).
pub const IV_TABLE_PREFIX: &str = "iv_";

/// Prefix of the per-table hash-search table (`hs_table_NNN`).
pub const HS_TABLE_PREFIX: &str = "hs_";

/// Prefix of plaintext tables inside a dump database.
pub const DUMP_TABLE_PREFIX: &str = "content_";

/// Ceiling on the number of user tables per database.
///
/// The raw-name counter is three decimal digits, so counters live in
/// [0, 1000) and the 1001st table is refused.
pub const MAX_TABLE_COUNT: usize = 1000;

/// Bounds of the per-table hash-search salt length, in bytes.
///
/// The actual length is drawn uniformly from [MIN, MAX).
pub const MIN_HS_DATA_SIZE: usize = 30;
pub const MAX_HS_DATA_SIZE: usize = 60;

/// Minimum padded size of an encrypted record key.
///
/// Short keys are padded up so ciphertext length does not reveal
/// key length for the common short cases.
pub const MIN_KEY_PAD_SIZE: usize = 12;

/// Upper bound of the extra random padding on each side of a record key.
pub const MAX_KEY_PAD_RND_SIZE: usize = 6;

/// Upper bound of the extra random padding on each side of a record's
/// attribute payload.
pub const MAX_DATA_PAD_RND_SIZE: usize = 6;

/// Minimum padded size of an encrypted table description.
pub const MIN_DESC_PAD_SIZE: usize = 100;

/// Upper bound of the extra random padding of a table description.
pub const MAX_DESC_PAD_RND_SIZE: usize = 20;

/// Salt length for the default scrypt key-derivation stages, in bytes.
pub const KDF_SALT_SIZE: usize = 16;

/// First scrypt stage of the default password expansion: memory-heavy.
pub const KDF_STAGE1_N: u64 = 1 << 20;
pub const KDF_STAGE1_R: u32 = 2;

/// Second scrypt stage of the default password expansion: bandwidth-heavy.
pub const KDF_STAGE2_N: u64 = 1 << 16;
pub const KDF_STAGE2_R: u32 = 32;

/// Full passes of the SHA3-512/BLAKE2b stage inside the default
/// hash-search hasher.
pub const HS_HASHER_ITERATIONS: u32 = 5;
