//! Attribute keys used by the adapters that `opentelemetry-semantic-conventions`
//! no longer provides (withdrawn or never standardized).

/// Username the client authenticates as.
pub const DB_USER: &str = "db.user";

/// Connection string with any credentials removed.
pub const DB_CONNECTION_STRING: &str = "db.connection_string";

/// Index of the database being addressed on a redis-protocol server.
pub const DB_REDIS_DATABASE_INDEX: &str = "db.redis.database_index";

/// Number of commands in a pipelined batch.
pub const DB_REDIS_NUM_CMD: &str = "db.redis.num_cmd";
