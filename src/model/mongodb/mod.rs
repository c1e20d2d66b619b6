mod collection;
mod counter;
mod errors;

pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{Counter, ELECTION_ID_COUNTER_ID};
pub use errors::{is_duplicate_key_error, is_transient_transaction_error, DUPLICATE_KEY};
