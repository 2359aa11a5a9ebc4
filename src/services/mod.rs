pub mod access;
pub mod auth;
pub mod dedup;
pub mod hasher;
pub mod locks;
pub mod object_store;
pub mod rate_limit;
pub mod share;
pub mod stats;
pub mod user;

pub use access::AccessController;
pub use auth::AuthService;
pub use dedup::{DedupEngine, DeleteOutcome};
pub use hasher::{hash_bytes, stage_stream, ContentHasher, StagedUpload};
pub use locks::HashLocks;
pub use object_store::{ObjectStore, PendingBlob, SweepReport};
pub use rate_limit::UserRateLimiter;
pub use share::ShareService;
pub use stats::StatsAggregator;
pub use user::UserService;
