pub mod file_object;
pub mod share;
pub mod stats;
pub mod user;
pub mod user_file;

pub use file_object::*;
pub use share::*;
pub use stats::*;
pub use user::*;
pub use user_file::*;
