mod commands;
mod flags;
mod handle;
mod queries;
mod schema;

pub use flags::{decode_flags, encode_flags};
pub use handle::StoreHandle;
