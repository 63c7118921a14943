pub mod hash;
pub mod names;

pub use hash::{sha256_bytes, sha256_str, short_hash};
pub use names::{is_valid_name, route_name, sanitize_name, snake_name};
