pub mod logging;
pub mod masking;

pub use logging::truncate_text;
pub use masking::{is_sensitive_key, mask_value};
