pub mod toml_loader;

pub use toml_loader::{load_all_run_specs, load_run_spec};
