pub mod toml_loader;

pub use toml_loader::{load_definition_file, load_definitions_from_folder};
