pub mod loader;
pub mod models;
pub mod settings;
pub mod validation;

pub use loader::{load_config, parse_canonical, render_canonical, save_config};
pub use models::*;
pub use settings::Settings;
pub use validation::{ConfigValidator, ValidationError, ValidationReport};
