// Flagstaff - feature flags resolved lazily per scope
//
// This library re-exports the feature engine together with the JSON value
// type feature values are expressed in.

// Re-export core functionality
pub use flagstaff_features::*;

// Feature values are JSON
pub use serde_json::{Value, json};

/// Prelude module for convenient imports
pub mod prelude {
    pub use flagstaff_features::prelude::*;
    pub use serde_json::{Value, json};
}
