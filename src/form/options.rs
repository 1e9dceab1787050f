use serde::{Deserialize, Serialize};

use super::error::{FormError, FormResult};

/// When field validators run without an explicit `validate_*` call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutovalidateMode {
    /// On registration, on every change and after every reset.
    Always,
    /// Once the field has been changed or touched by the user.
    #[default]
    OnInteraction,
    Never,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub autovalidate: AutovalidateMode,
    pub preserve_on_unregister: bool,
    pub validator_fallback_message: String,
    pub max_propagation_depth: usize,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            autovalidate: AutovalidateMode::OnInteraction,
            preserve_on_unregister: false,
            validator_fallback_message: "Invalid value".to_owned(),
            max_propagation_depth: 16,
        }
    }
}

impl FormOptions {
    /// Parses options from a TOML table. Missing keys keep their defaults.
    ///
    /// ```toml
    /// autovalidate = "always"
    /// preserve_on_unregister = true
    /// ```
    pub fn from_toml_str(source: &str) -> FormResult<Self> {
        let options: Self =
            toml::from_str(source).map_err(|error| FormError::InvalidOptions(error.to_string()))?;
        let depth = options.max_propagation_depth;
        Ok(options.max_propagation_depth(depth))
    }

    pub fn autovalidate(mut self, mode: AutovalidateMode) -> Self {
        self.autovalidate = mode;
        self
    }

    pub fn preserve_on_unregister(mut self, preserve: bool) -> Self {
        self.preserve_on_unregister = preserve;
        self
    }

    pub fn validator_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.validator_fallback_message = message.into();
        self
    }

    pub fn max_propagation_depth(mut self, depth: usize) -> Self {
        self.max_propagation_depth = depth.max(1);
        self
    }
}
