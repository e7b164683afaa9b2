/// Engine configuration
///
/// Controls instance construction defaults shared by every entity in a
/// registry: locale handling and identifier generation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Locale used for locale-sensitive values when none is given
    pub default_locale: String,

    /// Locales accepted by `Instance::set_locale`
    pub supported_locales: Vec<String>,

    /// Length of generated `_mg` identifiers
    pub mini_guid_length: usize,

    /// Whether a System context may skip validation on create/update
    pub override_validation_for_system: bool,
}

pub const ENV_DEFAULT_LOCALE: &str = "MEMODOC_DEFAULT_LOCALE";
pub const ENV_MINI_GUID_LENGTH: &str = "MEMODOC_MINI_GUID_LENGTH";

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            default_locale: "en".to_string(),
            supported_locales: ["en", "fr", "de", "es", "zh"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mini_guid_length: 6,
            override_validation_for_system: true,
        }
    }

    /// Set the default locale
    pub fn default_locale(mut self, locale: &str) -> Self {
        self.default_locale = locale.to_string();
        self
    }

    /// Replace the supported locale list
    pub fn supported_locales(mut self, locales: &[&str]) -> Self {
        self.supported_locales = locales.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set generated `_mg` length
    pub fn mini_guid_length(mut self, len: usize) -> Self {
        self.mini_guid_length = len;
        self
    }

    /// Allow or forbid System contexts to skip validation
    pub fn override_validation_for_system(mut self, allow: bool) -> Self {
        self.override_validation_for_system = allow;
        self
    }

    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary key lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();

        if let Some(locale) = lookup(ENV_DEFAULT_LOCALE).filter(|l| !l.is_empty()) {
            config.default_locale = locale;
        }

        if let Some(len) = lookup(ENV_MINI_GUID_LENGTH).and_then(|v| v.parse::<usize>().ok()) {
            config.mini_guid_length = len;
        }

        config
    }

    pub fn is_supported_locale(&self, locale: &str) -> bool {
        self.supported_locales.iter().any(|l| l == locale)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.mini_guid_length == 0 {
            return Err("mini_guid_length must be > 0".to_string());
        }

        if !self.is_supported_locale(&self.default_locale) {
            return Err(format!(
                "default locale '{}' is not in supported_locales",
                self.default_locale
            ));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
