//! # Resolver Configuration
//!
//! Cache-mode selection, the inline-frame toggle and the error absorption
//! policy. Configuration is a plain value handed to each resolver when it is
//! built; switching modes means building a new resolver.
//!
//! ## Environment Variables
//!
//! [`ResolverConfig::from_env`] reads:
//! - `TRACERY_CACHE_MODE`: `speed`, `memory` or `hybrid` (default: `speed`)
//! - `TRACERY_RESOLVE_INLINES`: `true`/`false` (default: `true`)
//! - `TRACERY_ABSORB_ERRORS`: `true`/`false` (default: `true`)

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::{TraceError, TraceResult};

pub const CACHE_MODE_ENV: &str = "TRACERY_CACHE_MODE";
pub const RESOLVE_INLINES_ENV: &str = "TRACERY_RESOLVE_INLINES";
pub const ABSORB_ERRORS_ENV: &str = "TRACERY_ABSORB_ERRORS";

/// Trade-off between lookup speed and retained memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode
{
    /// Keep nothing between queries; walk debug info on every lookup.
    PrioritizeMemory,
    /// Build the sorted tables while resolving one trace, then drop them.
    Hybrid,
    /// Build sorted tables on first use and keep them for the resolver's lifetime.
    #[default]
    PrioritizeSpeed,
}

impl CacheMode
{
    /// Whether per-object tables are built and kept while a resolver lives.
    pub fn retains_tables(self) -> bool
    {
        !matches!(self, CacheMode::PrioritizeMemory)
    }
}

impl FromStr for CacheMode
{
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "speed" | "prioritize-speed" | "prioritize_speed" => Ok(CacheMode::PrioritizeSpeed),
            "memory" | "prioritize-memory" | "prioritize_memory" => Ok(CacheMode::PrioritizeMemory),
            "hybrid" => Ok(CacheMode::Hybrid),
            _ => Err(TraceError::Config(format!(
                "Unknown cache mode: {s}. Use 'speed', 'memory' or 'hybrid'"
            ))),
        }
    }
}

impl fmt::Display for CacheMode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            CacheMode::PrioritizeMemory => "prioritize-memory",
            CacheMode::Hybrid => "hybrid",
            CacheMode::PrioritizeSpeed => "prioritize-speed",
        };
        write!(f, "{label}")
    }
}

/// Settings shared by every resolver a [`Symbolizer`](crate::trace::Symbolizer) creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig
{
    /// Table retention policy
    pub cache_mode: CacheMode,
    /// Produce synthesized frames for inlined calls
    pub resolve_inlines: bool,
    /// Degrade internal failures to unresolved frames instead of returning them
    pub absorb_errors: bool,
}

impl Default for ResolverConfig
{
    fn default() -> Self
    {
        Self {
            cache_mode: CacheMode::PrioritizeSpeed,
            resolve_inlines: true,
            absorb_errors: true,
        }
    }
}

impl ResolverConfig
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    #[must_use]
    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self
    {
        self.cache_mode = cache_mode;
        self
    }

    #[must_use]
    pub fn with_inlines(mut self, resolve_inlines: bool) -> Self
    {
        self.resolve_inlines = resolve_inlines;
        self
    }

    #[must_use]
    pub fn with_absorb_errors(mut self, absorb_errors: bool) -> Self
    {
        self.absorb_errors = absorb_errors;
        self
    }

    /// Build a configuration from `TRACERY_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// ## Errors
    ///
    /// Returns [`TraceError::Config`] when a variable is set to an unrecognized value.
    pub fn from_env() -> TraceResult<Self>
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TraceResult<Self>
    {
        let mut config = Self::default();
        if let Some(mode) = lookup(CACHE_MODE_ENV) {
            config.cache_mode = mode.parse()?;
        }
        if let Some(value) = lookup(RESOLVE_INLINES_ENV) {
            config.resolve_inlines = parse_flag(RESOLVE_INLINES_ENV, &value)?;
        }
        if let Some(value) = lookup(ABSORB_ERRORS_ENV) {
            config.absorb_errors = parse_flag(ABSORB_ERRORS_ENV, &value)?;
        }
        Ok(config)
    }
}

fn parse_flag(name: &str, value: &str) -> TraceResult<bool>
{
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TraceError::Config(format!("{name} must be a boolean, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
    {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_cache_mode_from_str()
    {
        assert_eq!("speed".parse::<CacheMode>().unwrap(), CacheMode::PrioritizeSpeed);
        assert_eq!("Prioritize-Memory".parse::<CacheMode>().unwrap(), CacheMode::PrioritizeMemory);
        assert_eq!("hybrid".parse::<CacheMode>().unwrap(), CacheMode::Hybrid);
        assert!("fastest".parse::<CacheMode>().is_err());
    }

    #[test]
    fn test_cache_mode_display_round_trips()
    {
        for mode in [CacheMode::PrioritizeMemory, CacheMode::Hybrid, CacheMode::PrioritizeSpeed] {
            assert_eq!(mode.to_string().parse::<CacheMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_default_config()
    {
        let config = ResolverConfig::default();
        assert_eq!(config.cache_mode, CacheMode::PrioritizeSpeed);
        assert!(config.resolve_inlines);
        assert!(config.absorb_errors);
    }

    #[test]
    fn test_config_from_lookup()
    {
        let config = ResolverConfig::from_lookup(lookup_from(&[
            (CACHE_MODE_ENV, "memory"),
            (RESOLVE_INLINES_ENV, "off"),
        ]))
        .unwrap();
        assert_eq!(config.cache_mode, CacheMode::PrioritizeMemory);
        assert!(!config.resolve_inlines);
        assert!(config.absorb_errors);
    }

    #[test]
    fn test_config_from_lookup_rejects_garbage()
    {
        let result = ResolverConfig::from_lookup(lookup_from(&[(ABSORB_ERRORS_ENV, "maybe")]));
        assert!(matches!(result, Err(TraceError::Config(_))));
    }
}
