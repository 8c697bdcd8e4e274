use std::collections::HashSet;
use std::path::Path;

use secrecy::ExposeSecret;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded = crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_routes()?;
        self.validate_virtual_keys()?;
        self.validate_resilience()?;
        Ok(())
    }

    /// Every model route must point at configured targets
    fn validate_routes(&self) -> anyhow::Result<()> {
        if self.models.is_empty() {
            anyhow::bail!("at least one model route must be configured under [models]");
        }

        for (model, route) in &self.models {
            if route.targets.is_empty() {
                anyhow::bail!("model '{model}' has no targets");
            }

            let mut seen = HashSet::new();
            for route_target in &route.targets {
                if !self.targets.contains_key(&route_target.target) {
                    anyhow::bail!("model '{model}' references unknown target '{}'", route_target.target);
                }
                if !seen.insert(route_target.target.as_str()) {
                    anyhow::bail!("model '{model}' lists target '{}' more than once", route_target.target);
                }
            }
        }

        Ok(())
    }

    /// Virtual key ids and tokens must be unique and non-empty
    fn validate_virtual_keys(&self) -> anyhow::Result<()> {
        let mut ids = HashSet::new();
        let mut tokens = HashSet::new();

        for key in &self.virtual_keys {
            if key.id.is_empty() {
                anyhow::bail!("virtual key id must not be empty");
            }
            if key.key.expose_secret().is_empty() {
                anyhow::bail!("virtual key '{}' has an empty token", key.id);
            }
            if !ids.insert(key.id.as_str()) {
                anyhow::bail!("duplicate virtual key id '{}'", key.id);
            }
            if !tokens.insert(key.key.expose_secret()) {
                anyhow::bail!("virtual key '{}' reuses another key's token", key.id);
            }
            if let Some(models) = &key.allowed_models {
                for model in models {
                    if !self.models.contains_key(model) {
                        anyhow::bail!("virtual key '{}' allows unknown model '{model}'", key.id);
                    }
                }
            }
        }

        if self.virtual_keys.is_empty() {
            tracing::warn!("no virtual keys configured, every request will be rejected");
        }

        Ok(())
    }

    fn validate_resilience(&self) -> anyhow::Result<()> {
        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 || breaker.half_open_max_attempts == 0 {
            anyhow::bail!("circuit_breaker thresholds must be greater than 0");
        }

        if self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be greater than 0");
        }

        if let Some(code) = self
            .failover
            .retryable_status_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            anyhow::bail!("failover.retryable_status_codes contains invalid status {code}");
        }

        Ok(())
    }
}
