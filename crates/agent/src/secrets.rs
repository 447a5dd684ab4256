use std::collections::HashMap;

use secrecy::SecretString;

use shopkeep_core::TenantId;

/// Source of credentials referenced by http tool templates as `{{ secrets.NAME }}`.
pub trait SecretStore: Send + Sync {
    /// A secret owned by one tenant.
    fn resolve(&self, tenant_id: &TenantId, name: &str) -> Option<SecretString>;

    /// An operator-wide secret. Only system tools may fall back to these.
    fn resolve_shared(&self, _name: &str) -> Option<SecretString> {
        None
    }
}

/// Reads secrets from the process environment. Tenant secrets live under
/// `<prefix><TENANT>__<NAME>` (e.g. `SHOPKEEP_SECRET_TENANT_DEMO__CARRIER_KEY`), shared ones
/// under `<prefix><NAME>`.
#[derive(Clone, Debug)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn shared_variable(&self, name: &str) -> String {
        format!("{}{}", self.prefix, normalize(name))
    }

    fn tenant_variable(&self, tenant_id: &TenantId, name: &str) -> String {
        format!("{}{}__{}", self.prefix, normalize(&tenant_id.0), normalize(name))
    }
}

fn normalize(part: &str) -> String {
    part.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn read_env(variable: &str) -> Option<SecretString> {
    std::env::var(variable).ok().filter(|value| !value.trim().is_empty()).map(SecretString::from)
}

impl SecretStore for EnvSecretStore {
    fn resolve(&self, tenant_id: &TenantId, name: &str) -> Option<SecretString> {
        read_env(&self.tenant_variable(tenant_id, name))
    }

    fn resolve_shared(&self, name: &str) -> Option<SecretString> {
        read_env(&self.shared_variable(name))
    }
}

/// Fixed per-tenant secrets, mostly for tests and embedded setups.
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<(String, String), SecretString>,
    shared: HashMap<String, SecretString>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(
        mut self,
        tenant_id: &TenantId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.secrets.insert((tenant_id.0.clone(), name.into()), SecretString::from(value.into()));
        self
    }

    pub fn with_shared_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.shared.insert(name.into(), SecretString::from(value.into()));
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn resolve(&self, tenant_id: &TenantId, name: &str) -> Option<SecretString> {
        self.secrets.get(&(tenant_id.0.clone(), name.to_string())).cloned()
    }

    fn resolve_shared(&self, name: &str) -> Option<SecretString> {
        self.shared.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use shopkeep_core::TenantId;

    use super::{EnvSecretStore, SecretStore, StaticSecretStore};

    #[test]
    fn env_names_are_prefixed_and_tenant_scoped() {
        let store = EnvSecretStore::new("SHOPKEEP_SECRET_");
        assert_eq!(store.shared_variable("weather-key"), "SHOPKEEP_SECRET_WEATHER_KEY");
        assert_eq!(
            store.tenant_variable(&TenantId("tenant-demo".to_string()), "weather-key"),
            "SHOPKEEP_SECRET_TENANT_DEMO__WEATHER_KEY"
        );
    }

    #[test]
    fn env_secrets_of_one_tenant_are_invisible_to_another() {
        let store = EnvSecretStore::new("SHOPKEEP_TEST_SCOPED_SECRET_");
        std::env::set_var("SHOPKEEP_TEST_SCOPED_SECRET_TENANT_A__CARRIER_KEY", "a-key");
        std::env::set_var("SHOPKEEP_TEST_SCOPED_SECRET_CARRIER_KEY", "operator-key");

        let owner = store.resolve(&TenantId("tenant-a".to_string()), "carrier_key").expect("own secret");
        assert_eq!(owner.expose_secret(), "a-key");
        assert!(store.resolve(&TenantId("tenant-b".to_string()), "carrier_key").is_none());
        assert_eq!(
            store.resolve_shared("carrier_key").map(|secret| secret.expose_secret().to_string()),
            Some("operator-key".to_string())
        );

        std::env::remove_var("SHOPKEEP_TEST_SCOPED_SECRET_TENANT_A__CARRIER_KEY");
        std::env::remove_var("SHOPKEEP_TEST_SCOPED_SECRET_CARRIER_KEY");
    }

    #[test]
    fn static_secrets_are_tenant_scoped() {
        let tenant = TenantId("tenant-1".to_string());
        let store = StaticSecretStore::new().with_secret(&tenant, "weather_key", "abc123");

        let secret = store.resolve(&tenant, "weather_key").expect("secret");
        assert_eq!(secret.expose_secret(), "abc123");
        assert!(store.resolve(&TenantId("tenant-2".to_string()), "weather_key").is_none());
        assert!(format!("{secret:?}").contains("REDACTED"));
    }
}
