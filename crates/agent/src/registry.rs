use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use shopkeep_core::config::ToolsConfig;
use shopkeep_core::{TenantId, ToolRegistryEntry, ToolSchema};
use shopkeep_db::repositories::{RepositoryError, ToolDefinitionRepository};

struct CachedSystemTools {
    loaded_at: Instant,
    entries: Arc<Vec<ToolRegistryEntry>>,
}

/// TTL cache for system tool definitions. Readers get a shared snapshot; a refresh
/// swaps the snapshot instead of editing it.
struct RegistryCache {
    ttl: Duration,
    slot: RwLock<Option<CachedSystemTools>>,
}

impl RegistryCache {
    fn new(ttl: Duration) -> Self {
        Self { ttl, slot: RwLock::new(None) }
    }

    async fn fresh(&self) -> Option<Arc<Vec<ToolRegistryEntry>>> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|cached| cached.loaded_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.entries))
    }

    async fn store(&self, entries: Vec<ToolRegistryEntry>) -> Arc<Vec<ToolRegistryEntry>> {
        let entries = Arc::new(entries);
        *self.slot.write().await =
            Some(CachedSystemTools { loaded_at: Instant::now(), entries: Arc::clone(&entries) });
        entries
    }

    async fn clear(&self) {
        *self.slot.write().await = None;
    }
}

/// System tools merged with one tenant's custom tools for a single request.
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolRegistryEntry>,
}

impl ToolCatalog {
    pub fn new(entries: Vec<ToolRegistryEntry>) -> Self {
        Self { entries }
    }

    pub fn find(&self, name: &str) -> Option<&ToolRegistryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.iter().map(|entry| entry.name.clone()).collect();
        names.sort();
        names
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries.iter().map(ToolRegistryEntry::schema).collect()
    }

    pub fn entries(&self) -> &[ToolRegistryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ToolRegistry {
    definitions: Arc<dyn ToolDefinitionRepository>,
    cache: RegistryCache,
    custom_prefix: String,
}

impl ToolRegistry {
    pub fn new(
        definitions: Arc<dyn ToolDefinitionRepository>,
        ttl: Duration,
        custom_prefix: impl Into<String>,
    ) -> Self {
        Self { definitions, cache: RegistryCache::new(ttl), custom_prefix: custom_prefix.into() }
    }

    pub fn from_config(definitions: Arc<dyn ToolDefinitionRepository>, config: &ToolsConfig) -> Self {
        Self::new(
            definitions,
            Duration::from_secs(config.registry_ttl_secs),
            config.custom_prefix.clone(),
        )
    }

    /// Cached system tools merged with the tenant's custom tools, which are always read
    /// fresh. Disabled entries are left out.
    pub async fn load(
        &self,
        tenant_id: &TenantId,
        force_refresh: bool,
    ) -> Result<ToolCatalog, RepositoryError> {
        let system = self.system_entries(force_refresh).await?;
        let custom = self.definitions.list_custom(tenant_id).await?;

        let mut entries: Vec<ToolRegistryEntry> =
            system.iter().filter(|entry| entry.enabled).cloned().collect();
        let mut taken: HashSet<String> = entries.iter().map(|entry| entry.name.clone()).collect();

        for mut entry in custom.into_iter().filter(|entry| entry.enabled) {
            if !entry.name.starts_with(&self.custom_prefix) {
                entry.name = format!("{}{}", self.custom_prefix, entry.name);
            }
            if !taken.insert(entry.name.clone()) {
                warn!(
                    event_name = "tools.registry.custom_collision",
                    tenant_id = %tenant_id,
                    tool = %entry.name,
                    "custom tool shadows an existing tool and was skipped"
                );
                continue;
            }
            entries.push(entry);
        }

        Ok(ToolCatalog::new(entries))
    }

    pub async fn invalidate(&self) {
        self.cache.clear().await;
        debug!(event_name = "tools.registry.invalidated", "tool registry cache cleared");
    }

    async fn system_entries(
        &self,
        force_refresh: bool,
    ) -> Result<Arc<Vec<ToolRegistryEntry>>, RepositoryError> {
        if !force_refresh {
            if let Some(entries) = self.cache.fresh().await {
                return Ok(entries);
            }
        }

        let entries = self.definitions.list_system().await?;
        debug!(
            event_name = "tools.registry.refreshed",
            count = entries.len(),
            forced = force_refresh,
            "system tools loaded"
        );
        Ok(self.cache.store(entries).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use shopkeep_core::{ExecutionKind, TenantId, ToolRegistryEntry, ToolSource};
    use shopkeep_db::repositories::{
        InMemoryToolDefinitionRepository, RepositoryError, ToolDefinitionRepository,
    };

    use super::ToolRegistry;

    fn entry(name: &str, source: ToolSource, tenant: Option<&str>) -> ToolRegistryEntry {
        ToolRegistryEntry {
            name: name.to_string(),
            category: "test".to_string(),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object", "properties": {}}),
            execution_kind: ExecutionKind::Local,
            execution_config: json!({}),
            source,
            tenant_id: tenant.map(|id| TenantId(id.to_string())),
            requires_tenant_id: true,
            requires_user_id: false,
            is_read_only: true,
            requires_approval: false,
            max_execution_time_ms: 1_000,
            enabled: true,
        }
    }

    struct CountingRepository {
        inner: InMemoryToolDefinitionRepository,
        system_loads: AtomicUsize,
    }

    impl CountingRepository {
        fn new(entries: Vec<ToolRegistryEntry>) -> Self {
            Self {
                inner: InMemoryToolDefinitionRepository::with_entries(entries),
                system_loads: AtomicUsize::new(0),
            }
        }

        fn loads(&self) -> usize {
            self.system_loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ToolDefinitionRepository for CountingRepository {
        async fn list_system(&self) -> Result<Vec<ToolRegistryEntry>, RepositoryError> {
            self.system_loads.fetch_add(1, Ordering::SeqCst);
            self.inner.list_system().await
        }

        async fn list_custom(
            &self,
            tenant_id: &TenantId,
        ) -> Result<Vec<ToolRegistryEntry>, RepositoryError> {
            self.inner.list_custom(tenant_id).await
        }

        async fn save(&self, entry: ToolRegistryEntry) -> Result<(), RepositoryError> {
            self.inner.save(entry).await
        }
    }

    #[tokio::test]
    async fn system_tools_are_cached_until_invalidated_or_forced() {
        let repo = Arc::new(CountingRepository::new(vec![entry(
            "inventory",
            ToolSource::System,
            None,
        )]));
        let registry = ToolRegistry::new(repo.clone(), Duration::from_secs(60), "custom_");
        let tenant = TenantId("tenant-1".to_string());

        registry.load(&tenant, false).await.expect("first load");
        registry.load(&tenant, false).await.expect("cached load");
        assert_eq!(repo.loads(), 1);

        registry.load(&tenant, true).await.expect("forced load");
        assert_eq!(repo.loads(), 2);

        registry.invalidate().await;
        registry.load(&tenant, false).await.expect("after invalidate");
        assert_eq!(repo.loads(), 3);
    }

    #[tokio::test]
    async fn expired_ttl_reloads_system_tools() {
        let repo = Arc::new(CountingRepository::new(vec![entry(
            "inventory",
            ToolSource::System,
            None,
        )]));
        let registry = ToolRegistry::new(repo.clone(), Duration::ZERO, "custom_");
        let tenant = TenantId("tenant-1".to_string());

        registry.load(&tenant, false).await.expect("load");
        registry.load(&tenant, false).await.expect("load");
        assert_eq!(repo.loads(), 2);
    }

    #[tokio::test]
    async fn custom_tools_are_namespaced_tenant_scoped_and_never_shadow_system_tools() {
        let repo = Arc::new(CountingRepository::new(vec![
            entry("inventory", ToolSource::System, None),
            entry("custom_weather", ToolSource::System, None),
            entry("loyalty_points", ToolSource::Custom, Some("tenant-1")),
            entry("weather", ToolSource::Custom, Some("tenant-1")),
            entry("payroll", ToolSource::Custom, Some("tenant-2")),
        ]));
        let mut disabled = entry("orders", ToolSource::System, None);
        disabled.enabled = false;
        repo.save(disabled).await.expect("save disabled");

        let registry = ToolRegistry::new(repo, Duration::from_secs(60), "custom_");
        let catalog = registry.load(&TenantId("tenant-1".to_string()), false).await.expect("load");

        assert_eq!(catalog.names(), vec!["custom_loyalty_points", "custom_weather", "inventory"]);
        let weather = catalog.find("custom_weather").expect("system weather");
        assert_eq!(weather.source, ToolSource::System);
        assert!(catalog.find("orders").is_none());
        assert_eq!(catalog.schemas().len(), 3);
    }
}
