use async_trait::async_trait;
use thiserror::Error;

use shopkeep_core::domain::business::{
    Customer, InventoryItem, Order, OrderStatus, OutboundEmail,
};
use shopkeep_core::{
    Conversation, ConversationId, Message, TenantId, ToolExecutionRecord, ToolRegistryEntry,
};

pub mod audit;
pub mod conversation;
pub mod customer;
pub mod email;
pub mod inventory;
pub mod memory;
pub mod order;
pub mod tool_execution;
pub mod tool_registry;

mod decode;

pub use audit::SqlAuditSink;
pub use conversation::SqlConversationRepository;
pub use customer::SqlCustomerRepository;
pub use email::SqlEmailOutboxRepository;
pub use inventory::SqlInventoryRepository;
pub use memory::{
    InMemoryConversationRepository, InMemoryToolDefinitionRepository,
    InMemoryToolExecutionRepository,
};
pub use order::SqlOrderRepository;
pub use tool_execution::SqlToolExecutionRepository;
pub use tool_registry::SqlToolDefinitionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<(), RepositoryError>;
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;
    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError>;
    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError>;

    /// Appends one turn and bumps the conversation's `updated_at` atomically.
    /// Returns the per-conversation sequence number assigned to the row.
    async fn append_message(&self, message: Message) -> Result<u32, RepositoryError>;

    /// All turns in replay order.
    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait ToolDefinitionRepository: Send + Sync {
    async fn list_system(&self) -> Result<Vec<ToolRegistryEntry>, RepositoryError>;
    async fn list_custom(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ToolRegistryEntry>, RepositoryError>;
    async fn save(&self, entry: ToolRegistryEntry) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ToolExecutionRepository: Send + Sync {
    async fn save(&self, record: ToolExecutionRecord) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ToolExecutionRecord>, RepositoryError>;
    async fn list_recent(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ToolExecutionRecord>, RepositoryError>;
    /// Marks an approved (`running`) execution as taken. Returns `false` when it was already
    /// claimed or is not approved, so exactly one caller gets to run it.
    async fn claim_approved(&self, id: &str, tenant_id: &TenantId) -> Result<bool, RepositoryError>;
}

/// Quantity for one `(sku, location)` pair in a bulk stock update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockLevel {
    pub sku: String,
    pub location: String,
    pub quantity: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkSetOutcome {
    pub updated: Vec<InventoryItem>,
    pub missing: Vec<StockLevel>,
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn list(&self, tenant_id: &TenantId) -> Result<Vec<InventoryItem>, RepositoryError>;
    async fn find_by_sku(
        &self,
        tenant_id: &TenantId,
        sku: &str,
    ) -> Result<Vec<InventoryItem>, RepositoryError>;
    async fn list_low_stock(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<InventoryItem>, RepositoryError>;

    /// Fails with `Conflict` when the adjustment would take quantity below zero.
    async fn adjust(
        &self,
        tenant_id: &TenantId,
        sku: &str,
        location: &str,
        delta: i64,
    ) -> Result<InventoryItem, RepositoryError>;

    /// Moves stock between locations in one transaction; the destination row is
    /// created when missing. Returns `(from, to)` after the move.
    async fn transfer(
        &self,
        tenant_id: &TenantId,
        sku: &str,
        from_location: &str,
        to_location: &str,
        quantity: i64,
    ) -> Result<(InventoryItem, InventoryItem), RepositoryError>;

    async fn bulk_set(
        &self,
        tenant_id: &TenantId,
        levels: Vec<StockLevel>,
    ) -> Result<BulkSetOutcome, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn list(
        &self,
        tenant_id: &TenantId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError>;
    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Fails with `Conflict` when the status transition is not allowed.
    async fn update_status(
        &self,
        tenant_id: &TenantId,
        id: &str,
        status: OrderStatus,
    ) -> Result<Order, RepositoryError>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn search(
        &self,
        tenant_id: &TenantId,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Customer>, RepositoryError>;
    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &str,
    ) -> Result<Option<Customer>, RepositoryError>;
    async fn create(&self, customer: Customer) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EmailOutboxRepository: Send + Sync {
    async fn enqueue(&self, email: OutboundEmail) -> Result<(), RepositoryError>;
    async fn list(&self, tenant_id: &TenantId) -> Result<Vec<OutboundEmail>, RepositoryError>;
}
