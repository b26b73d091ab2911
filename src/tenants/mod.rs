/// Multi-tenant configuration: validated JSON documents plus relational
/// tier/alert settings, merged into one logical config per tenant

pub mod model;
pub mod store;
pub mod validate;

pub use model::{
    AlertThresholds, ChannelMap, PriceBrackets, RoleMap, TenantConfig, TenantDocument,
    TierRoleSetting,
};
pub use store::TenantStore;
pub use validate::TenantError;
