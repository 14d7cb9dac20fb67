//! CRM gateway: audience lists, list memberships and record details.
//!
//! The pipeline consumes the [`CrmGateway`] trait; [`HubSpotClient`] is the
//! production implementation. Transport failures surface as
//! [`ExposecastError::Crm`](exposecast_shared::ExposecastError::Crm) and are
//! fatal to the task that hit them.

mod hubspot;

use async_trait::async_trait;

use exposecast_shared::{CompanyRecord, ContactRecord, ListDescriptor, Result};

pub use hubspot::HubSpotClient;

/// Read-only view of the CRM backend used for audience selection.
#[async_trait]
pub trait CrmGateway: Send + Sync {
    /// All lists available for targeting.
    ///
    /// API-level refusals yield an empty sequence; only transport failures are errors.
    async fn list_all(&self) -> Result<Vec<ListDescriptor>>;

    /// Record ids of every member of `list_id`, across all pages.
    async fn members_of(&self, list_id: &str) -> Result<Vec<String>>;

    /// Contact projections for `ids`, fetched in paced batches.
    async fn contact_details(&self, ids: &[String]) -> Result<Vec<ContactRecord>>;

    /// Company projections for `ids`, fetched in paced batches.
    async fn company_details(&self, ids: &[String]) -> Result<Vec<CompanyRecord>>;
}
