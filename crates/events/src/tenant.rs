use stockroom_core::TenantId;

/// Helper trait for tenant-scoped messages.
///
/// Subscribers use it to drop messages that belong to another tenant, so one
/// company's audit trail never shows the other's sessions.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

/// Keep only the messages that belong to `tenant_id`.
pub fn for_tenant<M, I>(tenant_id: TenantId, messages: I) -> impl Iterator<Item = M>
where
    M: TenantScoped,
    I: IntoIterator<Item = M>,
{
    messages.into_iter().filter(move |m| m.tenant_id() == tenant_id)
}
