use crate::application::error::ServiceError;
use crate::domain::entities::RecordId;

/// The acting user of a write; anonymous viewers may only read.
pub fn require_actor(viewer: Option<RecordId>) -> Result<RecordId, ServiceError> {
    viewer.ok_or(ServiceError::Unauthenticated)
}

pub fn ensure_owner(
    entity: &'static str,
    owner: RecordId,
    actor: RecordId,
) -> Result<(), ServiceError> {
    if owner == actor {
        Ok(())
    } else {
        Err(ServiceError::not_owner(entity))
    }
}
