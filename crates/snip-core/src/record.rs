use uuid::Uuid;

/// Identifier of the user owning a partition of records.
pub type OwnerId = Uuid;

/// Result of a single save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The id now mapped to the target.
    pub id: String,
    /// `true` when an active record with the same target already existed
    /// and its id was returned instead of allocating a new one.
    pub conflict: bool,
}

impl SaveOutcome {
    pub fn created(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            conflict: false,
        }
    }

    pub fn existing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            conflict: true,
        }
    }
}

/// A fire-and-forget request to tombstone some of an owner's records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub owner: OwnerId,
    pub ids: Vec<String>,
}

impl DeletionRequest {
    pub fn new(owner: OwnerId, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            owner,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}
