use typed_builder::TypedBuilder;

/// Sizing of the deletion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct DeleterSettings {
    /// Number of worker tasks applying requests.
    #[builder(default = 4)]
    pub workers: usize,
    /// Capacity of the bounded request queue.
    #[builder(default = 1024)]
    pub queue_capacity: usize,
    /// Maximum number of requests parked outside a full queue, waiting for
    /// admission. Submissions beyond that are rejected.
    #[builder(default = 1024)]
    pub overflow_limit: usize,
    /// Ids passed to a single store delete call.
    #[builder(default = 64)]
    pub chunk_size: usize,
}

impl Default for DeleterSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = DeleterSettings::default();

        assert_eq!(settings.workers, 4);
        assert_eq!(settings.queue_capacity, 1024);
        assert_eq!(settings.overflow_limit, 1024);
        assert_eq!(settings.chunk_size, 64);
    }

    #[test]
    fn overrides() {
        let settings = DeleterSettings::builder().workers(1).chunk_size(8).build();

        assert_eq!(settings.workers, 1);
        assert_eq!(settings.chunk_size, 8);
        assert_eq!(settings.queue_capacity, 1024);
    }
}
