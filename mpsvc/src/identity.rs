//! Hardware identifier → logical index.

use crate::registry::CoreRegistry;

/// Logical index of the registered core whose identity is `processor_id`.
///
/// A linear scan: registries hold a handful of records and the lookup runs
/// once per service call.
pub fn resolve(registry: &CoreRegistry, processor_id: u32) -> Option<usize> {
    registry
        .iter()
        .find(|(_, record)| {
            record
                .identity()
                .is_some_and(|identity| identity.processor_id == processor_id)
        })
        .map(|(index, _)| index)
}

/// Like [`resolve`], for callers that must already be registered.
///
/// # Panics
/// If `processor_id` never registered; bring-up registers every core before
/// it can call into the services, so this is a programming error.
pub fn resolve_self(registry: &CoreRegistry, processor_id: u32) -> usize {
    match resolve(registry, processor_id) {
        Some(index) => index,
        None => panic!("processor {processor_id:#x} is not in the core registry"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{Location, ProcessorIdentity};

    fn registry() -> CoreRegistry {
        let registry = CoreRegistry::new(4, core::hint::spin_loop);
        for (index, processor_id) in [0x00, 0x06, 0x02].into_iter().enumerate() {
            if index > 0 {
                registry.claim_index().unwrap();
            }
            registry.register_core(
                index == 0,
                index,
                ProcessorIdentity {
                    processor_id,
                    location: Location::default(),
                },
            );
        }
        registry
    }

    #[test]
    fn maps_sparse_ids_to_dense_indices() {
        let registry = registry();
        assert_eq!(resolve_self(&registry, 0x00), 0);
        assert_eq!(resolve_self(&registry, 0x06), 1);
        assert_eq!(resolve_self(&registry, 0x02), 2);
    }

    #[test]
    fn unknown_id_does_not_resolve() {
        assert_eq!(resolve(&registry(), 0x42), None);
    }

    #[test]
    #[should_panic(expected = "not in the core registry")]
    fn resolving_an_unregistered_caller_is_fatal() {
        resolve_self(&registry(), 0x42);
    }
}
