//! Compile-time defaults and the runtime [`ManagerConfig`].

use cm_capability::Permissions;

/// Address range reserved for each compartment: code, data, stack and arena.
pub const COMPARTMENT_MEMORY_RANGE_LENGTH: u64 = 256 << 20;

/// Stack mapped at the top of each compartment's range.
pub const COMPARTMENT_STACK_SIZE: u64 = 1 << 20;

/// Environment variables copied into a compartment's initial stack.
pub const COMPARTMENT_PROPAGATED_ENV: &[&str] = &["PATH"];

/// Size of the compartment registry; identifiers are `0..MAX_COMPARTMENTS`.
pub const MAX_COMPARTMENTS: usize = 8;

/// Rights over a compartment's whole range. No execute.
pub const COMPARTMENT_DATA_PERMISSIONS: Permissions = Permissions::new()
    .with_load(true)
    .with_store(true)
    .with_load_cap(true)
    .with_store_cap(true)
    .with_store_local_cap(true)
    .with_global(true);

/// Rights over a compartment's executable range. No data access.
pub const COMPARTMENT_EXECUTE_PERMISSIONS: Permissions =
    Permissions::new().with_execute(true).with_global(true);

/// Rights of the call and return capabilities pointing into the manager.
pub const MANAGER_ENTRY_PERMISSIONS: Permissions = Permissions::new()
    .with_execute(true)
    .with_global(true)
    .with_system(true)
    .with_executive(true);

const _: () = {
    assert!(COMPARTMENT_STACK_SIZE % 4096 == 0);
    assert!(COMPARTMENT_MEMORY_RANGE_LENGTH > COMPARTMENT_STACK_SIZE);
    assert!(!COMPARTMENT_DATA_PERMISSIONS.execute());
    assert!(!COMPARTMENT_EXECUTE_PERMISSIONS.load() && !COMPARTMENT_EXECUTE_PERMISSIONS.store());
    assert!(!COMPARTMENT_EXECUTE_PERMISSIONS.system());
};

/// Runtime knobs of a [`CompartmentManager`](crate::CompartmentManager).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ManagerConfig {
    /// Stack size per compartment; a multiple of the page size.
    pub stack_size: u64,
    /// Names of the host environment variables a compartment inherits.
    pub propagated_env: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stack_size: COMPARTMENT_STACK_SIZE,
            propagated_env: COMPARTMENT_PROPAGATED_ENV
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}
