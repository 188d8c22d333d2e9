//! # Compartment Manager
//!
//! Loads static x86-64 executables into disjoint ranges of the current
//! process and lets them call each other through a narrow switch.
//!
//! ## Adding a compartment
//!
//! | Step | What happens                                                         | State          |
//! |------|----------------------------------------------------------------------|----------------|
//! | 1    | parse the image, resolve the well-known symbols                      | `Unallocated`  |
//! | 2    | check the range is free, reserve it, map image and stack             | `Mapped`       |
//! | 3    | build the initial stack image, publish the arena, mint capabilities  | `Mapped`       |
//! | 4    | install the return capability, run the image's start routine         | `Initializing` |
//! | 5    | validate the returned stack pointer, switch the entry to `__compartment_entry`, install the call capability | `SteadyState` |
//!
//! ## Range layout
//!
//! ```text
//!   base                                                        base + range_length
//!   | image segments | arena ........ | guard | stack | guard |
//! ```
//!
//! ```no_run
//! # use cm_manager::{CompartmentManager, ManagerConfig, COMPARTMENT_MEMORY_RANGE_LENGTH};
//! # use cm_abi::CompartmentId;
//! let mut manager = CompartmentManager::initialize(ManagerConfig::default())?;
//! manager.add_compartment(CompartmentId::SERVER, "compartments/server", &[] as &[&str], COMPARTMENT_MEMORY_RANGE_LENGTH)?;
//! let result = manager.call(CompartmentId::SERVER, &[1, 2, 3])?;
//! # Ok::<(), cm_manager::ManagerError>(())
//! ```

#[cfg(not(target_arch = "x86_64"))]
compile_error!("the compartment switch is only implemented for x86-64");

pub mod config;
mod error;
mod manager;
mod registry;
pub mod stack;
mod switch;

pub use config::*;
pub use error::{FailureClass, ManagerError};
pub use manager::CompartmentManager;
pub use registry::{CompartmentDescriptor, CompartmentState};
pub use stack::StackError;
