use crate::config::{
    COMPARTMENT_DATA_PERMISSIONS, COMPARTMENT_EXECUTE_PERMISSIONS, MANAGER_ENTRY_PERMISSIONS,
    ManagerConfig,
};
use crate::error::ManagerError;
use crate::registry::{CompartmentDescriptor, CompartmentState, REGISTRY, Registry};
use crate::stack::{self, StartupInfo};
use crate::switch;
use cm_abi::{
    ARENA_BASE_SYMBOL, ARENA_TOP_SYMBOL, CAPABILITY_SLOT_SIZE, CompartmentId, ENTRY_SYMBOL,
    MANAGER_CALL_SYMBOL, MANAGER_RETURN_SYMBOL, MAX_ARGUMENTS, call_through,
};
use cm_addresses::{PageSize, Range};
use cm_capability::{Capability, CapabilityBuilder};
use cm_elf::{AuxType, StaticExecutable};
use cm_vmem::{AddressSpace, HostAddressSpace, Protection, maps};
use log::{debug, info, trace};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Addresses of the symbols every compartment image provides.
#[derive(Debug, Clone, Copy)]
struct WellKnownSymbols {
    entry: u64,
    call_slot: u64,
    return_slot: u64,
    arena_base: u64,
    arena_top: u64,
}

impl WellKnownSymbols {
    fn resolve(exe: &StaticExecutable) -> Result<Self, ManagerError> {
        let function = |name: &'static str| {
            exe.find_symbol(name, 0, Protection::new().with_execute(true))
                .ok_or(ManagerError::MissingSymbol {
                    kind: "function",
                    name,
                })
        };
        let data = |name: &'static str| {
            exe.find_symbol(name, CAPABILITY_SLOT_SIZE, Protection::READ_WRITE)
                .ok_or(ManagerError::MissingSymbol { kind: "data", name })
        };

        Ok(Self {
            entry: function(ENTRY_SYMBOL)?,
            call_slot: data(MANAGER_CALL_SYMBOL)?,
            return_slot: data(MANAGER_RETURN_SYMBOL)?,
            arena_base: data(ARENA_BASE_SYMBOL)?,
            arena_top: data(ARENA_TOP_SYMBOL)?,
        })
    }
}

/// Memory set aside for one compartment.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Layout {
    /// The whole reserved range; bounds of the data capability.
    range: Range,
    stack: Range,
    arena: Range,
}

impl Layout {
    /// Splits `range_length` bytes starting at the image into image, arena,
    /// and a stack of `stack_size` bytes between two guard pages.
    fn plan(
        image: Range,
        range_length: u64,
        stack_size: u64,
        page_size: PageSize,
    ) -> Result<Self, ManagerError> {
        let page = page_size.as_u64();
        if !range_length.is_multiple_of(page) || !stack_size.is_multiple_of(page) {
            return Err(ManagerError::UnalignedLayout {
                range_length,
                stack_size,
                page_size: page,
            });
        }

        let required = image
            .size()
            .checked_add(stack_size)
            .and_then(|r| r.checked_add(2 * page))
            .unwrap_or(u64::MAX);
        let range = Range::from_base_len(image.base, range_length)
            .filter(|_| required <= range_length)
            .ok_or(ManagerError::InsufficientRange {
                required,
                available: range_length,
            })?;

        // One guard page above the stack, one below it.
        let stack_base = range.top - stack_size - page;
        Ok(Self {
            range,
            stack: Range::new(stack_base, stack_base + stack_size),
            arena: Range::new(image.top, stack_base - page),
        })
    }
}

/// Loads compartments into the current process and calls into them.
///
/// There is one manager per process; it owns the process-wide registry the
/// switch consults. Every failure while adding a compartment is fatal: the
/// manager poisons itself and refuses any further work, since a half-built
/// isolation boundary is worse than none.
#[derive(Debug)]
pub struct CompartmentManager {
    aspace: HostAddressSpace,
    config: ManagerConfig,
    registry: &'static Registry,
    ambient_ceiling: u64,
    poisoned: bool,
}

impl CompartmentManager {
    /// Claims the registry and records the ambient ceiling: the lowest
    /// address mapped right now. Everything at or above it is assumed to
    /// belong to the manager.
    ///
    /// # Errors
    /// The registry is already claimed, or the process mappings cannot be read.
    pub fn initialize(config: ManagerConfig) -> Result<Self, ManagerError> {
        let registry = REGISTRY.claim().ok_or(ManagerError::RegistryInUse)?;
        let aspace = HostAddressSpace::new()?;
        let ambient_ceiling = maps::lowest_address().map_err(ManagerError::Maps)?;

        info!(
            "Compartment manager initialized: ambient limit {ambient_ceiling:#x}, page size {}",
            aspace.page_size()
        );

        Ok(Self {
            aspace,
            config,
            registry,
            ambient_ceiling,
            poisoned: false,
        })
    }

    #[must_use]
    pub const fn ambient_ceiling(&self) -> u64 {
        self.ambient_ceiling
    }

    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Current descriptor of `id`.
    ///
    /// # Errors
    /// [`ManagerError::InvalidId`] for identifiers outside the registry.
    pub fn descriptor(&self, id: CompartmentId) -> Result<CompartmentDescriptor, ManagerError> {
        let index = Registry::index(id).ok_or(ManagerError::InvalidId(id))?;
        Ok(self.registry.load(index))
    }

    /// # Errors
    /// [`ManagerError::InvalidId`] for identifiers outside the registry.
    pub fn state(&self, id: CompartmentId) -> Result<CompartmentState, ManagerError> {
        self.descriptor(id).map(|d| d.state)
    }

    /// Checks that `range` may be reserved for a new compartment.
    ///
    /// The range must lie below the ambient ceiling, must not intersect the
    /// data region of any compartment that has an entry point, and must not
    /// intersect anything currently mapped. None of this is atomic with
    /// respect to other threads mapping memory.
    ///
    /// # Errors
    /// The conflict found, or a failure reading the process mappings.
    pub fn check_range_free(&self, range: Range) -> Result<(), ManagerError> {
        if range.top > self.ambient_ceiling {
            return Err(ManagerError::AboveAmbientCeiling {
                range,
                ceiling: self.ambient_ceiling,
            });
        }

        for (index, descriptor) in self.registry.snapshot().iter().enumerate() {
            if !descriptor.entry.is_tagged() {
                continue;
            }
            let other = descriptor.data.bounds();
            if other.intersects(&range) {
                return Err(ManagerError::CompartmentClash {
                    range,
                    id: CompartmentId::new(index),
                    other,
                });
            }
        }

        let live = maps::current().map_err(ManagerError::Maps)?;
        if let Some(&mapping) = live.iter().find(|m| m.intersects(&range)) {
            return Err(ManagerError::MappingClash { range, mapping });
        }

        Ok(())
    }

    /// Loads the static executable at `path` as compartment `id`, lets it
    /// initialize itself and makes it callable.
    ///
    /// The compartment's range starts at the image's lowest address and
    /// spans `range_length` bytes. `args` follow the path in its `argv`.
    ///
    /// # Errors
    /// Any failure; the manager is poisoned afterwards.
    pub fn add_compartment<S: AsRef<OsStr>>(
        &mut self,
        id: CompartmentId,
        path: impl AsRef<Path>,
        args: &[S],
        range_length: u64,
    ) -> Result<(), ManagerError> {
        if self.poisoned {
            return Err(ManagerError::Poisoned);
        }

        let result = self.add_compartment_inner(id, path.as_ref(), args, range_length);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Calls compartment `id` with up to six word arguments.
    ///
    /// # Errors
    /// The manager is poisoned, or `id` is not in steady state.
    pub fn call(&self, id: CompartmentId, args: &[u64]) -> Result<u64, ManagerError> {
        if self.poisoned {
            return Err(ManagerError::Poisoned);
        }
        if self.state(id)? != CompartmentState::SteadyState || args.len() > MAX_ARGUMENTS {
            return Err(ManagerError::NotReady(id));
        }

        let mut words = [0u64; MAX_ARGUMENTS];
        words[..args.len()].copy_from_slice(args);

        trace!("Calling compartment {id}");
        // SAFETY: the descriptor is in steady state, so its entry, stack and
        // data capabilities were minted by `add_compartment`.
        Ok(unsafe { call_through(switch::switch_address(), id, words) })
    }

    fn add_compartment_inner<S: AsRef<OsStr>>(
        &mut self,
        id: CompartmentId,
        path: &Path,
        args: &[S],
        range_length: u64,
    ) -> Result<(), ManagerError> {
        let index = Registry::index(id).ok_or(ManagerError::InvalidId(id))?;
        if self.registry.load(index).state != CompartmentState::Unallocated {
            return Err(ManagerError::AlreadyAllocated(id));
        }

        // Step 1: parse the image and find the symbols we need.
        let exe = StaticExecutable::open(path, self.aspace.page_size()).map_err(|source| {
            ManagerError::Load {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let symbols = WellKnownSymbols::resolve(&exe)?;

        // Step 2: reserve the range and map code, data and stack.
        let layout = self.setup_mappings(&exe, range_length, path)?;
        self.registry.store(
            index,
            CompartmentDescriptor {
                state: CompartmentState::Mapped,
                ..CompartmentDescriptor::UNALLOCATED
            },
        );

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(path.as_os_str().as_bytes().to_vec());
        argv.extend(args.iter().map(|a| a.as_ref().as_bytes().to_vec()));
        let sp = self.setup_stack(&exe, layout.stack, &argv)?;

        // SAFETY: both symbols are 8-byte data words inside a writable
        // segment that was just mapped.
        unsafe {
            write_word(symbols.arena_base, layout.arena.base);
            write_word(symbols.arena_top, layout.arena.top);
        }

        // Step 3: mint the compartment's capabilities.
        let root = Capability::root();
        let data = CapabilityBuilder::new(root)
            .bounds(layout.range.base, layout.range.size())
            .permissions(COMPARTMENT_DATA_PERMISSIONS)
            .build()?;
        let executable = exe.executable_range();
        let entry = CapabilityBuilder::new(root)
            .bounds(executable.base, executable.size())
            .address(symbols.entry)
            .permissions(COMPARTMENT_EXECUTE_PERMISSIONS)
            .build()?;
        let init_entry = entry.with_address(exe.entry_point())?;
        let stack = CapabilityBuilder::new(data)
            .bounds(layout.stack.base, layout.stack.size())
            .address(sp)
            .build()?;

        debug!("Compartment {id}: data {data}");
        debug!("Compartment {id}: entry {entry}, init {:#x}", init_entry.address());
        debug!("Compartment {id}: stack {stack}, arena {}", layout.arena);

        // Step 4: let it initialize itself. Only the return path exists yet.
        let return_cap = CapabilityBuilder::new(root)
            .address(switch::return_address())
            .permissions(MANAGER_ENTRY_PERMISSIONS)
            .build()?;
        // SAFETY: see above.
        unsafe { write_word(symbols.return_slot, return_cap.to_word()) };

        self.registry.store(
            index,
            CompartmentDescriptor {
                stack,
                data,
                // execve() starts a program with a zero thread pointer, too.
                thread_pointer: Capability::null(),
                entry: init_entry,
                update_on_return: true,
                state: CompartmentState::Initializing,
            },
        );

        info!("Initializing compartment {id} from {}", path.display());
        // SAFETY: the descriptor is complete and its entry is the image's
        // start routine, which returns through the return slot.
        unsafe { call_through(switch::switch_address(), id, [0; MAX_ARGUMENTS]) };

        let mut descriptor = self.registry.load(index);
        let sp = descriptor.stack.address();
        if !descriptor.stack.is_address_in_bounds() {
            return Err(ManagerError::InvalidStackPointer {
                sp,
                stack: layout.stack,
            });
        }

        // Step 5: finalize. Calls now start at the application entry point.
        descriptor.entry = entry;
        descriptor.update_on_return = false;
        descriptor.state = CompartmentState::SteadyState;
        self.registry.store(index, descriptor);

        let call_cap = CapabilityBuilder::new(root)
            .address(switch::switch_address())
            .permissions(MANAGER_ENTRY_PERMISSIONS)
            .build()?;
        // SAFETY: see above.
        unsafe { write_word(symbols.call_slot, call_cap.to_word()) };

        info!(
            "Compartment {id} ready: range {}, sp {sp:#x}, thread pointer {:#x}",
            layout.range,
            descriptor.thread_pointer.address()
        );
        Ok(())
    }

    fn setup_mappings(
        &mut self,
        exe: &StaticExecutable,
        range_length: u64,
        path: &Path,
    ) -> Result<Layout, ManagerError> {
        let layout = Layout::plan(
            exe.total_range(),
            range_length,
            self.config.stack_size,
            self.aspace.page_size(),
        )?;

        self.check_range_free(layout.range)?;

        // Everything not mapped below stays access-denied guard space.
        self.aspace.reserve(layout.range)?;
        exe.map(&mut self.aspace)
            .map_err(|source| ManagerError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        self.aspace.map_stack(layout.stack)?;

        debug!(
            "Reserved {}: image {}, stack {}, arena {}",
            layout.range,
            exe.total_range(),
            layout.stack,
            layout.arena
        );
        Ok(layout)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn setup_stack(
        &self,
        exe: &StaticExecutable,
        stack: Range,
        argv: &[Vec<u8>],
    ) -> Result<u64, ManagerError> {
        let env = stack::propagated_environment(&self.config.propagated_env);

        let mut random = [0u8; 16];
        getrandom::getrandom(&mut random).map_err(ManagerError::Random)?;

        let auxv = [
            (AuxType::Secure, 0),
            (
                AuxType::ProgramHeaderCount,
                exe.auxiliary_value(AuxType::ProgramHeaderCount),
            ),
            (
                AuxType::ProgramHeaderEntrySize,
                exe.auxiliary_value(AuxType::ProgramHeaderEntrySize),
            ),
            (
                AuxType::ProgramHeaders,
                exe.auxiliary_value(AuxType::ProgramHeaders),
            ),
            (AuxType::PageSize, self.aspace.page_size().as_u64()),
        ];

        let info = StartupInfo {
            args: argv,
            env: &env,
            random,
            auxv: &auxv,
        };

        // Leave half of the stack to the compartment itself.
        let limit = stack.top - stack.size() / 2;

        // SAFETY: `stack` was mapped read-write by `setup_mappings` and
        // nothing else refers to it yet.
        let memory = unsafe {
            core::slice::from_raw_parts_mut(stack.base as *mut u8, stack.size() as usize)
        };
        Ok(stack::build(memory, stack.top, limit, &info)?)
    }
}

/// # Safety
/// `address` must point to eight writable bytes.
unsafe fn write_word(address: u64, value: u64) {
    unsafe { (address as *mut u64).write_unaligned(value) };
}
