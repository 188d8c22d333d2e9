use crate::stack::StackError;
use cm_abi::CompartmentId;
use cm_addresses::Range;
use cm_capability::CapabilityError;
use cm_elf::ElfError;
use cm_vmem::MapError;
use core::fmt;
use std::path::PathBuf;

/// The four kinds of failure the manager distinguishes when reporting.
///
/// All of them are fatal; the class only shapes the message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailureClass {
    /// Bad executable format, missing or invalid symbols.
    MalformedInput,
    /// Overlapping or undersized ranges, stack image overflow.
    LayoutConflict,
    /// A compartment handed back state outside its bounds.
    Integrity,
    /// Mapping, randomness or file I/O failures.
    Resource,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MalformedInput => "malformed input",
            Self::LayoutConflict => "layout conflict",
            Self::Integrity => "integrity violation",
            Self::Resource => "resource failure",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("compartment id {0} is out of range")]
    InvalidId(CompartmentId),
    #[error("compartment {0} is already allocated")]
    AlreadyAllocated(CompartmentId),
    #[error("compartment {0} is not ready to be called")]
    NotReady(CompartmentId),
    #[error("the compartment registry is already owned by another manager")]
    RegistryInUse,
    #[error("a previous compartment operation failed, refusing to continue")]
    Poisoned,
    #[error("failed to load {}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: ElfError,
    },
    #[error("missing or invalid {kind} symbol \"{name}\"")]
    MissingSymbol {
        kind: &'static str,
        name: &'static str,
    },
    #[error("range {range} lies partially or completely above the ambient limit {ceiling:#x}")]
    AboveAmbientCeiling { range: Range, ceiling: u64 },
    #[error("range {range} clashes with compartment {id}'s range {other}")]
    CompartmentClash {
        range: Range,
        id: CompartmentId,
        other: Range,
    },
    #[error("range {range} overlaps the existing mapping {mapping}")]
    MappingClash { range: Range, mapping: Range },
    #[error("insufficient memory range (required {required:#x} bytes, total {available:#x} bytes)")]
    InsufficientRange { required: u64, available: u64 },
    #[error(
        "range length {range_length:#x} and stack size {stack_size:#x} must be multiples of the page size {page_size:#x}"
    )]
    UnalignedLayout {
        range_length: u64,
        stack_size: u64,
        page_size: u64,
    },
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error("invalid SP {sp:#x} returned by compartment initialization (stack {stack})")]
    InvalidStackPointer { sp: u64, stack: Range },
    #[error("failed to derive a compartment capability")]
    Capability(#[from] CapabilityError),
    #[error("failed to map compartment memory")]
    Map(#[from] MapError),
    #[error("failed to read the process mappings")]
    Maps(#[source] std::io::Error),
    #[error("failed to obtain random bytes")]
    Random(#[source] getrandom::Error),
}

impl ManagerError {
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::InvalidId(_) | Self::MissingSymbol { .. } => FailureClass::MalformedInput,
            Self::Load { source, .. } => match source {
                ElfError::Read { .. } | ElfError::MapSection { .. } | ElfError::Map(_) => {
                    FailureClass::Resource
                }
                _ => FailureClass::MalformedInput,
            },
            Self::AlreadyAllocated(_)
            | Self::NotReady(_)
            | Self::AboveAmbientCeiling { .. }
            | Self::CompartmentClash { .. }
            | Self::MappingClash { .. }
            | Self::InsufficientRange { .. }
            | Self::UnalignedLayout { .. }
            | Self::Stack(_)
            | Self::Capability(_) => FailureClass::LayoutConflict,
            Self::InvalidStackPointer { .. } | Self::Poisoned => FailureClass::Integrity,
            Self::RegistryInUse | Self::Map(_) | Self::Maps(_) | Self::Random(_) => {
                FailureClass::Resource
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_the_failure_taxonomy() {
        assert_eq!(
            ManagerError::MissingSymbol {
                kind: "data",
                name: "__compartment_manager_call"
            }
            .class(),
            FailureClass::MalformedInput
        );
        assert_eq!(
            ManagerError::Load {
                path: PathBuf::from("x"),
                source: ElfError::BadMagic
            }
            .class(),
            FailureClass::MalformedInput
        );
        assert_eq!(
            ManagerError::Load {
                path: PathBuf::from("x"),
                source: ElfError::Read {
                    what: "ELF header",
                    source: std::io::ErrorKind::NotFound.into()
                }
            }
            .class(),
            FailureClass::Resource
        );
        assert_eq!(
            ManagerError::Stack(StackError::Overflow { limit: 0 }).class(),
            FailureClass::LayoutConflict
        );
        assert_eq!(
            ManagerError::InvalidStackPointer {
                sp: 0,
                stack: Range::new(0x1000, 0x2000)
            }
            .class(),
            FailureClass::Integrity
        );
        assert_eq!(FailureClass::Resource.to_string(), "resource failure");
    }
}
