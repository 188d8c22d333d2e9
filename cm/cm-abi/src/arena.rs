//! # Arena Allocation
//!
//! A compartment may only map memory inside its own reserved range. The
//! manager hands it an arena `[base, top)` through two data words; the
//! compartment's `mmap(2)` replacement then follows these rules:
//!
//! - **fixed** requests are honoured only strictly inside the data-region
//!   bounds, and never wrap around;
//! - **floating** requests are rounded up to whole pages and carved off
//!   the top of the arena, which only ever shrinks;
//! - **release** maps the range access-denied again, so the reservation
//!   stays hole-free and freed pages are never handed out twice;
//! - moving the program break (`brk`/`sbrk`) is refused.
//!
//! The carve is a single unsynchronized cursor: one thread per compartment.

use cm_addresses::{PageSize, Range};
use cm_vmem::{AddressSpace, MapError, Protection};
use log::trace;

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// `EINVAL`: a fixed request outside the data-region bounds, or one that wraps.
    #[error("fixed mapping of {length:#x} bytes at {address:#x} lies outside {bounds}")]
    OutOfBounds {
        address: u64,
        length: u64,
        bounds: Range,
    },
    /// `ENOMEM`: the arena cannot satisfy the request.
    #[error("arena exhausted: {requested:#x} bytes requested, {remaining:#x} left")]
    OutOfMemory { requested: u64, remaining: u64 },
    /// `ENOMEM`: the program break is a property of the whole process.
    #[error("the program break cannot be moved from inside a compartment")]
    ProgramBreak,
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Allocation state of one compartment's arena.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Arena {
    bounds: Range,
    base: u64,
    top: u64,
    page_size: PageSize,
}

impl Arena {
    /// - `bounds`: the compartment's data-region bounds.
    /// - `base`, `top`: the published arena words.
    #[must_use]
    pub const fn new(bounds: Range, base: u64, top: u64, page_size: PageSize) -> Self {
        Self {
            bounds,
            base,
            top,
            page_size,
        }
    }

    /// Current top of the arena; what the compartment writes back into its
    /// top word.
    #[must_use]
    pub const fn top(&self) -> u64 {
        self.top
    }

    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.top.saturating_sub(self.base)
    }

    /// Validates a fixed request.
    ///
    /// # Errors
    /// [`ArenaError::OutOfBounds`] unless `[address, address + length)`
    /// lies strictly inside the data-region bounds.
    pub fn check_fixed(&self, address: u64, length: u64) -> Result<Range, ArenaError> {
        match address.checked_add(length) {
            Some(top) if self.bounds.base < address && top < self.bounds.top => {
                Ok(Range::new(address, top))
            }
            _ => Err(ArenaError::OutOfBounds {
                address,
                length,
                bounds: self.bounds,
            }),
        }
    }

    /// Computes where a floating request of `length` bytes would land,
    /// without committing it.
    ///
    /// # Errors
    /// [`ArenaError::OutOfMemory`] if the rounded length exceeds what is left.
    pub fn plan(&self, length: u64) -> Result<Range, ArenaError> {
        let remaining = self.remaining();
        let rounded = self
            .page_size
            .align_up(length)
            .filter(|&rounded| rounded <= remaining)
            .ok_or(ArenaError::OutOfMemory {
                requested: length,
                remaining,
            })?;
        Ok(Range::new(self.top - rounded, self.top))
    }

    /// Maps `length` bytes with `protection` at a fixed address or carved
    /// from the arena. The arena top only moves once the mapping succeeded.
    ///
    /// # Errors
    /// See [`check_fixed`](Self::check_fixed), [`plan`](Self::plan), and
    /// any mapping failure.
    pub fn map<A: AddressSpace + ?Sized>(
        &mut self,
        aspace: &mut A,
        fixed: Option<u64>,
        length: u64,
        protection: Protection,
    ) -> Result<Range, ArenaError> {
        if let Some(address) = fixed {
            let range = self.check_fixed(address, length)?;
            aspace.map_anonymous(range, protection)?;
            return Ok(range);
        }

        let range = self.plan(length)?;
        aspace.map_anonymous(range, protection)?;
        self.top = range.base;
        trace!("Carved {range} from the arena, {:#x} bytes left", self.remaining());
        Ok(range)
    }

    /// Returns `[address, address + length)` to the access-denied state.
    ///
    /// # Errors
    /// The range fails the fixed-request check, or cannot be remapped.
    pub fn release<A: AddressSpace + ?Sized>(
        &self,
        aspace: &mut A,
        address: u64,
        length: u64,
    ) -> Result<(), ArenaError> {
        let range = self.check_fixed(address, length)?;
        aspace.reserve(range)?;
        Ok(())
    }

    /// `brk(2)`/`sbrk(2)`; always refused.
    ///
    /// # Errors
    /// Always [`ArenaError::ProgramBreak`].
    pub fn move_break(&self, _increment: i64) -> Result<u64, ArenaError> {
        Err(ArenaError::ProgramBreak)
    }
}
