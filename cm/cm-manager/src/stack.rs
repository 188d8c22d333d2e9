//! # Initial Stack Image
//!
//! What a static executable's start-up code expects at `rsp` on entry,
//! from high to low addresses:
//!
//! ```text
//!   argument strings, "NAME=value" environment strings
//!   16 random bytes                       (AT_RANDOM points here)
//!   padding                               (final rsp is 16-byte aligned)
//!   auxv: (type, value) pairs, AT_NULL last
//!   envp: pointers, NULL
//!   argv: pointers in order, NULL
//!   argc                                  <- rsp
//! ```

use cm_elf::AuxType;
use log::trace;

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum StackError {
    #[error("insufficient stack space: the initial image would grow below {limit:#x}")]
    Overflow { limit: u64 },
    #[error("stack memory does not cover [{limit:#x}, {top:#x})")]
    Memory { limit: u64, top: u64 },
}

/// Inputs of the initial stack image.
#[derive(Debug, Clone, Copy)]
pub struct StartupInfo<'a> {
    /// `argv`, starting with the program path.
    pub args: &'a [Vec<u8>],
    /// `NAME=value` environment strings.
    pub env: &'a [Vec<u8>],
    /// Bytes `AT_RANDOM` points to.
    pub random: [u8; 16],
    /// Auxiliary entries besides `AT_NULL` and `AT_RANDOM`.
    pub auxv: &'a [(AuxType, u64)],
}

/// Downward-growing writer over the memory just below `top`.
struct StackWriter<'m> {
    memory: &'m mut [u8],
    top: u64,
    limit: u64,
    sp: u64,
}

impl StackWriter<'_> {
    #[allow(clippy::cast_possible_truncation)]
    fn push(&mut self, bytes: &[u8]) -> Result<u64, StackError> {
        let sp = self
            .sp
            .checked_sub(bytes.len() as u64)
            .filter(|&sp| sp >= self.limit)
            .ok_or(StackError::Overflow { limit: self.limit })?;

        // `memory` ends at `top`
        let offset = self.memory.len() - (self.top - sp) as usize;
        self.memory[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.sp = sp;
        Ok(sp)
    }

    fn push_word(&mut self, word: u64) -> Result<u64, StackError> {
        self.push(&word.to_ne_bytes())
    }

    fn push_string(&mut self, s: &[u8]) -> Result<u64, StackError> {
        self.push(&[0])?;
        self.push(s)
    }

    /// One `Elf64_auxv_t`: the type ends up below its value.
    fn push_aux(&mut self, kind: AuxType, value: u64) -> Result<u64, StackError> {
        self.push_word(value)?;
        self.push_word(kind as u64)
    }
}

/// Writes the image into `memory`, which backs the addresses
/// `[top - memory.len(), top)`, never going below `limit`.
///
/// Returns the final stack pointer, the address of `argc`.
///
/// # Errors
/// [`StackError::Memory`] if `memory` does not cover `[limit, top)`,
/// [`StackError::Overflow`] if the image does not fit above `limit`.
pub fn build(memory: &mut [u8], top: u64, limit: u64, info: &StartupInfo<'_>) -> Result<u64, StackError> {
    let covered = top.checked_sub(memory.len() as u64);
    if limit > top || covered.is_none_or(|base| base > limit) {
        return Err(StackError::Memory { limit, top });
    }

    let mut stack = StackWriter {
        memory,
        top,
        limit,
        sp: top,
    };

    // Strings first; everything below refers to them.
    let mut argv = Vec::with_capacity(info.args.len());
    for arg in info.args {
        argv.push(stack.push_string(arg)?);
    }
    let mut envp = Vec::with_capacity(info.env.len());
    for env in info.env {
        envp.push(stack.push_string(env)?);
    }
    let at_random = stack.push(&info.random)?;

    // The block below cannot be padded, since argc has to end up at rsp.
    // Auxiliary entries are 16 bytes each, so only the words matter.
    let words = (envp.len() + 1 + argv.len() + 1 + 1) as u64 * 8;
    let padding = stack.sp.wrapping_sub(words) & 0xf;
    stack.sp = stack
        .sp
        .checked_sub(padding)
        .filter(|&sp| sp >= limit)
        .ok_or(StackError::Overflow { limit })?;

    stack.push_aux(AuxType::Null, 0)?;
    stack.push_aux(AuxType::Random, at_random)?;
    for &(kind, value) in info.auxv {
        stack.push_aux(kind, value)?;
    }

    stack.push_word(0)?;
    for &env in &envp {
        stack.push_word(env)?;
    }

    // argv keeps its order, so push back to front.
    stack.push_word(0)?;
    for &arg in argv.iter().rev() {
        stack.push_word(arg)?;
    }
    let sp = stack.push_word(argv.len() as u64)?;

    trace!(
        "Initial stack: {} argument(s), {} environment string(s), sp {sp:#x}",
        argv.len(),
        envp.len()
    );
    Ok(sp)
}

/// `NAME=value` strings for the variables in `names` that exist on the host.
#[must_use]
pub fn propagated_environment<S: AsRef<str>>(names: &[S]) -> Vec<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;

    names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            std::env::var_os(name).map(|value| {
                let mut entry = Vec::with_capacity(name.len() + 1 + value.len());
                entry.extend_from_slice(name.as_bytes());
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                entry
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOP: u64 = 0x7000_0000;
    const SIZE: usize = 0x2000;

    fn word(memory: &[u8], address: u64) -> u64 {
        let offset = memory.len() - (TOP - address) as usize;
        u64::from_ne_bytes(memory[offset..offset + 8].try_into().unwrap())
    }

    fn string(memory: &[u8], address: u64) -> Vec<u8> {
        let offset = memory.len() - (TOP - address) as usize;
        memory[offset..]
            .iter()
            .take_while(|&&b| b != 0)
            .copied()
            .collect()
    }

    fn info<'a>(args: &'a [Vec<u8>], env: &'a [Vec<u8>]) -> StartupInfo<'a> {
        StartupInfo {
            args,
            env,
            random: [0xa5; 16],
            auxv: &[(AuxType::Secure, 0), (AuxType::PageSize, 4096)],
        }
    }

    #[test]
    fn image_layout_matches_process_entry() {
        let args = [b"/bin/server".to_vec(), b"--flag".to_vec(), b"x".to_vec()];
        let env = [b"PATH=/usr/bin".to_vec()];
        let mut memory = vec![0u8; SIZE];
        let sp = build(&mut memory, TOP, TOP - SIZE as u64 / 2, &info(&args, &env)).unwrap();

        assert_eq!(sp % 16, 0);
        assert_eq!(word(&memory, sp), 3);

        // argv in original order, NULL-terminated
        for (i, arg) in args.iter().enumerate() {
            let ptr = word(&memory, sp + 8 + i as u64 * 8);
            assert_eq!(&string(&memory, ptr), arg);
        }
        assert_eq!(word(&memory, sp + 32), 0);

        // envp
        let envp = sp + 40;
        assert_eq!(string(&memory, word(&memory, envp)), b"PATH=/usr/bin");
        assert_eq!(word(&memory, envp + 8), 0);

        // auxv, terminated by AT_NULL
        let mut aux = envp + 16;
        let mut seen = Vec::new();
        loop {
            let kind = word(&memory, aux);
            let value = word(&memory, aux + 8);
            if kind == AuxType::Null as u64 {
                break;
            }
            seen.push((kind, value));
            aux += 16;
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.contains(&(AuxType::PageSize as u64, 4096)));
        assert!(seen.contains(&(AuxType::Secure as u64, 0)));

        let random = seen
            .iter()
            .find(|(kind, _)| *kind == AuxType::Random as u64)
            .map(|&(_, value)| value)
            .unwrap();
        let offset = memory.len() - (TOP - random) as usize;
        assert_eq!(memory[offset..offset + 16], [0xa5; 16]);
    }

    #[test]
    fn final_pointer_is_aligned_for_any_argument_count() {
        for n in 1..6 {
            let args: Vec<Vec<u8>> = (0..n).map(|i| vec![b'a'; i * 3 + 1]).collect();
            for m in 0..3 {
                let env: Vec<Vec<u8>> = (0..m).map(|i| format!("V{i}=1").into_bytes()).collect();
                let mut memory = vec![0u8; SIZE];
                let sp = build(&mut memory, TOP, TOP - SIZE as u64, &info(&args, &env)).unwrap();
                assert_eq!(sp % 16, 0, "n = {n}, m = {m}");
                assert_eq!(word(&memory, sp), n as u64);
            }
        }
    }

    #[test]
    fn overflowing_the_limit_is_an_error() {
        let args = [vec![b'x'; 0x800]];
        let mut memory = vec![0u8; SIZE];
        assert_eq!(
            build(&mut memory, TOP, TOP - 0x400, &info(&args, &[])),
            Err(StackError::Overflow { limit: TOP - 0x400 })
        );
    }

    #[test]
    fn memory_must_cover_the_limit() {
        let mut memory = vec![0u8; 0x100];
        assert_eq!(
            build(&mut memory, TOP, TOP - 0x1000, &info(&[], &[])),
            Err(StackError::Memory {
                limit: TOP - 0x1000,
                top: TOP
            })
        );
    }

    #[test]
    fn only_existing_variables_are_propagated() {
        let env = propagated_environment(&["PATH", "CM_SURELY_UNSET_VARIABLE_0xdead"]);
        let expected = usize::from(std::env::var_os("PATH").is_some());
        assert_eq!(env.len(), expected);
        if let Some(entry) = env.first() {
            assert!(entry.starts_with(b"PATH="));
        }
    }
}
