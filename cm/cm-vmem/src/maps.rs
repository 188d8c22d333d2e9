//! Reader for `/proc/self/maps`.
//!
//! Each line starts with `<start>-<end>` in hexadecimal; the lines are sorted
//! by address, so the first line names the lowest mapping.

use cm_addresses::Range;
use std::fs;
use std::io;

const SELF_MAPS: &str = "/proc/self/maps";

/// Parses the address ranges of every line in a `maps` listing.
///
/// # Errors
/// [`io::ErrorKind::InvalidData`] for a line without a `start-end` prefix.
pub fn parse(text: &str) -> io::Result<Vec<Range>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> io::Result<Range> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, format!("bad maps line: {line}"));

    let span = line.split_whitespace().next().ok_or_else(invalid)?;
    let (start, end) = span.split_once('-').ok_or_else(invalid)?;
    let start = u64::from_str_radix(start, 16).map_err(|_| invalid())?;
    let end = u64::from_str_radix(end, 16).map_err(|_| invalid())?;
    Ok(Range::new(start, end))
}

/// All current mappings of this process.
///
/// # Errors
/// The listing could not be read or parsed.
pub fn current() -> io::Result<Vec<Range>> {
    parse(&fs::read_to_string(SELF_MAPS)?)
}

/// Base address of the lowest current mapping of this process.
///
/// # Errors
/// The listing could not be read, parsed, or was empty.
pub fn lowest_address() -> io::Result<u64> {
    current()?
        .iter()
        .map(|r| r.base)
        .min()
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "empty maps listing"))
}
