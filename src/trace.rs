//! Memory trace loader.
//!
//! Reads valgrind "lackey"-style traces, one access per line:
//!
//! ```text
//!  I 0400d7d4,8
//!  L 04e2c790,8
//!  S 04e2c790,8
//!  M 0421ff58,4
//! ```
//!
//! `I` is an instruction fetch, `L`/`S`/`M` are data load/store/modify. The
//! size field is parsed but ignored; the simulator works at page
//! granularity. Lines that do not parse are reported and skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::warn;
use sim_hal::{AccessKind, MemAccess};

/// Parse one trace line into an access. Returns `None` for lines that are
/// empty, comments, or malformed.
pub fn parse_line(line: &str) -> Option<MemAccess> {
    let trimmed = line.trim_start();
    let mut chars = trimmed.chars();

    let kind = match chars.next()? {
        'I' => AccessKind::Execute,
        'L' => AccessKind::Load,
        'S' => AccessKind::Store,
        'M' => AccessKind::Modify,
        _ => return None,
    };

    let rest = chars.as_str().trim_start();
    let addr_text = rest.split(',').next()?.trim();
    let addr = u64::from_str_radix(addr_text, 16).ok()?;

    Some(MemAccess::new(addr, kind))
}

/// Load a whole trace file, skipping (and reporting) malformed lines.
pub fn load(path: &Path) -> io::Result<Vec<MemAccess>> {
    let reader = BufReader::new(File::open(path)?);
    let mut accesses = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(access) => accesses.push(access),
            None => warn!(
                "{}:{}: skipping malformed trace line: {line:?}",
                path.display(),
                number + 1
            ),
        }
    }

    Ok(accesses)
}
