//! pagesim - educational virtual-memory subsystem simulator.
//!
//! Boots an OS model with a simulated RAM arena, an AArch64 16 KiB-granule
//! MMU and a TLB, then replays a memory trace through it. Page faults are
//! served by the OS model: every faulting page gets a fresh frame and a
//! four-level page table mapping.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn, LevelFilter};

use sim_hal::{AccessKind, MemAccess};

mod logger;
mod os;
mod trace;

use os::OsKernel;

#[derive(Parser)]
#[command(name = "pagesim", about = "Virtual-memory subsystem simulator")]
struct Args {
    /// Memory trace in valgrind lackey format; runs a built-in demo
    /// workload when omitted
    trace: Option<PathBuf>,

    /// Number of TLB entries; 0 runs every access through a full walk
    #[arg(long, default_value_t = 64)]
    tlb_entries: usize,

    /// Simulated page size in bytes
    #[arg(long, default_value_t = 16384)]
    page_size: u64,

    /// Simulated memory size in pages
    #[arg(long, default_value_t = 4096)]
    pages: u64,

    /// Log every memory access and translation
    #[arg(long)]
    log_accesses: bool,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = logger::init(args.log_level) {
        eprintln!("pagesim: cannot install logger: {err}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let mut kernel = OsKernel::new(args.page_size, args.pages * args.page_size, args.tlb_entries)?;
    kernel.set_access_logging(args.log_accesses);

    let accesses = match &args.trace {
        Some(path) => trace::load(path)?,
        None => demo_workload(),
    };
    info!("replaying {} memory accesses", accesses.len());

    const PID: u64 = 1;
    kernel.create_process(PID)?;
    kernel.switch_to(PID)?;

    for access in &accesses {
        kernel.process_access(access)?;
    }

    kernel.terminate_process(PID)?;

    let stats = kernel.tlb_statistics();
    info!(
        "simulation complete: {} accesses, {} TLB lookups, peak of {} frames allocated",
        accesses.len(),
        stats.lookups,
        kernel.max_allocated_pages()
    );
    if !kernel.all_released() {
        warn!("simulated memory leaked: not all frames were returned");
    }

    Ok(())
}

/// Small synthetic workload: a code loop over a few pages, a stack page
/// that gets dirtied, and a strided heap scan wide enough to churn the TLB.
fn demo_workload() -> Vec<MemAccess> {
    let mut accesses = Vec::new();
    let page = 16384u64;

    let code = 0x40_0000u64;
    let stack = 0x7FFF_0000u64;
    let heap = 0x10_0000u64;

    for round in 0..4 {
        // Instruction fetches across four code pages.
        for i in 0..4 {
            accesses.push(MemAccess::new(code + i * page + round, AccessKind::Execute));
        }
        // Push and pop on the stack page.
        accesses.push(MemAccess::new(stack + round * 8, AccessKind::Store));
        accesses.push(MemAccess::new(stack + round * 8, AccessKind::Load));
        // Strided heap scan, read-modify-write every other page.
        for i in 0..16 {
            let addr = heap + i * page;
            let kind = if i % 2 == 0 {
                AccessKind::Modify
            } else {
                AccessKind::Load
            };
            accesses.push(MemAccess::new(addr, kind));
        }
    }

    accesses
}
