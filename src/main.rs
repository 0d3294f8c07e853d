//! ampere - PS3 emulator
//!
//! Command line entry point: loads a SELF or ELF executable, brings up
//! an execution session and runs it until it halts, faults or exhausts
//! the configured step budget.

use std::path::{Path, PathBuf};

use amp_core::{logging, Config};
use amp_integration::{HaltReason, Session};
use amp_loader::Sfo;
use anyhow::{bail, Context};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config, using defaults: {e}");
            Config::default()
        }
    };
    logging::init(&config);

    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: ampere <EBOOT.BIN | executable.elf>");
    };

    info!("ampere PS3 emulator");

    let bytes =
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    info!(path = %path.display(), size = bytes.len(), "read executable");

    report_sfo(&path);

    let mut session = Session::load(&bytes, &config)?;
    {
        let program = session.program();
        info!(
            entry = format_args!("{:#010x}", program.entry_point),
            toc = format_args!("{:#x}", program.toc),
            segments = program.segments.len(),
            was_self = program.was_self,
            "program mapped"
        );
    }

    let reason = session.run_until_halt(config.cpu.step_budget)?;

    match reason {
        HaltReason::BudgetExhausted => warn!(
            steps = config.cpu.step_budget,
            "step budget exhausted before the program halted"
        ),
        HaltReason::Breakpoint { addr } => {
            info!(addr = format_args!("{addr:#010x}"), "stopped at breakpoint");
        }
        HaltReason::Stopped => info!("stopped by request"),
        HaltReason::Syscall { id } => info!(id, "stopped at syscall"),
    }

    let regs = session.registers();
    info!(
        instructions = session.instructions_executed(),
        pc = format_args!("{:#010x}", regs.pc),
        r3 = format_args!("{:#x}", regs.gpr[3]),
        lr = format_args!("{:#x}", regs.lr),
        "session halted"
    );

    Ok(())
}

/// Log title information when a PARAM.SFO sits next to the executable.
/// Disc layouts keep it one directory up from USRDIR/EBOOT.BIN, so the
/// parent directory is checked as well.
fn report_sfo(exe: &Path) {
    let Some(dir) = exe.parent() else { return };

    for candidate in [dir.join("PARAM.SFO"), dir.join("../PARAM.SFO")] {
        let Ok(bytes) = std::fs::read(&candidate) else {
            continue;
        };
        if !Sfo::is_sfo(&bytes) {
            continue;
        }
        match Sfo::parse(&bytes) {
            Ok(sfo) => info!(
                title = sfo.title().unwrap_or("unknown"),
                title_id = sfo.title_id().unwrap_or("unknown"),
                app_version = sfo.app_version().unwrap_or("unknown"),
                "PARAM.SFO"
            ),
            Err(e) => warn!(path = %candidate.display(), "unreadable PARAM.SFO: {e}"),
        }
        return;
    }
}
