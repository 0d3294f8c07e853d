//! Load and store instructions.
//!
//! All accesses go through the big-endian memory image. Effective
//! addresses are computed in 64-bit register arithmetic and truncated
//! to the 32-bit guest address space, which is how the PS3 runs user
//! code. Update forms write the effective address back only after the
//! access succeeded.

use amp_core::error::{MemoryError, PpuError};
use amp_memory::MemoryImage;

use crate::decoder::PpuDecoder;
use crate::interpreter::StepOutcome;
use crate::thread::PpuThread;

use super::unimplemented;

/// Effective address for displacement forms; ra = 0 reads as zero
#[inline]
pub fn calc_ea_d(thread: &PpuThread, ra: u8, d: i16) -> u32 {
    if ra == 0 {
        d as i64 as u64 as u32
    } else {
        thread.gpr(ra as usize).wrapping_add(d as i64 as u64) as u32
    }
}

/// Effective address for the update forms, which always use ra
#[inline]
pub fn calc_ea_update(thread: &PpuThread, ra: u8, d: i16) -> u32 {
    thread.gpr(ra as usize).wrapping_add(d as i64 as u64) as u32
}

/// Effective address for indexed forms; ra = 0 reads as zero
#[inline]
pub fn calc_ea_x(thread: &PpuThread, ra: u8, rb: u8) -> u32 {
    let b = thread.gpr(rb as usize);
    if ra == 0 {
        b as u32
    } else {
        thread.gpr(ra as usize).wrapping_add(b) as u32
    }
}

#[inline]
pub(crate) fn fault(addr: u32, source: MemoryError) -> PpuError {
    PpuError::MemoryFault { addr, source }
}

/// dcbz clears an aligned 128-byte cache block
pub(crate) fn dcbz(memory: &mut MemoryImage, ea: u32) -> Result<(), PpuError> {
    let block = ea & !0x7F;
    memory.fill_zero(block, 128).map_err(|e| fault(block, e))
}

// lwz - Load Word and Zero
pub(crate) fn lwz(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let value = memory.read_be32(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, u64::from(value));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lwzu - Load Word and Zero with Update
pub(crate) fn lwzu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let value = memory.read_be32(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, u64::from(value));
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lbz - Load Byte and Zero
pub(crate) fn lbz(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let value = memory.read::<u8>(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, u64::from(value));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lbzu - Load Byte and Zero with Update
pub(crate) fn lbzu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let value = memory.read::<u8>(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, u64::from(value));
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stw - Store Word
pub(crate) fn stw(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    memory
        .write_be32(ea, thread.gpr(rs as usize) as u32)
        .map_err(|e| fault(ea, e))?;
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stwu - Store Word with Update
pub(crate) fn stwu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    memory
        .write_be32(ea, thread.gpr(rs as usize) as u32)
        .map_err(|e| fault(ea, e))?;
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stb - Store Byte
pub(crate) fn stb(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    memory
        .write::<u8>(ea, thread.gpr(rs as usize) as u8)
        .map_err(|e| fault(ea, e))?;
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stbu - Store Byte with Update
pub(crate) fn stbu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    memory
        .write::<u8>(ea, thread.gpr(rs as usize) as u8)
        .map_err(|e| fault(ea, e))?;
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lhz - Load Halfword and Zero
pub(crate) fn lhz(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let value = memory.read_be16(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, u64::from(value));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lhzu - Load Halfword and Zero with Update
pub(crate) fn lhzu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let value = memory.read_be16(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, u64::from(value));
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lha - Load Halfword Algebraic
pub(crate) fn lha(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let value = memory.read_be16(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, value as i16 as i64 as u64);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lhau - Load Halfword Algebraic with Update
pub(crate) fn lhau(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let value = memory.read_be16(ea).map_err(|e| fault(ea, e))?;
    thread.set_gpr(rt as usize, value as i16 as i64 as u64);
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// sth - Store Halfword
pub(crate) fn sth(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    memory
        .write_be16(ea, thread.gpr(rs as usize) as u16)
        .map_err(|e| fault(ea, e))?;
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// sthu - Store Halfword with Update
pub(crate) fn sthu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    memory
        .write_be16(ea, thread.gpr(rs as usize) as u16)
        .map_err(|e| fault(ea, e))?;
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lmw - Load Multiple Word: rt through r31 from successive words
pub(crate) fn lmw(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, d) = PpuDecoder::d_form(opcode);
    let base = calc_ea_d(thread, ra, d);
    for (i, reg) in (rt as usize..32).enumerate() {
        let ea = base.wrapping_add(i as u32 * 4);
        let value = memory.read_be32(ea).map_err(|e| fault(ea, e))?;
        thread.set_gpr(reg, u64::from(value));
    }
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stmw - Store Multiple Word: rs through r31 to successive words
pub(crate) fn stmw(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, d) = PpuDecoder::d_form(opcode);
    let base = calc_ea_d(thread, ra, d);
    for (i, reg) in (rs as usize..32).enumerate() {
        let ea = base.wrapping_add(i as u32 * 4);
        memory
            .write_be32(ea, thread.gpr(reg) as u32)
            .map_err(|e| fault(ea, e))?;
    }
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lfs - Load Floating-Point Single
pub(crate) fn lfs(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let bits = memory.read_be32(ea).map_err(|e| fault(ea, e))?;
    thread.set_fpr(frt as usize, f32::from_bits(bits) as f64);
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lfsu - Load Floating-Point Single with Update
pub(crate) fn lfsu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let bits = memory.read_be32(ea).map_err(|e| fault(ea, e))?;
    thread.set_fpr(frt as usize, f32::from_bits(bits) as f64);
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lfd - Load Floating-Point Double
pub(crate) fn lfd(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let bits = memory.read_be64(ea).map_err(|e| fault(ea, e))?;
    thread.set_fpr(frt as usize, f64::from_bits(bits));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// lfdu - Load Floating-Point Double with Update
pub(crate) fn lfdu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frt, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let bits = memory.read_be64(ea).map_err(|e| fault(ea, e))?;
    thread.set_fpr(frt as usize, f64::from_bits(bits));
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stfs - Store Floating-Point Single
pub(crate) fn stfs(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let bits = (thread.fpr(frs as usize) as f32).to_bits();
    memory.write_be32(ea, bits).map_err(|e| fault(ea, e))?;
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stfsu - Store Floating-Point Single with Update
pub(crate) fn stfsu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let bits = (thread.fpr(frs as usize) as f32).to_bits();
    memory.write_be32(ea, bits).map_err(|e| fault(ea, e))?;
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stfd - Store Floating-Point Double
pub(crate) fn stfd(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_d(thread, ra, d);
    let bits = thread.fpr(frs as usize).to_bits();
    memory.write_be64(ea, bits).map_err(|e| fault(ea, e))?;
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

// stfdu - Store Floating-Point Double with Update
pub(crate) fn stfdu(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (frs, ra, d) = PpuDecoder::d_form(opcode);
    let ea = calc_ea_update(thread, ra, d);
    let bits = thread.fpr(frs as usize).to_bits();
    memory.write_be64(ea, bits).map_err(|e| fault(ea, e))?;
    thread.set_gpr(ra as usize, u64::from(ea));
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

/// DS-form load group (primary 58): ld, ldu, lwa
pub(crate) fn ds_load_group(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rt, ra, ds, xo) = PpuDecoder::ds_form(opcode);
    match xo {
        // ld
        0 => {
            let ea = calc_ea_d(thread, ra, ds);
            let value = memory.read_be64(ea).map_err(|e| fault(ea, e))?;
            thread.set_gpr(rt as usize, value);
        }
        // ldu
        1 => {
            let ea = calc_ea_update(thread, ra, ds);
            let value = memory.read_be64(ea).map_err(|e| fault(ea, e))?;
            thread.set_gpr(rt as usize, value);
            thread.set_gpr(ra as usize, u64::from(ea));
        }
        // lwa - Load Word Algebraic
        2 => {
            let ea = calc_ea_d(thread, ra, ds);
            let value = memory.read_be32(ea).map_err(|e| fault(ea, e))?;
            thread.set_gpr(rt as usize, value as i32 as i64 as u64);
        }
        _ => return Err(unimplemented(thread, opcode)),
    }
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}

/// DS-form store group (primary 62): std, stdu
pub(crate) fn ds_store_group(
    thread: &mut PpuThread,
    memory: &mut MemoryImage,
    opcode: u32,
) -> Result<StepOutcome, PpuError> {
    let (rs, ra, ds, xo) = PpuDecoder::ds_form(opcode);
    match xo {
        // std
        0 => {
            let ea = calc_ea_d(thread, ra, ds);
            memory
                .write_be64(ea, thread.gpr(rs as usize))
                .map_err(|e| fault(ea, e))?;
        }
        // stdu
        1 => {
            let ea = calc_ea_update(thread, ra, ds);
            memory
                .write_be64(ea, thread.gpr(rs as usize))
                .map_err(|e| fault(ea, e))?;
            thread.set_gpr(ra as usize, u64::from(ea));
        }
        _ => return Err(unimplemented(thread, opcode)),
    }
    thread.advance_pc();
    Ok(StepOutcome::Executed)
}
