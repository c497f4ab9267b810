use crate::context::EmitterContext;
use crate::error::{Error, Result};
use crate::vector::Vector;

// Bulk buffer helpers
//
// Sliding windows (delay lines, recurrent histories) are updated with whole
// block moves rather than per-element loops. Three moves do it:
//
//     buffer        [ b0 b1 b2 b3 ]      new_data [ n0 ]
//     shifted_out ← [ b0 ]                          (optional)
//     buffer      ← [ b1 b2 b3 .. ]                 (slide left by `shift`)
//     buffer      ← [ .. .. .. n0 ]                 (append at the tail)
//
// In the emitting strategy each move lowers to one MemMove instruction.

fn check_packed(name: &str, v: &Vector) -> Result<()> {
    if v.increment() != 1 {
        return Err(Error::invalid_argument(format!(
            "{} must be contiguous, has increment {}",
            name,
            v.increment()
        )));
    }
    Ok(())
}

/// Drop the oldest `new_data.size()` elements of `buffer` (optionally into
/// `shifted_out`), slide the rest to the front, and append `new_data`.
///
/// # Panics
/// When `new_data` is longer than `buffer`.
pub fn shift_and_update<C: EmitterContext>(
    ctx: &mut C,
    buffer: &Vector,
    new_data: &Vector,
    shifted_out: Option<&Vector>,
) -> Result<()> {
    let count = buffer.size();
    let shift = new_data.size();
    assert!(
        shift <= count,
        "shift_and_update: shift {} exceeds buffer size {}",
        shift,
        count
    );
    if new_data.dtype() != buffer.dtype() {
        return Err(Error::dtype_mismatch(buffer.dtype(), new_data.dtype()));
    }
    check_packed("buffer", buffer)?;
    check_packed("new data", new_data)?;

    let base = |v: &Vector| -> Result<usize> { v.value().layout()?.flat_offset(&[0]) };
    let (buf0, new0) = (base(buffer)?, base(new_data)?);

    if let Some(out) = shifted_out {
        if out.dtype() != buffer.dtype() {
            return Err(Error::dtype_mismatch(buffer.dtype(), out.dtype()));
        }
        if out.size() < shift {
            return Err(Error::SizeMismatch {
                expected: vec![shift],
                got: vec![out.size()],
            });
        }
        check_packed("shifted-out buffer", out)?;
        ctx.move_elements(out.value(), base(out)?, buffer.value(), buf0, shift)?;
    }
    ctx.move_elements(buffer.value(), buf0, buffer.value(), buf0 + shift, count - shift)?;
    ctx.move_elements(buffer.value(), buf0 + count - shift, new_data.value(), new0, shift)
}
