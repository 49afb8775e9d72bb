use std::cell::RefCell;
use std::collections::BTreeMap;
use std::hint::black_box;
use std::rc::Rc;

use archprobe_core::{ErrorInfo, NdRange, ProbeError};

use crate::backend::{ensure_writable, mapped_twice, HostArg, HostBuffer};

/// Floating point operations one `fma_f32` work item performs per loop.
pub const FMA_FLOPS_PER_LOOP: u64 = 8;

/// Built-in host kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KernelKind {
    /// Does nothing; measures dispatch overhead.
    Noop,
    /// `(buf, nword)`: sums the first `nword` 32-bit words of `buf`.
    ReadSum,
    /// `(buf, nstep)`: follows `nstep` links of a chain of 32-bit word indices
    /// starting at word 0.
    PtrChase,
    /// `(seed, nloop)`: `nloop` rounds of four independent fused multiply-adds
    /// per work item.
    FmaF32,
    /// `(src, dst)`: copies `src` into `dst`.
    Copy,
}

const ALL: [KernelKind; 5] = [
    KernelKind::Noop,
    KernelKind::ReadSum,
    KernelKind::PtrChase,
    KernelKind::FmaF32,
    KernelKind::Copy,
];

impl KernelKind {
    /// Name used in program sources.
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::Noop => "noop",
            KernelKind::ReadSum => "read_sum",
            KernelKind::PtrChase => "ptr_chase",
            KernelKind::FmaF32 => "fma_f32",
            KernelKind::Copy => "copy",
        }
    }

    /// Looks a kernel up by source name.
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Every kernel name.
    pub fn names() -> Vec<&'static str> {
        ALL.iter().map(|kind| kind.name()).collect()
    }
}

/// Kernel with validated arguments, ready to be dispatched repeatedly.
pub(crate) enum Dispatch {
    Noop { items: usize },
    ReadSum { buf: Rc<RefCell<Vec<u8>>>, nword: usize, items: usize },
    PtrChase { buf: Rc<RefCell<Vec<u8>>>, nstep: u32 },
    FmaF32 { seed: f32, nloop: u32, items: usize },
    Copy { src: Rc<RefCell<Vec<u8>>>, dst: Rc<RefCell<Vec<u8>>> },
}

fn arg_error(kind: KernelKind, slot: u32, expected: &str) -> ProbeError {
    ProbeError::Backend(
        ErrorInfo::new("kernel_arg", "kernel argument is missing or of the wrong kind")
            .with_context("kernel", kind.name())
            .with_context("slot", slot.to_string())
            .with_context("expected", expected),
    )
}

fn buffer_arg(
    kind: KernelKind,
    args: &BTreeMap<u32, HostArg>,
    slot: u32,
) -> Result<&HostBuffer, ProbeError> {
    match args.get(&slot) {
        Some(HostArg::Buffer(buf)) => Ok(buf),
        _ => Err(arg_error(kind, slot, "buffer")),
    }
}

fn u32_arg(kind: KernelKind, args: &BTreeMap<u32, HostArg>, slot: u32) -> Result<u32, ProbeError> {
    match args.get(&slot) {
        Some(HostArg::U32(value)) => Ok(*value),
        Some(HostArg::I32(value)) if *value >= 0 => Ok(*value as u32),
        _ => Err(arg_error(kind, slot, "u32")),
    }
}

fn f32_arg(kind: KernelKind, args: &BTreeMap<u32, HostArg>, slot: u32) -> Result<f32, ProbeError> {
    match args.get(&slot) {
        Some(HostArg::F32(value)) => Ok(*value),
        _ => Err(arg_error(kind, slot, "f32")),
    }
}

/// Validates the bound arguments of `kind` against `global`.
pub(crate) fn prepare(
    kind: KernelKind,
    args: &BTreeMap<u32, HostArg>,
    global: NdRange,
) -> Result<Dispatch, ProbeError> {
    let items = global.size();
    match kind {
        KernelKind::Noop => Ok(Dispatch::Noop { items }),
        KernelKind::ReadSum => {
            let buf = buffer_arg(kind, args, 0)?;
            let nword = u32_arg(kind, args, 1)? as usize;
            if nword > buf.len() / 4 {
                return Err(ProbeError::Backend(
                    ErrorInfo::new("read_out_of_range", "read range exceeds the buffer")
                        .with_context("nword", nword.to_string())
                        .with_context("buffer_bytes", buf.len().to_string()),
                ));
            }
            Ok(Dispatch::ReadSum {
                buf: buf.data().clone(),
                nword,
                items,
            })
        }
        KernelKind::PtrChase => {
            let buf = buffer_arg(kind, args, 0)?;
            if buf.len() < 4 {
                return Err(arg_error(kind, 0, "buffer of at least one word"));
            }
            Ok(Dispatch::PtrChase {
                buf: buf.data().clone(),
                nstep: u32_arg(kind, args, 1)?,
            })
        }
        KernelKind::FmaF32 => Ok(Dispatch::FmaF32 {
            seed: f32_arg(kind, args, 0)?,
            nloop: u32_arg(kind, args, 1)?,
            items,
        }),
        KernelKind::Copy => {
            let src = buffer_arg(kind, args, 0)?;
            let dst = buffer_arg(kind, args, 1)?;
            ensure_writable(dst, 1)?;
            if Rc::ptr_eq(src.data(), dst.data()) {
                return Err(ProbeError::Backend(ErrorInfo::new(
                    "buffer_aliased",
                    "copy source and destination are the same buffer",
                )));
            }
            Ok(Dispatch::Copy {
                src: src.data().clone(),
                dst: dst.data().clone(),
            })
        }
    }
}

impl Dispatch {
    /// Runs the kernel once over the whole range.
    pub(crate) fn run(&self) -> Result<(), ProbeError> {
        match self {
            Dispatch::Noop { items } => {
                black_box(*items);
            }
            Dispatch::ReadSum { buf, nword, items } => {
                let data = buf.try_borrow().map_err(|_| mapped_twice())?;
                let words = Words(&data);
                let stride = (*items).max(1);
                let mut acc = 0u32;
                for item in 0..stride.min(*nword) {
                    let mut idx = item;
                    while idx < *nword {
                        acc = acc.wrapping_add(words.get(idx));
                        idx += stride;
                    }
                }
                black_box(acc);
            }
            Dispatch::PtrChase { buf, nstep } => {
                let data = buf.try_borrow().map_err(|_| mapped_twice())?;
                let words = Words(&data);
                let mut idx = 0usize;
                for _ in 0..*nstep {
                    idx = words.get(idx) as usize;
                    if idx >= words.len() {
                        return Err(ProbeError::Backend(
                            ErrorInfo::new("chase_out_of_range", "chain link points past the buffer")
                                .with_context("link", idx.to_string()),
                        ));
                    }
                }
                black_box(idx);
            }
            Dispatch::FmaF32 { seed, nloop, items } => {
                let mut total = 0.0f32;
                for item in 0..*items {
                    let base = black_box(item as f32 * 1.0e-6);
                    let mut acc = [base, base + 0.25, base + 0.5, base + 0.75];
                    for _ in 0..*nloop {
                        for lane in &mut acc {
                            *lane = lane.mul_add(*seed, 0.5);
                        }
                    }
                    total += acc.iter().sum::<f32>();
                }
                black_box(total);
            }
            Dispatch::Copy { src, dst } => {
                let src = src.try_borrow().map_err(|_| mapped_twice())?;
                let mut dst = dst.try_borrow_mut().map_err(|_| mapped_twice())?;
                let len = src.len().min(dst.len());
                dst[..len].copy_from_slice(&src[..len]);
                black_box(dst.as_ptr());
            }
        }
        Ok(())
    }
}

/// Native-endian 32-bit word view; callers keep indices below `len`.
struct Words<'a>(&'a [u8]);

impl Words<'_> {
    fn len(&self) -> usize {
        self.0.len() / 4
    }

    fn get(&self, idx: usize) -> u32 {
        let at = idx * 4;
        u32::from_ne_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]])
    }
}

/// Reads word `idx` of a native-endian `u32` array stored in `bytes`.
pub fn read_word(bytes: &[u8], idx: usize) -> Option<u32> {
    let at = idx.checked_mul(4)?;
    let chunk = bytes.get(at..at + 4)?;
    Some(u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Writes word `idx` of a native-endian `u32` array stored in `bytes`.
pub fn write_word(bytes: &mut [u8], idx: usize, value: u32) -> Option<()> {
    let at = idx.checked_mul(4)?;
    bytes.get_mut(at..at + 4)?.copy_from_slice(&value.to_ne_bytes());
    Some(())
}
