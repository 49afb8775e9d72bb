use archprobe_core::{
    ChannelOrder, ChannelType, ComputeBackend, ImageFormat, KernelArg, MemAccess, MemFlags,
    NdRange, ProbeError,
};
use archprobe_host::kernels::{read_word, write_word};
use archprobe_host::{HostBackend, KernelKind};

fn backend() -> HostBackend {
    HostBackend::open(0).expect("host device")
}

#[test]
fn only_device_zero_exists() {
    let err = HostBackend::open(1).expect_err("single device");
    assert!(matches!(err, ProbeError::Backend(_)));
    assert_eq!(err.info().code, "device_not_found");
}

#[test]
fn device_report_describes_the_host() -> Result<(), ProbeError> {
    let report = backend().device_report()?;
    assert!(!report.name.is_empty());
    assert!(report.nthread_logic >= 1);
    assert!(report.nsm >= 1);
    assert_eq!(report.buf_cacheline_size, 64);
    assert!(report.buf_size_max > 0);
    Ok(())
}

#[test]
fn programs_expose_named_kernels() -> Result<(), ProbeError> {
    let host = backend();
    let program = host.create_program("noop\ncopy", "-cl-fast-relaxed-math")?;
    assert_eq!(program.kernels(), &[KernelKind::Noop, KernelKind::Copy]);
    assert_eq!(host.create_kernel(&program, "copy")?.kind(), KernelKind::Copy);

    let err = host
        .create_kernel(&program, "read_sum")
        .expect_err("not in program");
    assert_eq!(err.info().code, "kernel_not_found");

    let err = host.create_program("warp_shuffle", "").expect_err("unknown");
    assert_eq!(err.info().code, "unknown_kernel");
    assert!(host.create_program("   ", "").is_err());

    let binary = host.create_program_binary(b"fma_f32", "")?;
    assert_eq!(binary.kernels(), &[KernelKind::FmaF32]);
    Ok(())
}

#[test]
fn copy_kernel_moves_bytes() -> Result<(), ProbeError> {
    let host = backend();
    let program = host.create_program("copy", "")?;
    let mut copy = host.create_kernel(&program, "copy")?;
    let src = host.create_buf(MemFlags::read_only(), 16)?;
    let dst = host.create_buf(MemFlags::read_write(), 16)?;
    host.map_buf(&src, |data| data.copy_from_slice(&[7; 16]))?;
    host.set_arg(&mut copy, 0, KernelArg::Buffer(&src))?;
    host.set_arg(&mut copy, 1, KernelArg::Buffer(&dst))?;

    let elapsed = host.bench_kernel(&copy, NdRange::d1(1), NdRange::d1(1), 3)?;
    assert!(elapsed >= 0.0);
    assert_eq!(host.map_buf(&dst, |data| data.to_vec())?, vec![7; 16]);
    Ok(())
}

#[test]
fn copy_into_read_only_buffer_is_rejected() -> Result<(), ProbeError> {
    let host = backend();
    let program = host.create_program("copy", "")?;
    let mut copy = host.create_kernel(&program, "copy")?;
    let src = host.create_buf(MemFlags::read_write(), 8)?;
    let dst = host.create_buf(
        MemFlags {
            access: MemAccess::ReadOnly,
            host_visible: false,
        },
        8,
    )?;
    host.set_arg(&mut copy, 0, KernelArg::Buffer(&src))?;
    host.set_arg(&mut copy, 1, KernelArg::Buffer(&dst))?;
    let err = host
        .bench_kernel(&copy, NdRange::d1(1), NdRange::d1(1), 1)
        .expect_err("read-only destination");
    assert_eq!(err.info().code, "read_only");
    Ok(())
}

#[test]
fn missing_arguments_are_reported() -> Result<(), ProbeError> {
    let host = backend();
    let program = host.create_program("read_sum", "")?;
    let read_sum = host.create_kernel(&program, "read_sum")?;
    let err = host
        .bench_kernel(&read_sum, NdRange::d1(1), NdRange::d1(1), 1)
        .expect_err("no buffer bound");
    assert_eq!(err.info().code, "kernel_arg");
    assert_eq!(err.info().context.get("slot").map(String::as_str), Some("0"));
    Ok(())
}

#[test]
fn pointer_chase_follows_links() -> Result<(), ProbeError> {
    let host = backend();
    let program = host.create_program("ptr_chase", "")?;
    let mut chase = host.create_kernel(&program, "ptr_chase")?;
    let buf = host.create_buf(MemFlags::read_write(), 16)?;
    host.map_buf(&buf, |data| {
        for (idx, next) in [(0, 2), (2, 1), (1, 3), (3, 0)] {
            write_word(data, idx, next).expect("in range");
        }
    })?;
    host.set_arg(&mut chase, 0, KernelArg::Buffer(&buf))?;
    host.set_arg(&mut chase, 1, KernelArg::U32(100))?;
    host.bench_kernel(&chase, NdRange::d1(1), NdRange::d1(1), 2)?;

    host.map_buf(&buf, |data| write_word(data, 3, 99).expect("in range"))?;
    let err = host
        .bench_kernel(&chase, NdRange::d1(1), NdRange::d1(1), 1)
        .expect_err("link out of range");
    assert_eq!(err.info().code, "chase_out_of_range");
    Ok(())
}

#[test]
fn ranges_must_tile() -> Result<(), ProbeError> {
    let host = backend();
    let program = host.create_program("noop", "")?;
    let noop = host.create_kernel(&program, "noop")?;
    let err = host
        .bench_kernel(&noop, NdRange::d1(3), NdRange::d1(8), 1)
        .expect_err("3 does not divide 8");
    assert_eq!(err.info().code, "range_mismatch");
    let err = host
        .bench_kernel(&noop, NdRange::d1(1), NdRange::d1(0), 1)
        .expect_err("empty range");
    assert_eq!(err.info().code, "empty_range");
    host.bench_kernel(&noop, NdRange::d2(2, 2), NdRange::d2(8, 4), 1)?;
    Ok(())
}

#[test]
fn images_map_with_row_pitch() -> Result<(), ProbeError> {
    let host = backend();
    let format = ImageFormat {
        order: ChannelOrder::Rgba,
        ty: ChannelType::HalfFloat,
    };
    let img = host.create_img_2d(MemFlags::read_only(), format, 4, 3)?;
    let (len, pitch) = host.map_img_2d(&img, |data, pitch| (data.len(), pitch))?;
    assert_eq!(pitch, 32);
    assert_eq!(len, 96);

    let img = host.create_img_1d(MemFlags::read_only(), format, 5)?;
    assert_eq!(host.map_img_1d(&img, |data| data.len())?, 40);

    let err = host
        .create_img_2d(MemFlags::read_only(), format, 0, 1)
        .expect_err("zero width");
    assert_eq!(err.info().code, "image_extent");
    Ok(())
}

#[test]
fn word_helpers_check_bounds() {
    let mut bytes = [0u8; 8];
    assert_eq!(write_word(&mut bytes, 1, 42), Some(()));
    assert_eq!(read_word(&bytes, 1), Some(42));
    assert_eq!(read_word(&bytes, 2), None);
    assert_eq!(write_word(&mut bytes, 2, 1), None);
}
