use zelite_core::{DriverConfig, Error, MemoryKind};

use super::{expect_eq, expect_err, Harness};

pub(crate) fn memory_alloc_validation(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    expect_err(
        h.ctx.alloc_device(&h.device, 0, 64),
        |e| matches!(e, Error::InvalidArgument(_)),
        "zero-sized allocation",
    )?;
    expect_err(
        h.ctx.alloc_device(&h.device, 64, 48),
        |e| matches!(e, Error::InvalidArgument(_)),
        "alignment that is not a power of two",
    )?;

    let ptr = h.ctx.alloc_shared(&h.device, 100, 256)?;
    expect_eq(ptr.addr() % 256, 0, "aligned base")?;
    let props = h.ctx.allocation_properties(ptr)?;
    expect_eq(props.kind, MemoryKind::Shared, "allocation kind")?;
    expect_eq(props.size, 100, "allocation size")?;
    expect_eq(props.device, Some(h.device.id()), "allocation device")?;
    expect_eq(h.ctx.read(ptr, 100)?, vec![0; 100], "fresh allocation contents")?;

    h.ctx.free(ptr)?;
    expect_err(
        h.ctx.free(ptr),
        |e| matches!(e, Error::InvalidArgument(_)),
        "double free",
    )
}

pub(crate) fn memory_out_of_device_memory(config: &DriverConfig) -> anyhow::Result<()> {
    let h = Harness::new(config)?;
    expect_err(
        h.ctx
            .alloc_device(&h.device, config.device_memory_bytes.saturating_add(1), 64),
        |e| matches!(e, Error::OutOfDeviceMemory { .. }),
        "allocation larger than device memory",
    )?;
    expect_err(
        h.ctx.alloc_host(config.host_memory_bytes.saturating_add(1), 64),
        |e| matches!(e, Error::OutOfDeviceMemory { .. }),
        "allocation larger than host memory",
    )?;
    // A failed reservation leaves the budget untouched.
    let ptr = h.ctx.alloc_device(&h.device, 4096, 64)?;
    h.ctx.free(ptr)?;
    Ok(())
}
