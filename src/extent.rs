use std::collections::HashSet;
use trace_model::{ExecutableKernel, MemoryContext, Parameter};

/// Candidate device addresses encoded by the elements of `param`.
///
/// Elements narrower than 64 bit are shifted into a running accumulator,
/// so consecutive narrow elements compose a wider address.
/// Parameters of non-integer types do not encode addresses.
fn candidate_addresses(param: &Parameter) -> impl Iterator<Item = u64> + '_ {
    let bits = param.ty.address_bits();
    let mut address: u64 = 0;
    param.values.iter().filter_map(move |&value| {
        address = match bits? {
            64 => value,
            bits => (address << bits) | (value & ((1 << bits) - 1)),
        };
        Some(address)
    })
}

/// Total size of the distinct allocations reachable from the kernel parameters.
///
/// Every candidate address is looked up in the global table first and in the
/// generic table of the context second.
/// Allocations are deduplicated by their base pointer.
pub fn extent(kernel: &ExecutableKernel, memory: &dyn MemoryContext) -> u64 {
    log::debug!("computing extent for kernel {}", kernel.name);
    let mut encountered = HashSet::new();
    let mut extent = 0;

    for param in &kernel.parameters {
        for address in candidate_addresses(param) {
            log::trace!("checking address {address:#x} of parameter {}", param.name);
            let Some(allocation) = memory
                .global_allocation(address)
                .or_else(|| memory.allocation(address))
            else {
                continue;
            };
            if encountered.insert(allocation.base) {
                log::trace!("hit allocation {allocation}");
                extent += allocation.size;
            }
        }
    }
    extent
}

#[cfg(test)]
mod tests {
    use crate::allocation::DeviceMemory;
    use color_eyre::eyre;
    use similar_asserts as diff;
    use trace_model::{Allocation, ExecutableKernel, ParamType, Parameter};

    fn memory() -> eyre::Result<DeviceMemory> {
        let mut memory = DeviceMemory::default();
        memory.global.insert(Allocation::new(0x1000_0000, 4096))?;
        memory.generic.insert(Allocation::new(0x2000_0000, 256))?;
        Ok(memory)
    }

    #[test]
    fn test_aliased_allocations_counted_once() -> eyre::Result<()> {
        let memory = memory()?;
        let mut kernel = ExecutableKernel::new("kernel", "module.ptx");
        kernel.parameters = vec![
            Parameter::pointer("a", 0x1000_0000),
            Parameter::pointer("a_offset", 0x1000_0800),
            Parameter::pointer("b", 0x2000_0010),
            Parameter::new("n", ParamType::U32, vec![1024]),
            Parameter::new("alpha", ParamType::F32, vec![0x1000_0000]),
        ];
        diff::assert_eq!(have: super::extent(&kernel, &memory), want: 4352);
        Ok(())
    }

    #[test]
    fn test_narrow_elements_compose_addresses() -> eyre::Result<()> {
        let memory = memory()?;
        let mut kernel = ExecutableKernel::new("kernel", "module.ptx");
        // two 32 bit halves, high word first
        kernel.parameters = vec![Parameter::new("ptr", ParamType::U32, vec![0, 0x2000_0020])];
        diff::assert_eq!(have: super::extent(&kernel, &memory), want: 256);

        kernel.parameters = vec![Parameter::new(
            "bytes",
            ParamType::B8,
            vec![0x10, 0x00, 0x00, 0x00],
        )];
        diff::assert_eq!(have: super::extent(&kernel, &memory), want: 4096);
        Ok(())
    }

    #[test]
    fn test_no_allocations_reachable() {
        let memory = DeviceMemory::default();
        let mut kernel = ExecutableKernel::new("kernel", "module.ptx");
        kernel.parameters = vec![Parameter::pointer("a", 0xdead_beef)];
        diff::assert_eq!(have: super::extent(&kernel, &memory), want: 0);
    }
}
