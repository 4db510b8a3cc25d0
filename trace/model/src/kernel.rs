use super::Dim;
use serde::{Deserialize, Serialize};

/// Declared PTX type of a kernel parameter.
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParamType {
    B8,
    B16,
    B32,
    B64,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Pred,
}

impl ParamType {
    /// Size of one element in bytes.
    #[must_use]
    pub fn element_size(self) -> usize {
        match self {
            Self::B8 | Self::S8 | Self::U8 | Self::Pred => 1,
            Self::B16 | Self::S16 | Self::U16 => 2,
            Self::B32 | Self::S32 | Self::U32 | Self::F32 => 4,
            Self::B64 | Self::S64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Number of address bits an element contributes when reinterpreted as a pointer.
    ///
    /// Only integer types can hold (parts of) device addresses.
    #[must_use]
    pub fn address_bits(self) -> Option<u32> {
        match self {
            Self::B8 | Self::S8 | Self::U8 => Some(8),
            Self::B16 | Self::S16 | Self::U16 => Some(16),
            Self::B32 | Self::S32 | Self::U32 => Some(32),
            Self::B64 | Self::S64 | Self::U64 => Some(64),
            Self::F32 | Self::F64 | Self::Pred => None,
        }
    }
}

/// A kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    /// Raw bits of each element, zero extended to 64 bit.
    pub values: Vec<u64>,
    /// Offset into the argument block.
    #[serde(default)]
    pub offset: usize,
}

impl Parameter {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ParamType, values: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            ty,
            values,
            offset: 0,
        }
    }

    /// A single 64 bit device pointer.
    #[must_use]
    pub fn pointer(name: impl Into<String>, addr: u64) -> Self {
        Self::new(name, ParamType::U64, vec![addr])
    }

    #[must_use]
    pub fn element_size(&self) -> usize {
        self.ty.element_size()
    }

    /// Size of the parameter in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.element_size() * self.values.len()
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        self.element_size()
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("argument block of {available} bytes too small for parameter {parameter:?} (needs {needed} bytes)")]
    ArgumentBlockTooSmall {
        parameter: String,
        needed: usize,
        available: usize,
    },
}

/// Default limit of threads per block of the emulated device.
pub const MAX_THREADS_PER_BLOCK: u32 = 1024;

/// A kernel ready to be launched on the emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableKernel {
    pub name: String,
    /// Path of the module the kernel was loaded from.
    pub module_path: String,
    pub grid_dim: Dim,
    pub block_dim: Dim,
    pub max_threads_per_block: u32,
    pub parameters: Vec<Parameter>,
}

impl ExecutableKernel {
    #[must_use]
    pub fn new(name: impl Into<String>, module_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module_path: module_path.into(),
            grid_dim: Dim::ONE,
            block_dim: Dim::ONE,
            max_threads_per_block: MAX_THREADS_PER_BLOCK,
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn threads_per_block(&self) -> u64 {
        self.block_dim.size()
    }

    #[must_use]
    pub fn num_blocks(&self) -> u64 {
        self.grid_dim.size()
    }

    /// Computes the offset of every parameter in the argument block.
    ///
    /// Each parameter is aligned to its element size.
    /// Returns the total size of the argument block in bytes.
    pub fn map_argument_offsets(&mut self) -> usize {
        let mut size = 0;
        for param in &mut self.parameters {
            let alignment = param.alignment().max(1);
            let misalignment = size % alignment;
            if misalignment != 0 {
                size += alignment - misalignment;
            }
            param.offset = size;
            size += param.size();
        }
        size
    }

    /// Loads parameter values from a packed argument block.
    pub fn set_argument_block(&mut self, block: &[u8]) -> Result<(), Error> {
        self.map_argument_offsets();
        for param in &mut self.parameters {
            let element_size = param.element_size();
            let needed = param.offset + param.size();
            if needed > block.len() {
                return Err(Error::ArgumentBlockTooSmall {
                    parameter: param.name.clone(),
                    needed,
                    available: block.len(),
                });
            }
            let bytes = &block[param.offset..needed];
            for (value, element) in param.values.iter_mut().zip(bytes.chunks_exact(element_size)) {
                let mut raw = [0u8; 8];
                raw[..element_size].copy_from_slice(element);
                *value = u64::from_le_bytes(raw);
            }
        }
        Ok(())
    }

    /// Packs parameter values into an argument block.
    #[must_use]
    pub fn argument_block(&self) -> Vec<u8> {
        let size = self
            .parameters
            .iter()
            .map(|param| param.offset + param.size())
            .max()
            .unwrap_or(0);
        let mut block = vec![0; size];
        for param in &self.parameters {
            let element_size = param.element_size();
            for (i, value) in param.values.iter().enumerate() {
                let start = param.offset + i * element_size;
                block[start..start + element_size]
                    .copy_from_slice(&value.to_le_bytes()[..element_size]);
            }
        }
        block
    }
}

impl std::fmt::Display for ExecutableKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableKernel")
            .field("name", &self.name)
            .field("grid", &self.grid_dim)
            .field("block", &self.block_dim)
            .field("params", &self.parameters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ExecutableKernel, ParamType, Parameter};
    use color_eyre::eyre;
    use similar_asserts as diff;

    fn kernel() -> ExecutableKernel {
        let mut kernel = ExecutableKernel::new("vecadd", "vecadd.ptx");
        kernel.parameters = vec![
            Parameter::new("n", ParamType::U32, vec![0]),
            Parameter::new("a", ParamType::U64, vec![0]),
            Parameter::new("flag", ParamType::U8, vec![0]),
            Parameter::new("b", ParamType::U16, vec![0, 0]),
        ];
        kernel
    }

    #[test]
    fn test_map_argument_offsets() {
        let mut kernel = kernel();
        diff::assert_eq!(have: kernel.map_argument_offsets(), want: 22);
        diff::assert_eq!(
            have: kernel.parameters.iter().map(|p| p.offset).collect::<Vec<_>>(),
            want: vec![0, 8, 16, 18]
        );
    }

    #[test]
    fn test_argument_block_round_trip() -> eyre::Result<()> {
        let mut kernel = kernel();
        let mut block = vec![0u8; 22];
        block[0..4].copy_from_slice(&1024u32.to_le_bytes());
        block[8..16].copy_from_slice(&0x7f00_dead_beefu64.to_le_bytes());
        block[16] = 1;
        block[18..20].copy_from_slice(&3u16.to_le_bytes());
        block[20..22].copy_from_slice(&4u16.to_le_bytes());

        kernel.set_argument_block(&block)?;
        diff::assert_eq!(
            have: kernel.parameters.iter().map(|p| p.values.clone()).collect::<Vec<_>>(),
            want: vec![vec![1024], vec![0x7f00_dead_beef], vec![1], vec![3, 4]]
        );
        diff::assert_eq!(have: kernel.argument_block(), want: block);
        Ok(())
    }

    #[test]
    fn test_argument_block_too_small() {
        let mut kernel = kernel();
        let err = kernel.set_argument_block(&[0; 12]).unwrap_err();
        diff::assert_eq!(
            have: err,
            want: Error::ArgumentBlockTooSmall {
                parameter: "a".to_string(),
                needed: 16,
                available: 12,
            }
        );
    }
}
