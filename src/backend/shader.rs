// Shader module loading
//
// Shaders are compiled to SPIR-V ahead of time (see build.rs) and read
// from disk at startup. A missing or malformed file is fatal.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// Read a SPIR-V file and create a shader module from it
pub fn load_shader_module(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open shader {:?}", path))?;
    create_shader_module(device, &bytes)
        .with_context(|| format!("Failed to create shader module for {:?}", path))
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &ash::Device, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = decode_spirv(code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe {
        device.create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// SPIR-V uses 4-byte words; copying into a Vec<u32> guarantees alignment.
fn decode_spirv(code: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(code)).context("Invalid SPIR-V")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_words() {
        let mut bytes = 0x0723_0203u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = decode_spirv(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(decode_spirv(&[0x03, 0x02, 0x23]).is_err());
    }
}
