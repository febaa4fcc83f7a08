//! Headless GPU device management.
//!
//! [`GpuContext`] holds the wgpu device and queue the [`WgpuBackend`] renders
//! with. Capture never presents to a window, so there is no surface: targets
//! are plain textures and results come back through mapped staging buffers.
//!
//! ```no_run
//! use segcap::GpuContext;
//!
//! let gpu = GpuContext::headless()?;
//! println!("capturing on {}", gpu.adapter_info.name);
//! # Ok::<(), segcap::BackendError>(())
//! ```
//!
//! [`WgpuBackend`]: crate::backend::WgpuBackend

use crate::error::BackendError;

/// Core GPU context holding wgpu resources.
pub struct GpuContext {
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Adapter the device was created on, for diagnostics.
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Creates a device without a surface.
    ///
    /// Requests the default adapter from the primary backends (Vulkan, Metal,
    /// DX12). Fails if none is available, which is the normal outcome on CI
    /// machines without a GPU.
    pub fn headless() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| BackendError::Device(format!("no suitable adapter: {e}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Capture Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| BackendError::Device(format!("device request failed: {e}")))?;

        let adapter_info = adapter.get_info();
        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "headless gpu context ready"
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    /// Copies a whole single-sampled texture into host memory.
    ///
    /// `bytes_per_pixel` must match the texture format (4 for `Rgba8Unorm`
    /// and `Depth32Float`). Rows come back top-down and tightly packed.
    pub fn read_texture(
        &self,
        texture: &wgpu::Texture,
        aspect: wgpu::TextureAspect,
        bytes_per_pixel: u32,
    ) -> Result<Vec<u8>, BackendError> {
        let (width, height) = (texture.width(), texture.height());
        let unpadded = width * bytes_per_pixel;
        let padded = padded_bytes_per_row(unpadded);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let mapped = loop {
            self.device
                .poll(wgpu::PollType::Poll)
                .map_err(|e| BackendError::Readback(e.to_string()))?;
            match rx.try_recv() {
                Ok(result) => break result,
                Err(std::sync::mpsc::TryRecvError::Empty) => std::thread::yield_now(),
                Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    return Err(BackendError::Readback("map callback dropped".into()));
                }
            }
        };
        mapped.map_err(|e| BackendError::Readback(e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut out = Vec::with_capacity((unpadded * height) as usize);
        for row in data.chunks_exact(padded as usize) {
            out.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(data);
        staging.unmap();

        Ok(out)
    }
}

/// Rounds a row up to the copy alignment wgpu requires (256 bytes).
pub fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_256() {
        assert_eq!(padded_bytes_per_row(4), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(64 * 4 + 1), 512);
    }
}
