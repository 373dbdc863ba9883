//! Compute-shader binarization
//!
//! Uploads the raw RGBA pixels into a storage buffer, runs `binarize.wgsl`
//! over every pixel and copies the result back into the image. Every stage
//! reports failure as a [`PreprocessError`]; validation errors are captured
//! through error scopes so a broken shader never panics the host.

use async_trait::async_trait;
use image::RgbaImage;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;
use wgpu::util::DeviceExt;

use super::preprocess::{Binarizer, PreprocessError};

const SHADER: &str = include_str!("binarize.wgsl");
const WORKGROUP_SIZE: u32 = 64;

/// Binarizer backed by a wgpu compute pipeline
pub struct GpuBinarizer {
    device: Arc<wgpu::Device>,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    adapter_name: String,
    max_workgroups: u32,
}

impl GpuBinarizer {
    /// Request an adapter and device and build the pipeline
    pub async fn new() -> Result<Self, PreprocessError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(PreprocessError::NoAdapter)?;

        let adapter_name = adapter.get_info().name;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("binarize"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| PreprocessError::Device(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("binarize"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SHADER)),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("binarize"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("binarize"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("binarize"),
            layout: Some(&layout),
            module: &module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(PreprocessError::Validation(err.to_string()));
        }

        let max_workgroups = device.limits().max_compute_workgroups_per_dimension;

        Ok(Self {
            device: Arc::new(device),
            queue,
            pipeline,
            bind_group_layout,
            adapter_name,
            max_workgroups,
        })
    }

    /// Name of the adapter the pipeline runs on
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }
}

#[async_trait]
impl Binarizer for GpuBinarizer {
    fn name(&self) -> &'static str {
        "gpu"
    }

    async fn binarize(&self, image: &mut RgbaImage, threshold: u8) -> Result<(), PreprocessError> {
        let pixel_count = (image.width() as usize) * (image.height() as usize);
        if pixel_count == 0 {
            return Ok(());
        }

        let workgroups = pixel_count.div_ceil(WORKGROUP_SIZE as usize);
        if workgroups > self.max_workgroups as usize {
            return Err(PreprocessError::TooLarge(pixel_count));
        }

        let byte_len = image.as_raw().len() as u64;
        let mut params = [0u8; 16];
        params[0..4].copy_from_slice(&(threshold as u32 * 1000).to_le_bytes());
        params[4..8].copy_from_slice(&(pixel_count as u32).to_le_bytes());

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let storage = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("binarize-pixels"),
            contents: image.as_raw(),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("binarize-params"),
            contents: &params,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("binarize-readback"),
            size: byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("binarize"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: storage.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("binarize") });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("binarize"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups as u32, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&storage, 0, &readback, 0, byte_len);
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = self.device.pop_error_scope().await {
            return Err(PreprocessError::Validation(err.to_string()));
        }

        let slice = readback.slice(..);
        let (tx, rx) = tokio::sync::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || {
            let _ = device.poll(wgpu::Maintain::Wait);
        })
        .await
        .map_err(|e| PreprocessError::Readback(e.to_string()))?;

        rx.await
            .map_err(|e| PreprocessError::Readback(e.to_string()))?
            .map_err(|e| PreprocessError::Readback(e.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            image.copy_from_slice(&mapped[..]);
        }
        readback.unmap();

        debug!("GPU binarized {} pixels in {} workgroups", pixel_count, workgroups);
        Ok(())
    }
}
