//! Compute device selection and blocking transfers.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::error::{EngineError, Result};

/// Interval between non-blocking device polls while waiting on a transfer.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// GPU vendors by PCI vendor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    /// NVIDIA (0x10DE).
    Nvidia,
    /// AMD (0x1002).
    Amd,
    /// Intel (0x8086).
    Intel,
}

impl GpuVendor {
    /// PCI vendor id.
    pub const fn id(self) -> u32 {
        match self {
            Self::Nvidia => 0x10DE,
            Self::Amd => 0x1002,
            Self::Intel => 0x8086,
        }
    }

    /// Vendor for a PCI vendor id.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0x10DE => Some(Self::Nvidia),
            0x1002 => Some(Self::Amd),
            0x8086 => Some(Self::Intel),
            _ => None,
        }
    }
}

/// One acceptable kind of adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceClass {
    /// Discrete GPU.
    Discrete,
    /// Integrated GPU.
    Integrated,
    /// Software or CPU adapter.
    Cpu,
    /// Any adapter.
    Any,
    /// Any adapter from a specific vendor.
    Vendor(GpuVendor),
}

impl DeviceClass {
    /// Whether `info` describes an adapter of this class.
    pub fn matches(&self, info: &wgpu::AdapterInfo) -> bool {
        match self {
            Self::Discrete => info.device_type == wgpu::DeviceType::DiscreteGpu,
            Self::Integrated => info.device_type == wgpu::DeviceType::IntegratedGpu,
            Self::Cpu => info.device_type == wgpu::DeviceType::Cpu,
            Self::Any => true,
            Self::Vendor(vendor) => info.vendor == vendor.id(),
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discrete => "discrete",
            Self::Integrated => "integrated",
            Self::Cpu => "cpu",
            Self::Any => "any",
            Self::Vendor(GpuVendor::Nvidia) => "nvidia",
            Self::Vendor(GpuVendor::Amd) => "amd",
            Self::Vendor(GpuVendor::Intel) => "intel",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discrete" | "dgpu" => Ok(Self::Discrete),
            "integrated" | "igpu" => Ok(Self::Integrated),
            "cpu" | "software" => Ok(Self::Cpu),
            "any" => Ok(Self::Any),
            "nvidia" => Ok(Self::Vendor(GpuVendor::Nvidia)),
            "amd" => Ok(Self::Vendor(GpuVendor::Amd)),
            "intel" => Ok(Self::Vendor(GpuVendor::Intel)),
            other => Err(format!(
                "unknown device class '{other}' (expected discrete, integrated, cpu, any, nvidia, amd or intel)"
            )),
        }
    }
}

impl TryFrom<String> for DeviceClass {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceClass> for String {
    fn from(class: DeviceClass) -> Self {
        class.to_string()
    }
}

/// Ordered list of acceptable adapter classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevicePreference(Vec<DeviceClass>);

impl Default for DevicePreference {
    fn default() -> Self {
        Self(vec![
            DeviceClass::Discrete,
            DeviceClass::Integrated,
            DeviceClass::Any,
        ])
    }
}

impl DevicePreference {
    /// Create a preference from classes in priority order.
    pub fn new(classes: Vec<DeviceClass>) -> Self {
        Self(classes)
    }

    /// Classes in priority order.
    pub fn classes(&self) -> &[DeviceClass] {
        &self.0
    }

    /// Index of the first adapter matching the highest-priority class.
    pub fn select(&self, adapters: &[wgpu::AdapterInfo]) -> Option<usize> {
        self.0
            .iter()
            .find_map(|class| adapters.iter().position(|info| class.matches(info)))
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    /// Parse a comma separated list such as `"nvidia,discrete,any"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let classes = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(DeviceClass::from_str)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if classes.is_empty() {
            return Err("device preference is empty".to_string());
        }
        Ok(Self(classes))
    }
}

/// Summary of an available adapter.
#[derive(Debug, Clone)]
pub struct AdapterSummary {
    /// Adapter name.
    pub name: String,
    /// Backend (Vulkan, Metal, DX12, ...).
    pub backend: wgpu::Backend,
    /// Device type.
    pub device_type: wgpu::DeviceType,
    /// Known vendor, if any.
    pub vendor: Option<GpuVendor>,
}

impl From<&wgpu::AdapterInfo> for AdapterSummary {
    fn from(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
            vendor: GpuVendor::from_id(info.vendor),
        }
    }
}

impl fmt::Display for AdapterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.device_type, self.backend)
    }
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Enumerate adapters on all backends.
pub fn enumerate_adapters() -> Vec<AdapterSummary> {
    new_instance()
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .map(|adapter| AdapterSummary::from(&adapter.get_info()))
        .collect()
}

/// GPU buffer with its byte size.
pub struct DeviceBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl DeviceBuffer {
    /// Create an uninitialized buffer.
    pub fn new(device: &wgpu::Device, size: u64, usage: wgpu::BufferUsages, label: &str) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        Self { buffer, size }
    }

    /// Create a buffer holding `contents`.
    pub fn with_contents(
        device: &wgpu::Device,
        contents: &[u8],
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        });
        Self {
            buffer,
            size: contents.len() as u64,
        }
    }

    /// Underlying buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Device errors reported outside an error scope.
type ErrorSink = Arc<Mutex<Option<String>>>;

/// An opened compute device and its queue.
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: wgpu::AdapterInfo,
    errors: ErrorSink,
    timeout: Duration,
}

impl GpuContext {
    /// Open the first adapter matching `preference`.
    ///
    /// Timestamp queries are requested when the adapter supports them.
    /// Uncaptured device errors are recorded and surfaced by
    /// [`check_errors`](Self::check_errors).
    pub async fn new(preference: &DevicePreference, timeout: Duration) -> Result<Self> {
        let instance = new_instance();
        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let infos: Vec<wgpu::AdapterInfo> = adapters.iter().map(|a| a.get_info()).collect();

        for info in &infos {
            debug!("Found adapter: {}", AdapterSummary::from(info));
        }

        let index = preference.select(&infos).ok_or_else(|| {
            let wanted = preference
                .classes()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let seen = if infos.is_empty() {
                "none".to_string()
            } else {
                infos
                    .iter()
                    .map(|i| AdapterSummary::from(i).to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            EngineError::init(format!(
                "no adapter matches preference [{wanted}]; adapters found: {seen}"
            ))
        })?;

        let adapter = adapters
            .into_iter()
            .nth(index)
            .ok_or_else(|| EngineError::init("selected adapter disappeared"))?;
        let info = adapter.get_info();

        let profiling = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if profiling {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Membrane Device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| EngineError::init(format!("Failed to create device: {}", e)))?;

        let errors: ErrorSink = Arc::new(Mutex::new(None));
        let sink = errors.clone();
        device.on_uncaptured_error(Box::new(move |err| {
            let msg = err.to_string();
            warn!("Uncaptured device error: {}", msg);
            let mut slot = sink.lock();
            if slot.is_none() {
                *slot = Some(msg);
            }
        }));

        info!(
            "Opened compute device: {} ({:?}, profiling {})",
            info.name,
            info.backend,
            if profiling { "on" } else { "off" }
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
            errors,
            timeout,
        })
    }

    /// The wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// The command queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Adapter info.
    pub fn info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// Bound on blocking waits.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take the first recorded device error, if any.
    pub fn take_error(&self) -> Option<String> {
        self.errors.lock().take()
    }

    /// Fail with `DeviceRuntime` if a device error was recorded.
    pub fn check_errors(&self) -> Result<()> {
        match self.take_error() {
            Some(msg) => Err(EngineError::device(msg)),
            None => Ok(()),
        }
    }

    /// Flush queued buffer writes.
    pub fn flush(&self) {
        self.queue.submit(std::iter::empty());
    }

    /// Copy `out.len()` elements from `src` at byte `offset` through
    /// `staging` into `out`, blocking until done or the timeout expires.
    ///
    /// `staging` must be `MAP_READ | COPY_DST` and at least as large as `out`.
    pub fn read_buffer<T: bytemuck::Pod>(
        &self,
        src: &DeviceBuffer,
        offset: u64,
        staging: &DeviceBuffer,
        out: &mut [T],
    ) -> Result<()> {
        let bytes = std::mem::size_of_val(out) as u64;
        if bytes == 0 {
            return Ok(());
        }
        if bytes > staging.size() || offset + bytes > src.size() {
            return Err(EngineError::device(format!(
                "read of {bytes} bytes at offset {offset} exceeds buffer size"
            )));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(src.buffer(), offset, staging.buffer(), 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.buffer().slice(..bytes);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let deadline = Instant::now() + self.timeout;
        loop {
            self.device.poll(wgpu::Maintain::Poll);
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    return Err(EngineError::device(format!("Map failed: {:?}", e)));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        // Cancel the pending map so the staging buffer can be reused.
                        staging.buffer().unmap();
                        return Err(EngineError::DeviceTimeout(self.timeout));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EngineError::device("Map callback dropped"));
                }
            }
        }

        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&data));
        }
        staging.buffer().unmap();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(device_type: wgpu::DeviceType, vendor: u32) -> wgpu::AdapterInfo {
        wgpu::AdapterInfo {
            name: "test".to_string(),
            vendor,
            device: 0,
            device_type,
            driver: String::new(),
            driver_info: String::new(),
            backend: wgpu::Backend::Vulkan,
        }
    }

    #[test]
    fn test_parse_classes() {
        assert_eq!("discrete".parse::<DeviceClass>(), Ok(DeviceClass::Discrete));
        assert_eq!(
            "NVIDIA".parse::<DeviceClass>(),
            Ok(DeviceClass::Vendor(GpuVendor::Nvidia))
        );
        assert!("quantum".parse::<DeviceClass>().is_err());

        let pref: DevicePreference = "amd, cpu".parse().unwrap();
        assert_eq!(
            pref.classes(),
            &[DeviceClass::Vendor(GpuVendor::Amd), DeviceClass::Cpu]
        );
        assert!("".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_vendor_ids() {
        assert_eq!(GpuVendor::Intel.id(), 32902);
        assert_eq!(GpuVendor::Amd.id(), 4098);
        assert_eq!(GpuVendor::Nvidia.id(), 4318);
        assert_eq!(GpuVendor::from_id(0x10DE), Some(GpuVendor::Nvidia));
        assert_eq!(GpuVendor::from_id(0x1234), None);
    }

    #[test]
    fn test_select_in_preference_order() {
        let adapters = vec![
            info(wgpu::DeviceType::IntegratedGpu, 0x8086),
            info(wgpu::DeviceType::DiscreteGpu, 0x10DE),
            info(wgpu::DeviceType::Cpu, 0),
        ];

        assert_eq!(DevicePreference::default().select(&adapters), Some(1));

        let cpu_first = DevicePreference::new(vec![DeviceClass::Cpu, DeviceClass::Any]);
        assert_eq!(cpu_first.select(&adapters), Some(2));

        let intel = DevicePreference::new(vec![DeviceClass::Vendor(GpuVendor::Intel)]);
        assert_eq!(intel.select(&adapters), Some(0));

        let amd = DevicePreference::new(vec![DeviceClass::Vendor(GpuVendor::Amd)]);
        assert_eq!(amd.select(&adapters), None);
    }

    #[test]
    fn test_preference_serde() {
        let pref = DevicePreference::new(vec![DeviceClass::Discrete, DeviceClass::Any]);
        let json = serde_json::to_string(&pref).unwrap();
        assert_eq!(json, r#"["discrete","any"]"#);
        let back: DevicePreference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pref);
    }

    #[tokio::test]
    #[ignore] // Requires GPU
    async fn test_open_any_device() {
        let preference = DevicePreference::new(vec![DeviceClass::Any]);
        let ctx = GpuContext::new(&preference, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(ctx.take_error().is_none());
        println!("Device: {}", AdapterSummary::from(ctx.info()));

        let listed = enumerate_adapters();
        assert!(listed.iter().any(|a| a.name == ctx.info().name));
    }

    #[tokio::test]
    #[ignore] // Requires GPU
    async fn test_read_buffer_roundtrip() {
        let preference = DevicePreference::new(vec![DeviceClass::Any]);
        let ctx = GpuContext::new(&preference, Duration::from_secs(1))
            .await
            .unwrap();

        let data = [1.0f32, 2.0, 3.0, 4.0];
        let src = DeviceBuffer::with_contents(
            ctx.device(),
            bytemuck::cast_slice(&data),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            "Source",
        );
        let staging = DeviceBuffer::new(
            ctx.device(),
            16,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            "Staging",
        );

        let mut out = [0.0f32; 2];
        ctx.read_buffer(&src, 8, &staging, &mut out).unwrap();
        assert_eq!(out, [3.0, 4.0]);
    }
}
