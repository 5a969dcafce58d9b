//! In-process camera SDK.
//!
//! Models attached cameras, exclusive opens, attribute tables, the capture
//! queue and hot-plug notifications closely enough to drive the whole capture
//! layer without hardware.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use rand::Rng;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{
    AttrFlags, AttrInfo, AttrKind, AttrRange, AttrValue, CameraInfo, CameraSdk, DeviceId,
    LinkCallback, LinkEvent, QueueRejected, RawFrame, SdkError, SdkHandle, SdkResult,
};

const MAX_QUEUED_FRAMES: usize = 16;
const MIN_PACKET_SIZE: u32 = 500;
const MAX_PACKET_SIZE: u32 = 16456;

pub const PIXEL_FORMATS: [&str; 7] = [
    "Mono8",
    "Mono16",
    "Mono12Packed",
    "Bayer8",
    "Bayer16",
    "Rgb24",
    "Yuv411",
];

/// Description of a camera the simulator exposes.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub info: CameraInfo,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub pixel_format: String,
}

impl SimulatedDevice {
    pub fn new(id: DeviceId, sensor_width: u32, sensor_height: u32) -> Self {
        Self {
            info: CameraInfo {
                unique_id: id,
                camera_name: format!("SimCam {}", id),
                model_name: "GC-SIM".to_string(),
                serial_number: format!("{:08}", id),
                firmware_version: "1.0.0".to_string(),
            },
            sensor_width,
            sensor_height,
            pixel_format: "Mono8".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info.camera_name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.info.model_name = model.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.info.serial_number = serial.into();
        self
    }

    pub fn with_firmware(mut self, firmware: impl Into<String>) -> Self {
        self.info.firmware_version = firmware.into();
        self
    }

    pub fn with_pixel_format(mut self, format: impl Into<String>) -> Self {
        self.pixel_format = format.into();
        self
    }
}

struct Attr {
    info: AttrInfo,
    value: Option<AttrValue>,
    range: Option<AttrRange>,
}

impl Attr {
    fn new(kind: AttrKind, category: &str, flags: AttrFlags, value: Option<AttrValue>) -> Self {
        Self {
            info: AttrInfo {
                kind,
                category: category.to_string(),
                flags,
            },
            value,
            range: None,
        }
    }

    fn with_range(mut self, range: AttrRange) -> Self {
        self.range = Some(range);
        self
    }
}

struct DeviceState {
    info: CameraInfo,
    attached: bool,
    open_handle: Option<SdkHandle>,
    attrs: BTreeMap<String, Attr>,
}

impl DeviceState {
    fn new(device: SimulatedDevice) -> Self {
        let (w, h) = (device.sensor_width, device.sensor_height);
        let enums = |values: &[&str]| AttrRange::Enum(values.iter().map(|s| s.to_string()).collect());
        let mut attrs = BTreeMap::new();
        let mut add = |name: &str, attr: Attr| {
            attrs.insert(name.to_string(), attr);
        };

        add("SensorWidth", Attr::new(AttrKind::Uint32, "/Info/Sensor", AttrFlags::CONSTANT, Some(AttrValue::Uint32(w))));
        add("SensorHeight", Attr::new(AttrKind::Uint32, "/Info/Sensor", AttrFlags::CONSTANT, Some(AttrValue::Uint32(h))));
        add(
            "CameraName",
            Attr::new(AttrKind::String, "/Info", AttrFlags::READ_WRITE, Some(AttrValue::String(device.info.camera_name.clone()))),
        );
        add(
            "TimeStampFrequency",
            Attr::new(AttrKind::Int64, "/Stats", AttrFlags::CONSTANT, Some(AttrValue::Int64(1_000_000_000)))
                .with_range(AttrRange::Int64 { min: 1_000_000_000, max: 1_000_000_000 }),
        );
        add("LensData", Attr::new(AttrKind::Raw, "/Info", AttrFlags::READ_ONLY, None));
        add(
            "Width",
            Attr::new(AttrKind::Uint32, "/ImageFormat/ROI", AttrFlags::READ_WRITE, Some(AttrValue::Uint32(w)))
                .with_range(AttrRange::Uint32 { min: 1, max: w }),
        );
        add(
            "Height",
            Attr::new(AttrKind::Uint32, "/ImageFormat/ROI", AttrFlags::READ_WRITE, Some(AttrValue::Uint32(h)))
                .with_range(AttrRange::Uint32 { min: 1, max: h }),
        );
        add(
            "RegionX",
            Attr::new(AttrKind::Uint32, "/ImageFormat/ROI", AttrFlags::READ_WRITE, Some(AttrValue::Uint32(0)))
                .with_range(AttrRange::Uint32 { min: 0, max: w.saturating_sub(1) }),
        );
        add(
            "RegionY",
            Attr::new(AttrKind::Uint32, "/ImageFormat/ROI", AttrFlags::READ_WRITE, Some(AttrValue::Uint32(0)))
                .with_range(AttrRange::Uint32 { min: 0, max: h.saturating_sub(1) }),
        );
        add(
            "PixelFormat",
            Attr::new(AttrKind::Enum, "/ImageFormat", AttrFlags::READ_WRITE, Some(AttrValue::Enum(device.pixel_format.clone())))
                .with_range(enums(&PIXEL_FORMATS[..])),
        );
        // Derived from Width, Height and PixelFormat on every read.
        add(
            "TotalBytesPerFrame",
            Attr::new(AttrKind::Uint32, "/ImageFormat", AttrFlags::READ_ONLY, Some(AttrValue::Uint32(0))),
        );
        add(
            "FrameStartTriggerMode",
            Attr::new(AttrKind::Enum, "/Controls/Acquisition/Trigger", AttrFlags::READ_WRITE, Some(AttrValue::Enum("SyncIn1".to_string())))
                .with_range(enums(&["Freerun", "SyncIn1", "SyncIn2", "FixedRate", "Software"][..])),
        );
        add(
            "AcquisitionMode",
            Attr::new(AttrKind::Enum, "/Controls/Acquisition", AttrFlags::READ_WRITE, Some(AttrValue::Enum("SingleFrame".to_string())))
                .with_range(enums(&["Continuous", "SingleFrame", "MultiFrame"][..])),
        );
        add(
            "FrameRate",
            Attr::new(AttrKind::Float32, "/Controls/Acquisition/Trigger", AttrFlags::READ_WRITE, Some(AttrValue::Float32(30.0)))
                .with_range(AttrRange::Float32 { min: 1.0, max: 120.0 }),
        );
        add(
            "ExposureValue",
            Attr::new(AttrKind::Uint32, "/Controls/Exposure", AttrFlags::READ_WRITE, Some(AttrValue::Uint32(15_000)))
                .with_range(AttrRange::Uint32 { min: 10, max: 60_000_000 }),
        );
        add(
            "GainValue",
            Attr::new(AttrKind::Uint32, "/Controls/Gain", AttrFlags::READ_WRITE, Some(AttrValue::Uint32(0)))
                .with_range(AttrRange::Uint32 { min: 0, max: 32 }),
        );
        add(
            "DefectMaskEnable",
            Attr::new(AttrKind::Boolean, "/Controls", AttrFlags::READ_WRITE, Some(AttrValue::Boolean(false))),
        );
        add(
            "PacketSize",
            Attr::new(AttrKind::Uint32, "/GigE", AttrFlags::READ_WRITE, Some(AttrValue::Uint32(1500)))
                .with_range(AttrRange::Uint32 { min: MIN_PACKET_SIZE, max: MAX_PACKET_SIZE }),
        );
        add("AcquisitionStart", Attr::new(AttrKind::Command, "/Controls/Acquisition", AttrFlags::WRITE_ONLY, None));
        add("AcquisitionStop", Attr::new(AttrKind::Command, "/Controls/Acquisition", AttrFlags::WRITE_ONLY, None));

        Self {
            info: device.info,
            attached: true,
            open_handle: None,
            attrs,
        }
    }

    fn u32_attr(&self, name: &str) -> u32 {
        match self.attrs.get(name).and_then(|a| a.value.as_ref()) {
            Some(AttrValue::Uint32(v)) => *v,
            _ => 0,
        }
    }

    fn pixel_format(&self) -> &str {
        match self.attrs.get("PixelFormat").and_then(|a| a.value.as_ref()) {
            Some(AttrValue::Enum(v)) => v,
            _ => "Mono8",
        }
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.u32_attr("Width"), self.u32_attr("Height"))
    }

    fn total_bytes_per_frame(&self) -> u32 {
        let (w, h) = self.frame_size();
        bytes_per_frame(self.pixel_format(), w, h)
    }
}

pub(crate) fn bytes_per_frame(format: &str, width: u32, height: u32) -> u32 {
    let pixels = width * height;
    match format {
        "Mono16" | "Bayer16" => pixels * 2,
        "Mono12Packed" => (pixels * 3 + 1) / 2,
        "Rgb24" => pixels * 3,
        "Yuv411" => pixels * 3 / 2,
        _ => pixels,
    }
}

struct Generator {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

struct HandleState {
    device: DeviceId,
    capturing: bool,
    acquiring: bool,
    queued: VecDeque<RawFrame>,
    done: VecDeque<RawFrame>,
    frame_count: u64,
    generator: Option<Generator>,
}

impl HandleState {
    fn cancel_queued(&mut self, status: SdkError) {
        while let Some(mut frame) = self.queued.pop_front() {
            frame.status = Err(status);
            self.done.push_back(frame);
        }
    }
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    fail_initialize: Option<SdkError>,
    fail_next_open: Option<SdkError>,
    devices: BTreeMap<DeviceId, DeviceState>,
    handles: HashMap<SdkHandle, HandleState>,
    next_handle: u32,
    frame_interval: Option<Duration>,
}

impl Inner {
    fn handle(&self, handle: SdkHandle) -> SdkResult<&HandleState> {
        self.handles.get(&handle).ok_or(SdkError::BadHandle)
    }

    fn handle_mut(&mut self, handle: SdkHandle) -> SdkResult<&mut HandleState> {
        self.handles.get_mut(&handle).ok_or(SdkError::BadHandle)
    }

    /// Device behind a handle, provided it is still attached.
    fn device_of(&self, handle: SdkHandle) -> SdkResult<&DeviceState> {
        let id = self.handle(handle)?.device;
        match self.devices.get(&id) {
            Some(device) if device.attached => Ok(device),
            Some(_) => Err(SdkError::Unplugged),
            None => Err(SdkError::BadHandle),
        }
    }

    fn device_of_mut(&mut self, handle: SdkHandle) -> SdkResult<&mut DeviceState> {
        let id = self.handle(handle)?.device;
        match self.devices.get_mut(&id) {
            Some(device) if device.attached => Ok(device),
            Some(_) => Err(SdkError::Unplugged),
            None => Err(SdkError::BadHandle),
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
    callbacks: Mutex<HashMap<LinkEvent, LinkCallback>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, event: LinkEvent, id: DeviceId) {
        let callback = self
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&event)
            .cloned();
        match callback {
            Some(callback) => callback(event, id),
            None => trace!("No link callback for {:?} of device {}", event, id),
        }
    }

    /// Completes the oldest queued frame of `handle` with the bytes produced by `fill`.
    fn complete_next<F>(&self, handle: SdkHandle, fill: F) -> bool
    where
        F: FnOnce(&DeviceState, &mut RawFrame),
    {
        let mut inner = self.lock();
        let Ok(device_id) = inner.handle(handle).map(|h| h.device) else {
            return false;
        };
        let Some(mut frame) = inner.handles.get_mut(&handle).and_then(|h| h.queued.pop_front()) else {
            return false;
        };
        if let Some(device) = inner.devices.get(&device_id) {
            fill(device, &mut frame);
        }
        if let Some(state) = inner.handles.get_mut(&handle) {
            state.frame_count += 1;
            frame.frame_count = state.frame_count;
            state.done.push_back(frame);
        }
        drop(inner);
        self.changed.notify_all();
        true
    }
}

/// Camera SDK simulation.
///
/// Cloning yields another view of the same simulated system.
#[derive(Clone)]
pub struct SimulatedSdk {
    shared: Arc<Shared>,
}

impl Default for SimulatedSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    next_handle: 1,
                    ..Default::default()
                }),
                changed: Condvar::new(),
                callbacks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Adds a camera that is present from the start, without a link event.
    pub fn with_device(self, device: SimulatedDevice) -> Self {
        let id = device.info.unique_id;
        self.shared.lock().devices.insert(id, DeviceState::new(device));
        self
    }

    /// Lets acquisition produce test-pattern frames on its own at the given interval.
    pub fn with_frame_interval(self, interval: Duration) -> Self {
        self.shared.lock().frame_interval = Some(interval);
        self
    }

    /// Makes the next `initialize` call fail.
    pub fn fail_initialize(&self, error: SdkError) {
        self.shared.lock().fail_initialize = Some(error);
    }

    /// Makes the next `open` call fail.
    pub fn fail_next_open(&self, error: SdkError) {
        self.shared.lock().fail_next_open = Some(error);
    }

    /// Attaches a new camera and fires the add event.
    pub fn attach(&self, device: SimulatedDevice) {
        let id = device.info.unique_id;
        self.shared.lock().devices.insert(id, DeviceState::new(device));
        debug!("Simulated camera {} attached", id);
        self.shared.notify(LinkEvent::Add, id);
    }

    /// Re-attaches a previously unplugged camera and fires the add event.
    pub fn plug(&self, id: DeviceId) -> bool {
        {
            let mut inner = self.shared.lock();
            match inner.devices.get_mut(&id) {
                Some(device) => device.attached = true,
                None => return false,
            }
        }
        debug!("Simulated camera {} plugged", id);
        self.shared.notify(LinkEvent::Add, id);
        true
    }

    /// Detaches a camera and fires the remove event.
    ///
    /// Handles stay logically open; their queued frames fail with `Unplugged`.
    pub fn unplug(&self, id: DeviceId) -> bool {
        let generators = {
            let mut inner = self.shared.lock();
            match inner.devices.get_mut(&id) {
                Some(device) => device.attached = false,
                None => return false,
            }
            let mut generators = Vec::new();
            for state in inner.handles.values_mut().filter(|h| h.device == id) {
                state.cancel_queued(SdkError::Unplugged);
                state.acquiring = false;
                generators.extend(state.generator.take());
            }
            generators
        };
        self.shared.changed.notify_all();
        stop_generators(generators);
        debug!("Simulated camera {} unplugged", id);
        self.shared.notify(LinkEvent::Remove, id);
        true
    }

    /// Completes the oldest queued frame of the device's open handle with `data`.
    ///
    /// Returns false when the device is not open or no frame is queued.
    pub fn deliver_frame(&self, id: DeviceId, data: &[u8]) -> bool {
        let Some(handle) = self.open_handle(id) else {
            return false;
        };
        self.shared.complete_next(handle, |device, frame| {
            let n = frame.buffer.len().min(data.len());
            frame.buffer[..n].copy_from_slice(&data[..n]);
            let (w, h) = device.frame_size();
            frame.width = w;
            frame.height = h;
            frame.status = Ok(());
        })
    }

    /// Completes the oldest queued frame with a failure status.
    pub fn deliver_failed_frame(&self, id: DeviceId, status: SdkError) -> bool {
        let Some(handle) = self.open_handle(id) else {
            return false;
        };
        self.shared.complete_next(handle, |_, frame| frame.status = Err(status))
    }

    /// Completes the oldest queued frame with a generated test pattern.
    pub fn deliver_test_pattern(&self, id: DeviceId) -> bool {
        match self.open_handle(id) {
            Some(handle) => deliver_pattern(&self.shared, handle),
            None => false,
        }
    }

    /// Blocks until at least one frame is queued on the device's open handle.
    pub fn wait_for_queued(&self, id: DeviceId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        loop {
            let queued = inner
                .devices
                .get(&id)
                .and_then(|d| d.open_handle)
                .and_then(|h| inner.handles.get(&h))
                .map(|h| !h.queued.is_empty())
                .unwrap_or(false);
            if queued {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = match self.shared.changed.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn open_handle(&self, id: DeviceId) -> Option<SdkHandle> {
        self.shared.lock().devices.get(&id).and_then(|d| d.open_handle)
    }

    pub fn is_open(&self, id: DeviceId) -> bool {
        self.open_handle(id).is_some()
    }

    pub fn queued_frames(&self, id: DeviceId) -> usize {
        let inner = self.shared.lock();
        inner
            .devices
            .get(&id)
            .and_then(|d| d.open_handle)
            .and_then(|h| inner.handles.get(&h))
            .map(|h| h.queued.len())
            .unwrap_or(0)
    }

    pub fn is_acquiring(&self, id: DeviceId) -> bool {
        let inner = self.shared.lock();
        inner
            .devices
            .get(&id)
            .and_then(|d| d.open_handle)
            .and_then(|h| inner.handles.get(&h))
            .map(|h| h.acquiring)
            .unwrap_or(false)
    }

    pub fn has_link_callback(&self, event: LinkEvent) -> bool {
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&event)
    }

    /// Reads an attribute of a device directly, whether or not it is open.
    pub fn device_attr(&self, id: DeviceId, name: &str) -> Option<AttrValue> {
        let inner = self.shared.lock();
        let device = inner.devices.get(&id)?;
        if name == "TotalBytesPerFrame" {
            return Some(AttrValue::Uint32(device.total_bytes_per_frame()));
        }
        device.attrs.get(name).and_then(|a| a.value.clone())
    }

    /// Writes an attribute of a device directly, bypassing access flags.
    pub fn set_device_attr(&self, id: DeviceId, name: &str, value: AttrValue) -> bool {
        let mut inner = self.shared.lock();
        match inner.devices.get_mut(&id).and_then(|d| d.attrs.get_mut(name)) {
            Some(attr) => {
                attr.value = Some(value);
                true
            }
            None => false,
        }
    }

    fn start_generator(&self, handle: SdkHandle, interval: Duration) -> Generator {
        let (stop, stop_rx) = bounded::<()>(1);
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let thread = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let Some(shared) = weak.upgrade() else { break };
                    if !deliver_pattern(&shared, handle) {
                        trace!("Generated frame for handle {} dropped, nothing queued", handle);
                    }
                }
                _ => break,
            }
        });
        Generator { stop, thread }
    }
}

fn stop_generators(generators: Vec<Generator>) {
    for generator in generators {
        let _ = generator.stop.send(());
        if generator.thread.join().is_err() {
            warn!("Frame generator thread panicked");
        }
    }
}

fn deliver_pattern(shared: &Shared, handle: SdkHandle) -> bool {
    shared.complete_next(handle, |device, frame| {
        let (w, h) = device.frame_size();
        let pattern = test_pattern(device.pixel_format(), w, h, frame_seed(frame));
        let n = frame.buffer.len().min(pattern.len());
        frame.buffer[..n].copy_from_slice(&pattern[..n]);
        frame.width = w;
        frame.height = h;
        frame.status = Ok(());
    })
}

fn frame_seed(frame: &RawFrame) -> u32 {
    (frame.frame_count % 256) as u32
}

/// Diagonal gradient with a little noise, encoded in `format`.
pub(crate) fn test_pattern(format: &str, width: u32, height: u32, phase: u32) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut levels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let base = (x + y + phase) % 248;
            levels.push((base + rng.gen_range(0..8)) as u8);
        }
    }

    match format {
        "Mono16" | "Bayer16" => levels
            .iter()
            .flat_map(|&l| ((l as u16) << 8).to_le_bytes())
            .collect(),
        "Mono12Packed" => {
            let mut out = Vec::with_capacity(bytes_per_frame(format, width, height) as usize);
            for pair in levels.chunks(2) {
                let v0 = (pair[0] as u16) << 4;
                let v1 = pair.get(1).map(|&l| (l as u16) << 4).unwrap_or(0);
                out.push((v0 >> 4) as u8);
                out.push((((v0 & 0xF) << 4) | (v1 >> 8)) as u8);
                out.push((v1 & 0xFF) as u8);
            }
            out
        }
        "Rgb24" => levels
            .iter()
            .enumerate()
            .flat_map(|(i, &l)| {
                let x = i as u32 % width.max(1);
                [l, 255 - l, (x * 255 / width.max(1)) as u8]
            })
            .collect(),
        "Yuv411" => {
            let mut out = levels.clone();
            out.resize(bytes_per_frame(format, width, height) as usize, 128);
            out
        }
        _ => levels,
    }
}

fn check_range(range: Option<&AttrRange>, value: &AttrValue) -> SdkResult<()> {
    let in_range = match (range, value) {
        (None, _) => true,
        (Some(AttrRange::Uint32 { min, max }), AttrValue::Uint32(v)) => v >= min && v <= max,
        (Some(AttrRange::Float32 { min, max }), AttrValue::Float32(v)) => v >= min && v <= max,
        (Some(AttrRange::Int64 { min, max }), AttrValue::Int64(v)) => v >= min && v <= max,
        (Some(AttrRange::Enum(values)), AttrValue::Enum(v)) => values.contains(v),
        _ => false,
    };
    if in_range {
        Ok(())
    } else {
        Err(SdkError::OutOfRange)
    }
}

impl CameraSdk for SimulatedSdk {
    fn initialize(&self) -> SdkResult<()> {
        let mut inner = self.shared.lock();
        if let Some(error) = inner.fail_initialize.take() {
            return Err(error);
        }
        inner.initialized = true;
        Ok(())
    }

    fn uninitialize(&self) {
        let generators: Vec<Generator> = {
            let mut inner = self.shared.lock();
            inner.initialized = false;
            for device in inner.devices.values_mut() {
                device.open_handle = None;
            }
            inner
                .handles
                .drain()
                .filter_map(|(_, mut state)| state.generator.take())
                .collect()
        };
        self.shared.changed.notify_all();
        stop_generators(generators);
    }

    fn camera_count(&self) -> usize {
        let inner = self.shared.lock();
        if !inner.initialized {
            return 0;
        }
        inner.devices.values().filter(|d| d.attached).count()
    }

    fn camera_list(&self) -> Vec<CameraInfo> {
        let inner = self.shared.lock();
        if !inner.initialized {
            return Vec::new();
        }
        inner
            .devices
            .values()
            .filter(|d| d.attached)
            .map(|d| d.info.clone())
            .collect()
    }

    fn open(&self, id: DeviceId) -> SdkResult<SdkHandle> {
        let mut inner = self.shared.lock();
        if !inner.initialized {
            return Err(SdkError::BadSequence);
        }
        if let Some(error) = inner.fail_next_open.take() {
            return Err(error);
        }
        let handle = SdkHandle(inner.next_handle);
        match inner.devices.get_mut(&id) {
            None => return Err(SdkError::NotFound),
            Some(device) if !device.attached => return Err(SdkError::NotFound),
            Some(device) if device.open_handle.is_some() => return Err(SdkError::AccessDenied),
            Some(device) => device.open_handle = Some(handle),
        }
        inner.next_handle += 1;
        inner.handles.insert(
            handle,
            HandleState {
                device: id,
                capturing: false,
                acquiring: false,
                queued: VecDeque::new(),
                done: VecDeque::new(),
                frame_count: 0,
                generator: None,
            },
        );
        debug!("Simulated camera {} opened as {}", id, handle);
        Ok(handle)
    }

    fn close(&self, handle: SdkHandle) -> SdkResult<()> {
        let generator = {
            let mut inner = self.shared.lock();
            let mut state = inner.handles.remove(&handle).ok_or(SdkError::BadHandle)?;
            if let Some(device) = inner.devices.get_mut(&state.device) {
                device.open_handle = None;
            }
            state.generator.take()
        };
        self.shared.changed.notify_all();
        stop_generators(generator.into_iter().collect());
        debug!("Simulated handle {} closed", handle);
        Ok(())
    }

    fn attr_list(&self, handle: SdkHandle) -> SdkResult<Vec<String>> {
        let inner = self.shared.lock();
        Ok(inner.device_of(handle)?.attrs.keys().cloned().collect())
    }

    fn attr_info(&self, handle: SdkHandle, name: &str) -> SdkResult<AttrInfo> {
        let inner = self.shared.lock();
        let device = inner.device_of(handle)?;
        device
            .attrs
            .get(name)
            .map(|a| a.info.clone())
            .ok_or(SdkError::NotFound)
    }

    fn attr_get(&self, handle: SdkHandle, name: &str) -> SdkResult<AttrValue> {
        let inner = self.shared.lock();
        let device = inner.device_of(handle)?;
        let attr = device.attrs.get(name).ok_or(SdkError::NotFound)?;
        if name == "TotalBytesPerFrame" {
            return Ok(AttrValue::Uint32(device.total_bytes_per_frame()));
        }
        if !attr.info.flags.read {
            return Err(SdkError::WrongType);
        }
        attr.value.clone().ok_or(SdkError::WrongType)
    }

    fn attr_set(&self, handle: SdkHandle, name: &str, value: AttrValue) -> SdkResult<()> {
        let mut inner = self.shared.lock();
        let device = inner.device_of_mut(handle)?;
        let attr = device.attrs.get_mut(name).ok_or(SdkError::NotFound)?;
        if attr.info.kind != value.kind() {
            return Err(SdkError::WrongType);
        }
        if attr.info.flags.constant || !attr.info.flags.write {
            return Err(SdkError::Forbidden);
        }
        check_range(attr.range.as_ref(), &value)?;
        attr.value = Some(value);
        Ok(())
    }

    fn attr_range(&self, handle: SdkHandle, name: &str) -> SdkResult<AttrRange> {
        let inner = self.shared.lock();
        let device = inner.device_of(handle)?;
        let attr = device.attrs.get(name).ok_or(SdkError::NotFound)?;
        attr.range.clone().ok_or(SdkError::WrongType)
    }

    fn adjust_packet_size(&self, handle: SdkHandle, max_packet_size: u32) -> SdkResult<()> {
        let mut inner = self.shared.lock();
        let device = inner.device_of_mut(handle)?;
        let size = max_packet_size.clamp(MIN_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(attr) = device.attrs.get_mut("PacketSize") {
            attr.value = Some(AttrValue::Uint32(size));
        }
        Ok(())
    }

    fn capture_start(&self, handle: SdkHandle) -> SdkResult<()> {
        let mut inner = self.shared.lock();
        inner.device_of(handle)?;
        inner.handle_mut(handle)?.capturing = true;
        Ok(())
    }

    fn capture_end(&self, handle: SdkHandle) -> SdkResult<()> {
        let mut inner = self.shared.lock();
        let state = inner.handle_mut(handle)?;
        state.capturing = false;
        state.queued.clear();
        state.done.clear();
        Ok(())
    }

    fn queue_frame(&self, handle: SdkHandle, frame: RawFrame) -> Result<(), QueueRejected> {
        let mut inner = self.shared.lock();
        let required = match inner.device_of(handle) {
            Ok(device) => device.total_bytes_per_frame() as usize,
            Err(status) => return Err(QueueRejected { status, frame }),
        };
        let status = match inner.handle_mut(handle) {
            Err(status) => Some(status),
            Ok(state) if !state.capturing => Some(SdkError::BadSequence),
            Ok(state) if state.queued.len() >= MAX_QUEUED_FRAMES => Some(SdkError::QueueFull),
            Ok(_) if frame.buffer.len() < required => Some(SdkError::BufferTooSmall),
            Ok(_) => None,
        };
        if let Some(status) = status {
            return Err(QueueRejected { status, frame });
        }
        if let Ok(state) = inner.handle_mut(handle) {
            state.queued.push_back(frame);
        }
        drop(inner);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn wait_for_frame_done(&self, handle: SdkHandle) -> SdkResult<RawFrame> {
        let mut inner = self.shared.lock();
        loop {
            let state = inner.handle_mut(handle)?;
            if let Some(frame) = state.done.pop_front() {
                return Ok(frame);
            }
            if state.queued.is_empty() {
                return Err(SdkError::BadSequence);
            }
            inner = self
                .shared
                .changed
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn queue_clear(&self, handle: SdkHandle) -> SdkResult<()> {
        {
            let mut inner = self.shared.lock();
            inner.handle_mut(handle)?.cancel_queued(SdkError::Cancelled);
        }
        self.shared.changed.notify_all();
        Ok(())
    }

    fn command_run(&self, handle: SdkHandle, command: &str) -> SdkResult<()> {
        let (stopped, interval) = {
            let mut inner = self.shared.lock();
            let interval = inner.frame_interval;
            let device = inner.device_of(handle)?;
            match device.attrs.get(command) {
                Some(attr) if attr.info.kind == AttrKind::Command => {}
                Some(_) => return Err(SdkError::WrongType),
                None => return Err(SdkError::NotFound),
            }
            let state = inner.handle_mut(handle)?;
            match command {
                "AcquisitionStart" => {
                    state.acquiring = true;
                    (None, if state.generator.is_none() { interval } else { None })
                }
                "AcquisitionStop" => {
                    state.acquiring = false;
                    (state.generator.take(), None)
                }
                _ => (None, None),
            }
        };

        stop_generators(stopped.into_iter().collect());
        if let Some(interval) = interval {
            let generator = self.start_generator(handle, interval);
            let mut inner = self.shared.lock();
            match inner.handles.get_mut(&handle) {
                Some(state) => state.generator = Some(generator),
                None => {
                    drop(inner);
                    stop_generators(vec![generator]);
                }
            }
        }
        Ok(())
    }

    fn link_callback_register(&self, event: LinkEvent, callback: LinkCallback) -> SdkResult<()> {
        let mut callbacks = self
            .shared
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if callbacks.contains_key(&event) {
            return Err(SdkError::Forbidden);
        }
        callbacks.insert(event, callback);
        Ok(())
    }

    fn link_callback_unregister(&self, event: LinkEvent) -> SdkResult<()> {
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&event)
            .map(|_| ())
            .ok_or(SdkError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sdk() -> SimulatedSdk {
        let sdk = SimulatedSdk::new().with_device(SimulatedDevice::new(7, 640, 480));
        sdk.initialize().unwrap();
        sdk
    }

    #[test]
    fn test_open_is_exclusive() {
        let sdk = sdk();
        let handle = sdk.open(7).unwrap();
        assert_eq!(sdk.open(7), Err(SdkError::AccessDenied));
        sdk.close(handle).unwrap();
        assert!(sdk.open(7).is_ok());
        assert_eq!(sdk.open(99), Err(SdkError::NotFound));
    }

    #[test]
    fn test_total_bytes_follows_pixel_format() {
        let sdk = sdk();
        let handle = sdk.open(7).unwrap();
        assert_eq!(sdk.attr_u32(handle, "TotalBytesPerFrame").unwrap(), 640 * 480);
        sdk.set_attr_enum(handle, "PixelFormat", "Mono12Packed").unwrap();
        assert_eq!(sdk.attr_u32(handle, "TotalBytesPerFrame").unwrap(), 640 * 480 * 3 / 2);
        sdk.set_attr_enum(handle, "PixelFormat", "Rgb24").unwrap();
        assert_eq!(sdk.attr_u32(handle, "TotalBytesPerFrame").unwrap(), 640 * 480 * 3);
    }

    #[test]
    fn test_attribute_access_rules() {
        let sdk = sdk();
        let handle = sdk.open(7).unwrap();
        assert_eq!(sdk.set_attr_u32(handle, "SensorWidth", 10), Err(SdkError::Forbidden));
        assert_eq!(sdk.set_attr_u32(handle, "Width", 641), Err(SdkError::OutOfRange));
        assert_eq!(sdk.set_attr_enum(handle, "PixelFormat", "Mono10"), Err(SdkError::OutOfRange));
        assert_eq!(sdk.attr_enum(handle, "Width"), Err(SdkError::WrongType));
        assert_eq!(sdk.attr_get(handle, "NoSuchThing"), Err(SdkError::NotFound));
        assert!(matches!(
            sdk.attr_range(handle, "Width"),
            Ok(AttrRange::Uint32 { min: 1, max: 640 })
        ));
    }

    #[test]
    fn test_queue_clear_cancels_pending_frames() {
        let sdk = sdk();
        let handle = sdk.open(7).unwrap();
        sdk.capture_start(handle).unwrap();
        sdk.queue_frame(handle, RawFrame::with_size(640 * 480)).unwrap();
        sdk.queue_clear(handle).unwrap();
        let frame = sdk.wait_for_frame_done(handle).unwrap();
        assert_eq!(frame.status, Err(SdkError::Cancelled));
        assert_eq!(sdk.wait_for_frame_done(handle).unwrap_err(), SdkError::BadSequence);
    }

    #[test]
    fn test_queue_rejects_small_buffer_and_returns_it() {
        let sdk = sdk();
        let handle = sdk.open(7).unwrap();
        sdk.capture_start(handle).unwrap();
        let rejected = sdk.queue_frame(handle, RawFrame::with_size(16)).unwrap_err();
        assert_eq!(rejected.status, SdkError::BufferTooSmall);
        assert_eq!(rejected.frame.buffer.len(), 16);
    }

    #[test]
    fn test_deliver_frame_wakes_waiter() {
        let sdk = sdk();
        let handle = sdk.open(7).unwrap();
        sdk.capture_start(handle).unwrap();
        sdk.queue_frame(handle, RawFrame::with_size(640 * 480)).unwrap();

        let waiter = {
            let sdk = sdk.clone();
            thread::spawn(move || sdk.wait_for_frame_done(handle))
        };
        assert!(sdk.deliver_frame(7, &[42u8; 640 * 480]));
        let frame = waiter.join().unwrap().unwrap();
        assert_eq!(frame.status, Ok(()));
        assert_eq!(frame.buffer[0], 42);
        assert_eq!(frame.frame_count, 1);
        assert_eq!((frame.width, frame.height), (640, 480));
    }

    #[test]
    fn test_single_registration_per_event() {
        let sdk = sdk();
        let noop: LinkCallback = Arc::new(|_: LinkEvent, _: DeviceId| {});
        sdk.link_callback_register(LinkEvent::Add, noop.clone()).unwrap();
        assert_eq!(
            sdk.link_callback_register(LinkEvent::Add, noop.clone()),
            Err(SdkError::Forbidden)
        );
        sdk.link_callback_unregister(LinkEvent::Add).unwrap();
        assert!(sdk.link_callback_register(LinkEvent::Add, noop).is_ok());
    }

    #[test]
    fn test_unplug_fires_remove_and_fails_queued_frames() {
        let sdk = sdk();
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = removed.clone();
        sdk.link_callback_register(
            LinkEvent::Remove,
            Arc::new(move |_: LinkEvent, id: DeviceId| {
                assert_eq!(id, 7);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        let handle = sdk.open(7).unwrap();
        sdk.capture_start(handle).unwrap();
        sdk.queue_frame(handle, RawFrame::with_size(640 * 480)).unwrap();
        assert!(sdk.unplug(7));
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(sdk.camera_count(), 0);
        let frame = sdk.wait_for_frame_done(handle).unwrap();
        assert_eq!(frame.status, Err(SdkError::Unplugged));
        assert_eq!(sdk.attr_u32(handle, "Width"), Err(SdkError::Unplugged));
    }

    #[test]
    fn test_generator_produces_frames_while_acquiring() {
        let sdk = SimulatedSdk::new()
            .with_device(SimulatedDevice::new(3, 32, 16).with_pixel_format("Rgb24"))
            .with_frame_interval(Duration::from_millis(2));
        sdk.initialize().unwrap();
        let handle = sdk.open(3).unwrap();
        sdk.capture_start(handle).unwrap();
        sdk.queue_frame(handle, RawFrame::with_size(32 * 16 * 3)).unwrap();
        sdk.command_run(handle, "AcquisitionStart").unwrap();
        let frame = sdk.wait_for_frame_done(handle).unwrap();
        assert_eq!(frame.status, Ok(()));
        sdk.command_run(handle, "AcquisitionStop").unwrap();
        assert!(!sdk.is_acquiring(3));
        sdk.close(handle).unwrap();
    }

    #[test]
    fn test_mono12_pattern_length() {
        let data = test_pattern("Mono12Packed", 4, 2, 0);
        assert_eq!(data.len(), 12);
    }
}
