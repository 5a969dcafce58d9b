//! One opened camera and the thread that streams from it.

use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::attributes::{bind_attributes, AttributeBinding};
use super::config::CaptureConfig;
use super::hotplug::{HotplugMonitor, HotplugTarget};
use super::registry::DeviceRef;
use crate::error::{CaptureError, ErrorKind, SdkResultExt};
use crate::frame::{
    Channel16uRef, Channel8uRef, ConvertedFrame, FramePools, FrameProcessor, PixelFormat, Roi,
    Surface8uRef,
};
use crate::sdk::{AttrValue, CameraSdk, DeviceId, QueueRejected, RawFrame, SdkError, SdkHandle};

/// Pause before retrying after the SDK refused a frame or a wait failed.
const REQUEUE_PAUSE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Closed,
    Opened,
    Streaming,
    /// The camera was unplugged; it is reopened when it comes back.
    Disconnected,
}

/// State guarded by the session mutex.
struct Inner {
    state: SessionState,
    handle: Option<SdkHandle>,
    sensor_size: (u32, u32),
    roi: Roi,
    pools: Option<FramePools>,
    pixel_format: PixelFormat,
    has_new_frame: bool,
    channel8u: Option<Channel8uRef>,
    channel16u: Option<Channel16uRef>,
    surface8u: Option<Surface8uRef>,
}

struct Shared {
    inner: Mutex<Inner>,
    quit: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, frame: ConvertedFrame) {
        let mut inner = self.lock();
        match frame {
            ConvertedFrame::Channel8u(channel) => inner.channel8u = Some(Arc::new(channel)),
            ConvertedFrame::Channel16u(channel) => inner.channel16u = Some(Arc::new(channel)),
            ConvertedFrame::Surface8u(surface) => inner.surface8u = Some(Arc::new(surface)),
        }
        inner.has_new_frame = true;
    }
}

/// A capture session bound to one camera.
///
/// Lifecycle: `Closed -> Opened -> Streaming -> Opened -> Closed`, with
/// `Disconnected` entered from `Opened` or `Streaming` when the camera is
/// unplugged. All methods take `&self`; the session is shared as
/// `Arc<CaptureSession>` between the owner and the hot-plug thread.
pub struct CaptureSession {
    sdk: Arc<dyn CameraSdk>,
    device: DeviceRef,
    config: CaptureConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    hotplug: Option<(Arc<HotplugMonitor>, Weak<dyn HotplugTarget>)>,
}

impl CaptureSession {
    /// Creates a closed session for `device`.
    ///
    /// With a monitor, the session follows the camera's link events.
    pub fn new(
        sdk: Arc<dyn CameraSdk>,
        device: DeviceRef,
        config: CaptureConfig,
        hotplug: Option<Arc<HotplugMonitor>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<CaptureSession>| {
            let hotplug = hotplug.map(|monitor| {
                let target: Weak<dyn HotplugTarget> = weak.clone();
                monitor.register(device.id, target.clone());
                (monitor, target)
            });
            Self {
                sdk,
                device,
                config,
                shared: Arc::new(Shared {
                    inner: Mutex::new(Inner {
                        state: SessionState::Closed,
                        handle: None,
                        sensor_size: (0, 0),
                        roi: Roi::default(),
                        pools: None,
                        pixel_format: PixelFormat::NotSupported,
                        has_new_frame: false,
                        channel8u: None,
                        channel16u: None,
                        surface8u: None,
                    }),
                    quit: AtomicBool::new(false),
                }),
                worker: Mutex::new(None),
                hotplug,
            }
        })
    }

    /// Acquires the camera and sets the capture region to the full sensor.
    ///
    /// Does nothing if the camera is already open.
    pub fn open(&self) -> Result<(), CaptureError> {
        let mut inner = self.shared.lock();
        if inner.handle.is_some() {
            return Ok(());
        }

        let id = self.device.id;
        let handle = self
            .sdk
            .open(id)
            .raise(ErrorKind::Handle, &format!("open camera {}", id))?;

        let (width, height) = match self.configure(handle) {
            Ok(size) => size,
            Err(e) => {
                self.sdk.close(handle).check("close camera after failed setup");
                return Err(e);
            }
        };

        match &inner.pools {
            Some(pools) => pools.resize(width, height),
            None => inner.pools = Some(FramePools::new(width, height, self.config.pool_capacity)),
        }
        inner.handle = Some(handle);
        inner.sensor_size = (width, height);
        inner.roi = Roi::full_sensor(width, height);
        inner.state = SessionState::Opened;
        info!(
            "Opened camera {} ({}) as {}, sensor {}x{}",
            id, self.device.camera_name, handle, width, height
        );
        Ok(())
    }

    fn configure(&self, handle: SdkHandle) -> Result<(u32, u32), CaptureError> {
        self.sdk
            .adjust_packet_size(handle, self.config.packet_size)
            .check("adjust packet size");

        let width = self
            .sdk
            .attr_u32(handle, "SensorWidth")
            .raise(ErrorKind::Handle, "read SensorWidth")?;
        let height = self
            .sdk
            .attr_u32(handle, "SensorHeight")
            .raise(ErrorKind::Handle, "read SensorHeight")?;

        for (name, value) in [("Width", width), ("Height", height), ("RegionX", 0), ("RegionY", 0)] {
            self.sdk
                .set_attr_u32(handle, name, value)
                .raise(ErrorKind::Handle, &format!("set {}", name))?;
        }
        Ok((width, height))
    }

    /// Starts streaming, restarting the acquisition thread if it is running.
    ///
    /// The pixel format is read from the camera each time. Frames in a format
    /// without a conversion path are dropped.
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut worker = self.lock_worker();
        self.stop_worker(&mut worker);

        let mut inner = self.shared.lock();
        let handle = inner.handle.ok_or_else(|| {
            CaptureError::handle(format!("start camera {}", self.device.id), SdkError::BadHandle)
        })?;
        let pools = match &inner.pools {
            Some(pools) => pools.clone(),
            None => return Err(CaptureError::handle("start without buffer pools", SdkError::BadSequence)),
        };

        self.apply_preferred_pixel_format(handle);

        let frame_size = self
            .sdk
            .attr_u32(handle, "TotalBytesPerFrame")
            .raise(ErrorKind::Stream, "read TotalBytesPerFrame")?;
        let format_name = self
            .sdk
            .attr_enum(handle, "PixelFormat")
            .check("read PixelFormat")
            .unwrap_or_default();
        let pixel_format = PixelFormat::from_sdk_name(&format_name);
        if !pixel_format.is_supported() {
            warn!(
                "{}, frames of camera {} will be dropped",
                CaptureError::unsupported_format(format_name),
                self.device.id
            );
        }

        let acquisition = Acquisition {
            sdk: Arc::clone(&self.sdk),
            shared: Arc::clone(&self.shared),
            handle,
            pools,
            pixel_format,
            frame_size: frame_size as usize,
        };
        self.shared.quit.store(false, Ordering::SeqCst);
        let thread = thread::Builder::new()
            .name(format!("acquisition-{}", self.device.id))
            .spawn(move || acquisition.run())
            .map_err(|e| {
                error!("Failed to spawn acquisition thread: {}", e);
                CaptureError::stream("spawn acquisition thread", SdkError::Resources)
            })?;

        inner.pixel_format = pixel_format;
        inner.has_new_frame = false;
        inner.state = SessionState::Streaming;
        *worker = Some(thread);
        info!(
            "Camera {} streaming {} frames of {} bytes",
            self.device.id, pixel_format, frame_size
        );
        Ok(())
    }

    fn apply_preferred_pixel_format(&self, handle: SdkHandle) {
        for format in &self.config.preferred_pixel_formats {
            match self.sdk.set_attr_enum(handle, "PixelFormat", format) {
                Ok(()) => {
                    debug!("Pixel format set to {}", format);
                    return;
                }
                Err(e) => debug!("Pixel format {} rejected: {}", format, e),
            }
        }
        if !self.config.preferred_pixel_formats.is_empty() {
            warn!("No preferred pixel format accepted, keeping the camera's current one");
        }
    }

    /// Stops the acquisition thread. Does nothing when not streaming.
    pub fn stop(&self) {
        let mut worker = self.lock_worker();
        self.stop_worker(&mut worker);
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The session mutex is never held while joining; the thread needs it to publish.
    fn stop_worker(&self, worker: &mut Option<JoinHandle<()>>) {
        let Some(thread) = worker.take() else {
            return;
        };
        self.shared.quit.store(true, Ordering::SeqCst);

        let handle = self.shared.lock().handle;
        if let Some(handle) = handle {
            self.sdk.queue_clear(handle).check("clear capture queue");
        }
        if thread.join().is_err() {
            error!("Acquisition thread of camera {} panicked", self.device.id);
        }

        let mut inner = self.shared.lock();
        if inner.state == SessionState::Streaming {
            inner.state = SessionState::Opened;
        }
        info!("Camera {} stopped streaming", self.device.id);
    }

    /// Stops streaming and releases the camera. Safe to call when closed.
    pub fn close(&self) -> Result<(), CaptureError> {
        self.stop();
        let mut inner = self.shared.lock();
        let result = match inner.handle.take() {
            Some(handle) => {
                info!("Closing camera {}", self.device.id);
                self.sdk.close(handle).raise(ErrorKind::Handle, "close camera")
            }
            None => Ok(()),
        };
        inner.state = SessionState::Closed;
        result
    }

    pub fn check_new_frame(&self) -> bool {
        self.shared.lock().has_new_frame
    }

    /// Latest frame as an 8-bit channel, converted if the camera streams another format.
    ///
    /// Clears the new-frame flag. `None` until a frame arrives in the current format.
    pub fn get_channel(&self) -> Option<Channel8uRef> {
        let mut inner = self.shared.lock();
        inner.has_new_frame = false;
        match inner.pixel_format {
            PixelFormat::Mono8 => inner.channel8u.clone(),
            PixelFormat::Mono16 | PixelFormat::Mono12Packed => inner
                .channel16u
                .as_deref()
                .map(|c| Arc::new(FrameProcessor::channel16u_to_channel8u(c))),
            PixelFormat::Rgb24 => inner
                .surface8u
                .as_deref()
                .map(|s| Arc::new(FrameProcessor::surface8u_to_channel8u(s))),
            PixelFormat::NotSupported => None,
        }
    }

    /// Latest frame as a 16-bit channel. Same flag handling as [`Self::get_channel`].
    pub fn get_channel16u(&self) -> Option<Channel16uRef> {
        let mut inner = self.shared.lock();
        inner.has_new_frame = false;
        match inner.pixel_format {
            PixelFormat::Mono8 => inner
                .channel8u
                .as_deref()
                .map(|c| Arc::new(FrameProcessor::channel8u_to_channel16u(c))),
            PixelFormat::Mono16 | PixelFormat::Mono12Packed => inner.channel16u.clone(),
            PixelFormat::Rgb24 => inner
                .surface8u
                .as_deref()
                .map(|s| Arc::new(FrameProcessor::surface8u_to_channel16u(s))),
            PixelFormat::NotSupported => None,
        }
    }

    /// Latest frame as an RGB surface. Same flag handling as [`Self::get_channel`].
    pub fn get_surface(&self) -> Option<Surface8uRef> {
        let mut inner = self.shared.lock();
        inner.has_new_frame = false;
        match inner.pixel_format {
            PixelFormat::Mono8 => inner
                .channel8u
                .as_deref()
                .map(|c| Arc::new(FrameProcessor::channel8u_to_surface8u(c))),
            PixelFormat::Mono16 | PixelFormat::Mono12Packed => inner
                .channel16u
                .as_deref()
                .map(|c| Arc::new(FrameProcessor::channel16u_to_surface8u(c))),
            PixelFormat::Rgb24 => inner.surface8u.clone(),
            PixelFormat::NotSupported => None,
        }
    }

    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().handle.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Raw SDK handle for configuration not modelled here.
    pub fn sdk_handle(&self) -> Option<SdkHandle> {
        self.shared.lock().handle
    }

    /// Format the acquisition thread converts from, as of the last start.
    pub fn pixel_format(&self) -> PixelFormat {
        self.shared.lock().pixel_format
    }

    pub fn sensor_size(&self) -> (u32, u32) {
        self.shared.lock().sensor_size
    }

    pub fn sensor_width(&self) -> u32 {
        self.sensor_size().0
    }

    pub fn sensor_height(&self) -> u32 {
        self.sensor_size().1
    }

    pub fn bounds(&self) -> Roi {
        self.shared.lock().roi
    }

    pub fn size(&self) -> (u32, u32) {
        self.bounds().size()
    }

    pub fn width(&self) -> u32 {
        self.bounds().width
    }

    pub fn height(&self) -> u32 {
        self.bounds().height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.bounds().aspect_ratio()
    }

    /// The session's buffer pools, once the camera has been opened.
    pub fn pools(&self) -> Option<FramePools> {
        self.shared.lock().pools.clone()
    }

    fn open_handle(&self, what: &str) -> Result<SdkHandle, CaptureError> {
        self.sdk_handle()
            .ok_or_else(|| CaptureError::handle(format!("{} on closed camera", what), SdkError::BadHandle))
    }

    /// Reads an unsigned integer attribute.
    pub fn get_attr(&self, name: &str) -> Result<u32, CaptureError> {
        let handle = self.open_handle(name)?;
        self.sdk
            .attr_u32(handle, name)
            .raise(ErrorKind::Stream, &format!("get {}", name))
    }

    /// Writes an unsigned integer attribute.
    pub fn set_attr(&self, name: &str, value: u32) -> Result<(), CaptureError> {
        let handle = self.open_handle(name)?;
        self.sdk
            .set_attr_u32(handle, name, value)
            .raise(ErrorKind::Stream, &format!("set {}", name))
    }

    pub fn attr_value(&self, name: &str) -> Result<AttrValue, CaptureError> {
        let handle = self.open_handle(name)?;
        self.sdk
            .attr_get(handle, name)
            .raise(ErrorKind::Stream, &format!("get {}", name))
    }

    pub fn set_attr_value(&self, name: &str, value: AttrValue) -> Result<(), CaptureError> {
        let handle = self.open_handle(name)?;
        self.sdk
            .attr_set(handle, name, value)
            .raise(ErrorKind::Stream, &format!("set {}", name))
    }

    /// Bindings for every supported attribute of the open camera.
    pub fn attributes(&self) -> Result<Vec<AttributeBinding>, CaptureError> {
        let handle = self.open_handle("list attributes")?;
        bind_attributes(&self.sdk, handle)
    }
}

impl HotplugTarget for CaptureSession {
    fn device_added(&self, id: DeviceId) {
        if id != self.device.id || self.state() != SessionState::Disconnected {
            return;
        }
        match self.open() {
            Ok(()) => info!("Camera {} reconnected", id),
            Err(e) => error!("Failed to reopen camera {}: {}", id, e),
        }
    }

    /// The SDK sends no add event for a handle it still considers open, so
    /// the handle is closed here.
    fn device_removed(&self, id: DeviceId) {
        if id != self.device.id {
            return;
        }
        self.stop();
        let mut inner = self.shared.lock();
        if let Some(handle) = inner.handle.take() {
            self.sdk.close(handle).check("close unplugged camera");
            inner.state = SessionState::Disconnected;
            warn!("Camera {} disconnected", id);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close camera {} on drop: {}", self.device.id, e);
        }
        if let Some((monitor, target)) = &self.hotplug {
            monitor.unregister(self.device.id, target);
        }
    }
}

/// Everything the acquisition thread needs, moved into it on start.
struct Acquisition {
    sdk: Arc<dyn CameraSdk>,
    shared: Arc<Shared>,
    handle: SdkHandle,
    pools: FramePools,
    pixel_format: PixelFormat,
    frame_size: usize,
}

impl Acquisition {
    fn quit(&self) -> bool {
        self.shared.quit.load(Ordering::SeqCst)
    }

    fn run(self) {
        debug!("Acquisition thread started for {}", self.handle);
        let sdk = &self.sdk;
        let handle = self.handle;

        sdk.capture_start(handle).check("start capture");
        sdk.set_attr_enum(handle, "FrameStartTriggerMode", "Freerun")
            .check("set FrameStartTriggerMode");
        sdk.set_attr_enum(handle, "AcquisitionMode", "Continuous")
            .check("set AcquisitionMode");
        sdk.command_run(handle, "AcquisitionStart")
            .check("run AcquisitionStart");

        let mut spare = Some(RawFrame::with_size(self.frame_size));
        while !self.quit() {
            if let Some(frame) = spare.take() {
                if let Err(QueueRejected { status, frame }) = sdk.queue_frame(handle, frame) {
                    error!("{}", CaptureError::stream("queue frame", status));
                    spare = Some(frame);
                    thread::sleep(REQUEUE_PAUSE);
                    continue;
                }
            }
            if self.quit() {
                break;
            }

            match sdk.wait_for_frame_done(handle) {
                Ok(frame) => {
                    self.handle_frame(&frame);
                    spare = Some(frame);
                }
                Err(status) => {
                    error!("{}", CaptureError::stream("wait for frame", status));
                    thread::sleep(REQUEUE_PAUSE);
                }
            }
        }

        sdk.command_run(handle, "AcquisitionStop")
            .check("run AcquisitionStop");
        sdk.capture_end(handle).check("end capture");
        drop(spare);
        debug!("Acquisition thread finished for {}", handle);
    }

    fn handle_frame(&self, frame: &RawFrame) {
        match frame.status {
            Ok(()) => {
                match FrameProcessor::convert(self.pixel_format, &frame.buffer, &self.pools) {
                    Some(converted) => {
                        self.shared.publish(converted);
                        trace!("Published frame {}", frame.frame_count);
                    }
                    None => trace!("Dropped frame {} in {}", frame.frame_count, self.pixel_format),
                }
            }
            Err(SdkError::Cancelled) if self.quit() => {
                debug!("Frame {} cancelled", frame.frame_count)
            }
            Err(status) => error!(
                "{}",
                CaptureError::frame(format!("frame {}", frame.frame_count), status)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::registry::Device;
    use crate::sdk::{SimulatedDevice, SimulatedSdk};
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn device(id: DeviceId) -> DeviceRef {
        Arc::new(Device {
            id,
            camera_name: format!("SimCam {}", id),
            model_name: "GC-SIM".to_string(),
            serial_number: format!("{:08}", id),
            firmware_version: "1.0.0".to_string(),
        })
    }

    fn setup(format: &str) -> (SimulatedSdk, Arc<CaptureSession>) {
        init_logger();
        let sim = SimulatedSdk::new()
            .with_device(SimulatedDevice::new(7, 4, 2).with_pixel_format(format));
        sim.initialize().unwrap();
        let session = CaptureSession::new(
            Arc::new(sim.clone()),
            device(7),
            CaptureConfig::default().with_pool_capacity(2),
            None,
        );
        (sim, session)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn deliver(sim: &SimulatedSdk, session: &CaptureSession, data: &[u8]) {
        assert!(sim.wait_for_queued(7, TIMEOUT));
        assert!(sim.deliver_frame(7, data));
        assert!(wait_until(|| session.check_new_frame()));
    }

    #[test]
    fn test_open_configures_full_sensor() {
        let (sim, session) = setup("Mono8");
        assert_eq!(session.state(), SessionState::Closed);
        session.open().unwrap();
        session.open().unwrap();

        assert_eq!(session.state(), SessionState::Opened);
        assert_eq!(session.sensor_size(), (4, 2));
        assert_eq!(session.bounds(), Roi::full_sensor(4, 2));
        assert_eq!(session.aspect_ratio(), 2.0);
        assert_eq!(sim.device_attr(7, "PacketSize"), Some(AttrValue::Uint32(8228)));
        assert_eq!(session.get_attr("Width").unwrap(), 4);

        let pools = session.pools().unwrap();
        assert_eq!(pools.channel8u.dimensions(), (4, 2));
        assert_eq!(pools.surface8u.capacity(), 2);
    }

    #[test]
    fn test_open_failures() {
        let (sim, session) = setup("Mono8");
        sim.fail_next_open(SdkError::AccessDenied);
        assert_eq!(
            session.open(),
            Err(CaptureError::handle("open camera 7", SdkError::AccessDenied))
        );

        let missing = CaptureSession::new(Arc::new(sim.clone()), device(9), CaptureConfig::default(), None);
        assert!(matches!(missing.open(), Err(CaptureError::DeviceNotFound(_))));
        assert_eq!(missing.state(), SessionState::Closed);
    }

    #[test]
    fn test_start_requires_open_camera() {
        let (_sim, session) = setup("Mono8");
        assert!(session.start().is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_stop_without_stream_is_noop() {
        let (_sim, session) = setup("Mono8");
        session.stop();
        session.open().unwrap();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Opened);
    }

    #[test]
    fn test_mono8_frame_is_published() {
        let (sim, session) = setup("Mono8");
        session.open().unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.pixel_format(), PixelFormat::Mono8);
        assert!(!session.check_new_frame());
        assert_eq!(
            sim.device_attr(7, "FrameStartTriggerMode"),
            Some(AttrValue::Enum("Freerun".to_string()))
        );

        deliver(&sim, &session, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let channel = session.get_channel().unwrap();
        assert!(!session.check_new_frame());
        assert_eq!(channel.dimensions(), (4, 2));
        assert_eq!(channel.as_raw(), &vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(channel.is_pooled());

        let surface = session.get_surface().unwrap();
        assert_eq!(surface.get_pixel(3, 1).0, [8, 8, 8]);
        assert!(session.get_channel16u().is_some());

        session.stop();
        assert_eq!(session.state(), SessionState::Opened);
        assert!(!sim.is_acquiring(7));
    }

    #[test]
    fn test_mono12_packed_frame_is_unpacked() {
        let (sim, session) = setup("Mono12Packed");
        session.open().unwrap();
        session.start().unwrap();

        let raw = [0xAB, 0xCD, 0xEF, 0x00, 0x10, 0x01, 0xFF, 0xFF, 0xFF, 0x12, 0x34, 0x56];
        deliver(&sim, &session, &raw);
        let channel = session.get_channel16u().unwrap();
        assert_eq!(
            channel.as_raw(),
            &vec![0xABC, 0xDEF, 0x001, 0x001, 0xFFF, 0xFFF, 0x123, 0x456]
        );
        assert!(session.get_channel().is_some());
    }

    #[test]
    fn test_rgb24_frame_is_published() {
        let (sim, session) = setup("Rgb24");
        session.open().unwrap();
        session.start().unwrap();

        let raw: Vec<u8> = (0..24).collect();
        deliver(&sim, &session, &raw);
        let surface = session.get_surface().unwrap();
        assert_eq!(surface.get_pixel(1, 0).0, [3, 4, 5]);
        assert_eq!(session.get_channel().unwrap().dimensions(), (4, 2));
    }

    #[test]
    fn test_unsupported_format_drops_frames() {
        let (sim, session) = setup("Bayer8");
        session.open().unwrap();
        session.start().unwrap();
        assert_eq!(session.pixel_format(), PixelFormat::NotSupported);

        assert!(sim.wait_for_queued(7, TIMEOUT));
        assert!(sim.deliver_frame(7, &[0; 8]));
        assert!(sim.wait_for_queued(7, TIMEOUT));
        assert!(!session.check_new_frame());
        assert!(session.get_channel().is_none());
        assert!(session.get_surface().is_none());
    }

    #[test]
    fn test_failed_frame_keeps_streaming() {
        let (sim, session) = setup("Mono8");
        session.open().unwrap();
        session.start().unwrap();

        assert!(sim.wait_for_queued(7, TIMEOUT));
        assert!(sim.deliver_failed_frame(7, SdkError::DataMissing));
        deliver(&sim, &session, &[9; 8]);
        assert_eq!(session.get_channel().unwrap().as_raw(), &vec![9; 8]);
    }

    #[test]
    fn test_preferred_pixel_format_is_applied() {
        init_logger();
        let sim = SimulatedSdk::new().with_device(SimulatedDevice::new(7, 4, 2));
        sim.initialize().unwrap();
        let config = CaptureConfig::default().with_preferred_pixel_formats(["Rgb24", "Mono8"]);
        let session = CaptureSession::new(Arc::new(sim.clone()), device(7), config, None);
        session.open().unwrap();
        session.start().unwrap();
        assert_eq!(session.pixel_format(), PixelFormat::Rgb24);
    }

    #[test]
    fn test_restart_rereads_pixel_format() {
        let (sim, session) = setup("Mono8");
        session.open().unwrap();
        session.start().unwrap();
        session
            .set_attr_value("PixelFormat", AttrValue::Enum("Mono16".to_string()))
            .unwrap();
        session.start().unwrap();
        assert_eq!(session.pixel_format(), PixelFormat::Mono16);

        let raw: Vec<u8> = (0..8u16).flat_map(|v| (v * 256).to_le_bytes()).collect();
        deliver(&sim, &session, &raw);
        assert_eq!(session.get_channel16u().unwrap().get_pixel(1, 0).0, [256]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (sim, session) = setup("Mono8");
        session.open().unwrap();
        session.start().unwrap();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!sim.is_open(7));
        session.close().unwrap();
        assert!(session.get_attr("Width").is_err());
    }

    #[test]
    fn test_unplug_and_replug() {
        let (sim, session) = setup("Mono8");
        session.open().unwrap();
        session.start().unwrap();

        session.device_removed(8);
        assert_eq!(session.state(), SessionState::Streaming);

        sim.unplug(7);
        session.device_removed(7);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!sim.is_open(7));

        sim.plug(7);
        session.device_added(7);
        assert_eq!(session.state(), SessionState::Opened);
        assert!(sim.is_open(7));
    }

    #[test]
    fn test_attributes_require_open_camera() {
        let (_sim, session) = setup("Mono8");
        assert!(session.attributes().is_err());
        session.open().unwrap();
        let bindings = session.attributes().unwrap();
        assert!(bindings.iter().any(|b| b.name() == "ExposureValue"));
    }
}
