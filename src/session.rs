use crate::assembler::PacketAssembler;
use crate::endpoints::{select_endpoints, EndpointSelection};
use crate::filter::{mounting_rotation_x_deg, OrientationFilter};
use crate::protocol::{
    build_command_packet, classify_packet, parse_device_info, CMD_ACQUIRE_DEVICE_INFO,
    CMD_CLOSE_IMU, CMD_OPEN_IMU, CMD_SWITCH_TO_2D, CMD_SWITCH_TO_3D,
};
use crate::transport::{DeviceHost, DeviceId, Transport};
use crate::types::{DeviceEvent, DeviceInfo, DisplayMode, Packet, SessionState, SessionUpdate};
use crate::usb::UsbHost;
use crate::{RayNeoError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Timeouts and deadlines for the session state machine.
///
/// Defaults match the device's observed behavior; tests shrink them to keep
/// the suite fast.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for the acquire-device-info response.
    pub info_timeout: Duration,
    /// Deadline for the open-IMU acknowledgment.
    pub ack_timeout: Duration,
    /// Warm-up window in which sensor packets only feed the filter.
    pub warmup_deadline: Duration,
    /// Delay from streaming start until the first orientation is surfaced.
    pub warmup_delay: Duration,
    /// Per-call wait for a packet during the handshake and warm-up.
    pub handshake_poll: Duration,
    /// Per-call wait for a packet while streaming.
    pub stream_poll: Duration,
    /// Blocking USB read timeout.
    pub usb_read_timeout: Duration,
    /// USB write timeout for commands.
    pub usb_write_timeout: Duration,
    /// Sleep between empty reads.
    pub idle_sleep: Duration,
    /// Wait on the event channel while idle.
    pub event_poll: Duration,
    /// Bound on waiting for the I/O thread during stop().
    pub join_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            info_timeout: Duration::from_millis(2500),
            ack_timeout: Duration::from_millis(1500),
            warmup_deadline: Duration::from_millis(4000),
            warmup_delay: Duration::from_millis(2000),
            handshake_poll: Duration::from_millis(200),
            stream_poll: Duration::from_millis(250),
            usb_read_timeout: Duration::from_millis(50),
            usb_write_timeout: Duration::from_millis(1000),
            idle_sleep: Duration::from_millis(5),
            event_poll: Duration::from_millis(100),
            join_wait: Duration::from_millis(600),
        }
    }
}

/// A RayNeo device session.
///
/// Owns the USB connection and a dedicated I/O thread that runs the
/// handshake and the continuous read loop. Status messages and fused
/// orientation quaternions arrive on the update channel returned by
/// [`new`](Self::new); the latest quaternion is also readable at any time
/// via [`orientation`](Self::orientation).
///
/// `start()` and `stop()` are idempotent. Every failure is reported as a
/// status message and leaves the session idle; calling `start()` again
/// retries from scratch.
pub struct Session {
    started: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    orientation: Arc<Mutex<[f32; 4]>>,
    host: Arc<Mutex<Box<dyn DeviceHost>>>,
    config: SessionConfig,
    updates_tx: Sender<SessionUpdate>,
    events_tx: Sender<DeviceEvent>,
    events_rx: Receiver<DeviceEvent>,
    control_tx: Sender<DisplayMode>,
    control_rx: Receiver<DisplayMode>,
    io_thread: Option<JoinHandle<()>>,
}

impl Session {
    /// Create a session over an injected device host.
    pub fn new(
        host: Box<dyn DeviceHost>,
        config: SessionConfig,
    ) -> (Session, Receiver<SessionUpdate>) {
        let (updates_tx, updates_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let session = Session {
            started: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            orientation: Arc::new(Mutex::new([1.0, 0.0, 0.0, 0.0])),
            host: Arc::new(Mutex::new(host)),
            config,
            updates_tx,
            events_tx,
            events_rx,
            control_tx,
            control_rx,
            io_thread: None,
        };
        (session, updates_rx)
    }

    /// Create a session over the real rusb host.
    pub fn with_usb(config: SessionConfig) -> (Session, Receiver<SessionUpdate>) {
        Self::new(Box::new(UsbHost::new()), config)
    }

    /// Start the session. A no-op if already started.
    pub fn start(&mut self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        // Events queued between sessions are stale.
        while self.events_rx.try_recv().is_ok() {}
        while self.control_rx.try_recv().is_ok() {}

        let io = IoContext {
            started: self.started.clone(),
            running: self.running.clone(),
            state: self.state.clone(),
            orientation: self.orientation.clone(),
            host: self.host.clone(),
            config: self.config.clone(),
            updates_tx: self.updates_tx.clone(),
            events_rx: self.events_rx.clone(),
            control_rx: self.control_rx.clone(),
        };
        match std::thread::Builder::new()
            .name("rayneo-usb".into())
            .spawn(move || io.run())
        {
            Ok(handle) => self.io_thread = Some(handle),
            Err(e) => {
                log::error!("Failed to spawn I/O thread: {}", e);
                self.started.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Stop the session. A no-op if already stopped.
    ///
    /// Flips the running flag, then waits a bounded time for the I/O thread.
    /// A stuck thread is never force-killed; it is left to finish its own
    /// cleanup while the caller proceeds.
    pub fn stop(&mut self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.io_thread.take() {
            let deadline = Instant::now() + self.config.join_wait;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!("I/O thread did not exit within {:?}", self.config.join_wait);
            }
        }
    }

    /// Inject a platform device-lifecycle event.
    pub fn deliver(&self, event: DeviceEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Latest fused orientation as [w, x, y, z]. Identity until streaming.
    pub fn orientation(&self) -> [f32; 4] {
        match self.orientation.lock() {
            Ok(q) => *q,
            Err(_) => [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(s) => *s,
            Err(_) => SessionState::Idle,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a 2D/3D display switch, sent best-effort while streaming.
    ///
    /// The protocol defines these commands but no condition under which the
    /// device requires them; when to switch is the caller's call.
    pub fn set_display_mode(&self, mode: DisplayMode) {
        let _ = self.control_tx.send(mode);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the I/O thread owns or shares. All blocking USB work and all
/// state transitions happen here.
struct IoContext {
    started: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
    orientation: Arc<Mutex<[f32; 4]>>,
    host: Arc<Mutex<Box<dyn DeviceHost>>>,
    config: SessionConfig,
    updates_tx: Sender<SessionUpdate>,
    events_rx: Receiver<DeviceEvent>,
    control_rx: Receiver<DisplayMode>,
}

/// Connection-scoped I/O state: transport, chosen endpoints, reassembly
/// buffer, and the read scratch buffer.
struct LinkIo {
    transport: Box<dyn Transport>,
    selection: EndpointSelection,
    assembler: PacketAssembler,
    read_buf: Vec<u8>,
}

impl IoContext {
    fn run(self) {
        log::debug!("I/O thread started");
        self.set_state(SessionState::Idle);

        let found = self.with_host(|h| h.find_device());
        match found {
            Some(device) => self.permission_or_open(device),
            None => self.post_status("RayNeo not found (VID 0x1bbb / PID 0xaf50)"),
        }

        while self.started.load(Ordering::SeqCst) {
            match self.events_rx.recv_timeout(self.config.event_poll) {
                Ok(event) => self.handle_event(event),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        self.set_state(SessionState::Idle);
        log::debug!("I/O thread exiting");
    }

    fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::PermissionGranted => {
                if !self.running.load(Ordering::SeqCst) {
                    match self.with_host(|h| h.find_device()) {
                        Some(device) => self.open_and_stream(device),
                        None => self.post_status("RayNeo not found after permission grant"),
                    }
                }
            }
            DeviceEvent::PermissionDenied => {
                self.post_status("USB permission denied");
                self.set_state(SessionState::Idle);
            }
            DeviceEvent::Attached => {
                if !self.running.load(Ordering::SeqCst) {
                    if let Some(device) = self.with_host(|h| h.find_device()) {
                        self.permission_or_open(device);
                    }
                }
            }
            // Detach only matters while streaming; the stream loop handles it.
            DeviceEvent::Detached { .. } => {}
        }
    }

    fn permission_or_open(&self, device: DeviceId) {
        let granted = self.with_host(|h| h.has_permission(device));
        if !granted {
            self.set_state(SessionState::AwaitingPermission);
            self.post_status("Requesting USB permission...");
            self.with_host(|h| h.request_permission(device));
            return;
        }
        self.open_and_stream(device);
    }

    /// Open, select endpoints, claim, then hand off to the handshake and
    /// stream loop. Any failure is a status message and a return to idle;
    /// teardown always runs once the interface is claimed.
    fn open_and_stream(&self, device: DeviceId) {
        self.set_state(SessionState::Opening);

        let transport = match self.with_host(|h| h.open(device)) {
            Ok(t) => t,
            Err(e) => {
                self.post_status(&format!("Failed to open USB device: {}", e));
                self.set_state(SessionState::Idle);
                return;
            }
        };

        let mut io = match self.prepare_link(transport) {
            Ok(io) => io,
            Err(_) => {
                self.set_state(SessionState::Idle);
                return;
            }
        };

        // stop() may have landed while the open was in flight; it must win,
        // or the flag flip below would resurrect a session nobody owns.
        if !self.started.load(Ordering::SeqCst) {
            io.transport.release_interface(io.selection.interface_number);
            self.set_state(SessionState::Idle);
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        self.stream_session(&mut io, device);

        self.set_state(SessionState::Stopping);
        self.best_effort_send(&mut io, CMD_CLOSE_IMU, 0);
        io.transport.release_interface(io.selection.interface_number);
        drop(io);
        self.running.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Idle);
    }

    fn prepare_link(&self, mut transport: Box<dyn Transport>) -> Result<LinkIo> {
        let interfaces = match transport.interfaces() {
            Ok(list) => list,
            Err(e) => {
                self.post_status(&format!("Failed to read USB descriptors: {}", e));
                return Err(e);
            }
        };

        let selection = match select_endpoints(&interfaces) {
            Some(s) => s,
            None => {
                self.post_status("Could not find IN/OUT endpoints");
                return Err(RayNeoError::EndpointsNotFound);
            }
        };
        log::info!(
            "Selected interface {} (IN 0x{:02x}, OUT 0x{:02x})",
            selection.interface_number,
            selection.ep_in.address,
            selection.ep_out.address
        );

        if let Err(e) = transport.claim_interface(selection.interface_number) {
            self.post_status(&format!("Failed to claim USB interface: {}", e));
            return Err(e);
        }

        let read_buf = vec![0u8; (selection.ep_in.max_packet_size as usize).max(64)];
        Ok(LinkIo {
            transport,
            selection,
            assembler: PacketAssembler::new(),
            read_buf,
        })
    }

    fn stream_session(&self, io: &mut LinkIo, device: DeviceId) {
        self.set_state(SessionState::Handshaking);
        self.post_status("Initializing protocol...");

        let info = match self.initialize_protocol(io) {
            Ok(info) => info,
            Err(e) => {
                self.post_status(&format!("Initialization failed: {}", e));
                return;
            }
        };

        let rot_x = mounting_rotation_x_deg(info.board_id);
        self.post_status(&format!(
            "Streaming board=0x{:02X}, imuRotX={:+.1} deg",
            info.board_id, rot_x
        ));

        let mut filter = OrientationFilter::new(info.board_id);
        self.set_state(SessionState::Streaming);

        let first_orientation_at = Instant::now() + self.config.warmup_delay;
        if !self.acquire_initial_pose(io, device, &mut filter, first_orientation_at) {
            if self.active() {
                self.post_status("No initial IMU sample");
            }
            return;
        }

        while self.active() {
            self.drain_events(device);
            self.drain_control(io);
            if !self.active() {
                break;
            }

            let Some(packet) = self.read_packet(io, self.config.stream_poll) else {
                continue;
            };
            if let Packet::Sensor(sample) = packet {
                filter.update(&sample);
                self.post_orientation(filter.quaternion_wxyz());
            }
        }
    }

    /// Handshake: acquire device info, then open the IMU, each under a
    /// bounded deadline.
    fn initialize_protocol(&self, io: &mut LinkIo) -> Result<DeviceInfo> {
        self.send_command(io, CMD_ACQUIRE_DEVICE_INFO, 0)?;
        let info = self
            .wait_for_device_info(io)
            .ok_or(RayNeoError::HandshakeTimeout("device info"))?;

        if info.side_by_side_enabled {
            self.post_status("Device reports side-by-side mode enabled");
        }

        self.send_command(io, CMD_OPEN_IMU, 0)?;
        if !self.wait_for_ack(io, CMD_OPEN_IMU) {
            return Err(RayNeoError::HandshakeTimeout("open-IMU ack"));
        }

        Ok(info)
    }

    fn wait_for_device_info(&self, io: &mut LinkIo) -> Option<DeviceInfo> {
        let deadline = Instant::now() + self.config.info_timeout;
        while self.active() && Instant::now() < deadline {
            let Some(packet) = self.read_packet(io, self.config.handshake_poll) else {
                continue;
            };
            if let Packet::Response { cmd, raw } = packet {
                if cmd == CMD_ACQUIRE_DEVICE_INFO {
                    if let Some(info) = parse_device_info(&raw) {
                        return Some(info);
                    }
                }
            }
        }
        None
    }

    fn wait_for_ack(&self, io: &mut LinkIo, expected_cmd: u8) -> bool {
        let deadline = Instant::now() + self.config.ack_timeout;
        while self.active() && Instant::now() < deadline {
            let Some(packet) = self.read_packet(io, self.config.handshake_poll) else {
                continue;
            };
            if let Packet::Response { cmd, .. } = packet {
                if cmd == expected_cmd {
                    return true;
                }
            }
        }
        false
    }

    /// Warm-up: feed the filter for up to the warm-up window, surfacing the
    /// first orientation only once the warm-up delay has elapsed.
    fn acquire_initial_pose(
        &self,
        io: &mut LinkIo,
        device: DeviceId,
        filter: &mut OrientationFilter,
        first_orientation_at: Instant,
    ) -> bool {
        self.post_status("Waiting for IMU warmup...");
        let deadline = Instant::now() + self.config.warmup_deadline;
        while self.active() && Instant::now() < deadline {
            self.drain_events(device);
            let Some(packet) = self.read_packet(io, self.config.handshake_poll) else {
                continue;
            };
            if let Packet::Sensor(sample) = packet {
                filter.update(&sample);
                if Instant::now() >= first_orientation_at {
                    self.post_orientation(filter.quaternion_wxyz());
                    return true;
                }
            }
        }
        false
    }

    /// Drain buffered frames, then read more bytes, until a packet or the
    /// deadline. Malformed frames classify as Unknown and are dropped by the
    /// caller; a vanished device flips the running flag.
    fn read_packet(&self, io: &mut LinkIo, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        while self.active() && Instant::now() < deadline {
            if let Some(frame) = io.assembler.next_packet() {
                return Some(classify_packet(&frame));
            }

            let ep_in = io.selection.ep_in;
            match io
                .transport
                .read(&ep_in, &mut io.read_buf, self.config.usb_read_timeout)
            {
                Ok(0) => std::thread::sleep(self.config.idle_sleep),
                Ok(n) => io.assembler.append(&io.read_buf[..n]),
                Err(RayNeoError::Disconnected) => {
                    self.post_status("RayNeo disconnected");
                    self.running.store(false, Ordering::SeqCst);
                    return None;
                }
                Err(e) => {
                    log::warn!("USB read error: {}", e);
                    std::thread::sleep(self.config.idle_sleep);
                }
            }
        }
        None
    }

    fn send_command(&self, io: &mut LinkIo, cmd: u8, arg: u8) -> Result<()> {
        let packet =
            build_command_packet(cmd, arg, io.selection.ep_out.max_packet_size as usize);
        let ep_out = io.selection.ep_out;
        let wrote = io
            .transport
            .write(&ep_out, &packet, self.config.usb_write_timeout)?;
        if wrote != packet.len() {
            log::warn!("Short command write: {} of {} bytes", wrote, packet.len());
            return Err(RayNeoError::Disconnected);
        }
        Ok(())
    }

    fn best_effort_send(&self, io: &mut LinkIo, cmd: u8, arg: u8) {
        if let Err(e) = self.send_command(io, cmd, arg) {
            log::debug!("Best-effort command 0x{:02x} failed: {}", cmd, e);
        }
    }

    /// React to detach events for the currently open device.
    fn drain_events(&self, device: DeviceId) {
        while let Ok(event) = self.events_rx.try_recv() {
            if let DeviceEvent::Detached { device_id } = event {
                if device_id == device {
                    self.post_status("RayNeo disconnected");
                    self.running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// Send any queued display-mode switches, best-effort.
    fn drain_control(&self, io: &mut LinkIo) {
        while let Ok(mode) = self.control_rx.try_recv() {
            let cmd = match mode {
                DisplayMode::ThreeD => CMD_SWITCH_TO_3D,
                DisplayMode::TwoD => CMD_SWITCH_TO_2D,
            };
            self.best_effort_send(io, cmd, 0);
            self.post_status(&format!("Requested display mode {:?}", mode));
        }
    }

    /// The streaming loops run only while both flags hold. Checking `started`
    /// too closes the window where `running` is set after stop() cleared it.
    fn active(&self) -> bool {
        self.started.load(Ordering::SeqCst) && self.running.load(Ordering::SeqCst)
    }

    fn with_host<R>(&self, f: impl FnOnce(&mut dyn DeviceHost) -> R) -> R {
        let mut host = match self.host.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(host.as_mut())
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                log::debug!("session state {:?} -> {:?}", *state, next);
                *state = next;
            }
        }
    }

    fn post_status(&self, message: &str) {
        log::info!("{}", message);
        let _ = self.updates_tx.send(SessionUpdate::Status(message.to_string()));
    }

    fn post_orientation(&self, wxyz: [f32; 4]) {
        if let Ok(mut shared) = self.orientation.lock() {
            *shared = wxyz;
        }
        let _ = self.updates_tx.send(SessionUpdate::Orientation(wxyz));
    }
}
