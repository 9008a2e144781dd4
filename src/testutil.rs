// src/testutil.rs
//! Mock host toolkit used by the controller and worker tests.
//!
//! Every host callback records into a shared event log (a `Mutex<Vec<..>>`,
//! cloned into each mock) so tests can assert on exact call counts and
//! ordering. The "scene" is a single byte: the UI side writes
//! `scene_value`, sync copies it to the render side, render publishes it to
//! a framebuffer register, and `read_framebuffer` fills the image with it.
//! That is enough to prove a grab reflects the scene state at grab time.

use crate::geometry::{FrameImage, SurfaceFormat, SurfaceSize};
use crate::host::{
    AnimationDriver, ContextError, EventLoopWaker, GpuContext, HostHooks, HostWindow,
    RenderSurface, SceneGraphContext, WindowId,
};
use anyhow::Result;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Everything the mocks record.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    CreateGpuContext,
    DestroyGpuContext,
    MakeCurrentWindow(WindowId),
    MakeCurrentOffscreen(SurfaceSize),
    DoneCurrent,
    SwapBuffers(WindowId),
    ReadFramebuffer(SurfaceSize),
    SgInitialize,
    SgInvalidate,
    Polish(WindowId),
    Sync(WindowId),
    Render(WindowId, SurfaceSize),
    CleanupNodes(WindowId),
    FrameSwapped(WindowId),
}

pub type EventLog = Arc<Mutex<Vec<HostEvent>>>;

pub fn count_events(log: &EventLog, pred: impl Fn(&HostEvent) -> bool) -> usize {
    log.lock().unwrap().iter().filter(|e| pred(e)).count()
}

/// Poll until `pred` holds or the timeout elapses.
pub fn wait_until(timeout: Duration, pred: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    pred()
}

pub struct MockWindow {
    id: WindowId,
    visible: AtomicBool,
    exposed: AtomicBool,
    handle: AtomicBool,
    size: Mutex<SurfaceSize>,
    renderer: AtomicBool,
    pub persistent_sg: AtomicBool,
    pub persistent_gl: AtomicBool,

    /// UI-side scene state, owned by the test.
    pub scene_value: AtomicU8,
    /// Render-side copy, written during sync.
    synced_value: AtomicU8,

    fb_register: Arc<AtomicU8>,
    log: EventLog,
}

impl MockWindow {
    pub fn set_visible(&self, v: bool) {
        self.visible.store(v, Ordering::Release);
    }

    pub fn set_exposed(&self, e: bool) {
        self.exposed.store(e, Ordering::Release);
    }

    pub fn set_size(&self, size: SurfaceSize) {
        *self.size.lock().unwrap() = size;
    }
}

impl RenderSurface for MockWindow {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HostWindow for MockWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    fn is_exposed(&self) -> bool {
        self.exposed.load(Ordering::Acquire)
    }

    fn has_handle(&self) -> bool {
        self.handle.load(Ordering::Acquire)
    }

    fn create_handle(&self) {
        self.handle.store(true, Ordering::Release);
    }

    fn requested_format(&self) -> SurfaceFormat {
        SurfaceFormat::default()
    }

    fn size(&self) -> SurfaceSize {
        *self.size.lock().unwrap()
    }

    fn surface(&self) -> &dyn RenderSurface {
        self
    }

    fn polish_items(&self) {
        self.log.lock().unwrap().push(HostEvent::Polish(self.id));
    }

    fn sync_scene_graph(&self) {
        self.synced_value
            .store(self.scene_value.load(Ordering::Acquire), Ordering::Release);
        self.renderer.store(true, Ordering::Release);
        self.log.lock().unwrap().push(HostEvent::Sync(self.id));
    }

    fn render_scene_graph(&self, size: SurfaceSize) {
        self.fb_register
            .store(self.synced_value.load(Ordering::Acquire), Ordering::Release);
        self.log
            .lock()
            .unwrap()
            .push(HostEvent::Render(self.id, size));
    }

    fn cleanup_nodes_on_shutdown(&self) {
        self.log
            .lock()
            .unwrap()
            .push(HostEvent::CleanupNodes(self.id));
    }

    fn fire_frame_swapped(&self) {
        self.log
            .lock()
            .unwrap()
            .push(HostEvent::FrameSwapped(self.id));
    }

    fn renderer_ready(&self) -> bool {
        self.renderer.load(Ordering::Acquire)
    }

    fn persistent_scene_graph(&self) -> bool {
        self.persistent_sg.load(Ordering::Acquire)
    }

    fn persistent_gpu_context(&self) -> bool {
        self.persistent_gl.load(Ordering::Acquire)
    }
}

struct MockOffscreen {
    size: SurfaceSize,
}

impl RenderSurface for MockOffscreen {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MockGpu {
    log: EventLog,
    fb_register: Arc<AtomicU8>,
    swap_delay: Duration,
    fail_make_current: bool,
}

impl GpuContext for MockGpu {
    fn make_current(&mut self, surface: &dyn RenderSurface) -> bool {
        let event = if let Some(w) = surface.as_any().downcast_ref::<MockWindow>() {
            HostEvent::MakeCurrentWindow(w.id)
        } else if let Some(o) = surface.as_any().downcast_ref::<MockOffscreen>() {
            HostEvent::MakeCurrentOffscreen(o.size)
        } else {
            panic!("unknown surface type");
        };
        self.log.lock().unwrap().push(event);
        !self.fail_make_current
    }

    fn done_current(&mut self) {
        self.log.lock().unwrap().push(HostEvent::DoneCurrent);
    }

    fn swap_buffers(&mut self, surface: &dyn RenderSurface) {
        // Simulates buffer-swap throttling so render-driven animation does
        // not spin unboundedly in tests.
        std::thread::sleep(self.swap_delay);
        if let Some(w) = surface.as_any().downcast_ref::<MockWindow>() {
            self.log.lock().unwrap().push(HostEvent::SwapBuffers(w.id));
        }
    }

    fn read_framebuffer(&mut self, size: SurfaceSize) -> FrameImage {
        self.log
            .lock()
            .unwrap()
            .push(HostEvent::ReadFramebuffer(size));
        let byte = self.fb_register.load(Ordering::Acquire);
        let len = size.width as usize * size.height as usize * 4;
        FrameImage::new(size, vec![byte; len])
    }
}

impl Drop for MockGpu {
    fn drop(&mut self) {
        self.log.lock().unwrap().push(HostEvent::DestroyGpuContext);
    }
}

pub struct MockSceneGraph {
    ready: AtomicBool,
    log: EventLog,
}

impl SceneGraphContext for MockSceneGraph {
    fn initialize(&self, _gl: &mut dyn GpuContext) {
        self.ready.store(true, Ordering::Release);
        self.log.lock().unwrap().push(HostEvent::SgInitialize);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.ready.store(false, Ordering::Release);
        self.log.lock().unwrap().push(HostEvent::SgInvalidate);
    }

    fn flush_deferred(&self) {
        // Runs once per worker loop iteration; not worth logging.
    }
}

pub struct MockAnimationDriver {
    running: AtomicBool,
    advanced: AtomicUsize,
}

impl MockAnimationDriver {
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn advanced(&self) -> usize {
        self.advanced.load(Ordering::Acquire)
    }
}

impl AnimationDriver for MockAnimationDriver {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn advance(&self) {
        self.advanced.fetch_add(1, Ordering::AcqRel);
    }

    fn install(&self) {}
}

pub struct MockWaker {
    pub woken: AtomicUsize,
}

impl EventLoopWaker for MockWaker {
    fn wake(&self) -> Result<()> {
        self.woken.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// The assembled mock host.
pub struct MockHost {
    pub log: EventLog,
    pub fb_register: Arc<AtomicU8>,
    pub sg: Arc<MockSceneGraph>,
    pub driver: Arc<MockAnimationDriver>,
    pub waker: Arc<MockWaker>,
    pub refresh_rate: Mutex<f64>,
    pub fail_gpu: AtomicBool,
    pub fail_make_current: AtomicBool,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        Arc::new(Self {
            log: log.clone(),
            fb_register: Arc::new(AtomicU8::new(0)),
            sg: Arc::new(MockSceneGraph {
                ready: AtomicBool::new(false),
                log: log.clone(),
            }),
            driver: Arc::new(MockAnimationDriver {
                running: AtomicBool::new(false),
                advanced: AtomicUsize::new(0),
            }),
            waker: Arc::new(MockWaker {
                woken: AtomicUsize::new(0),
            }),
            refresh_rate: Mutex::new(60.0),
            fail_gpu: AtomicBool::new(false),
            fail_make_current: AtomicBool::new(false),
        })
    }

    pub fn window(&self, id: WindowId, width: u32, height: u32) -> Arc<MockWindow> {
        Arc::new(MockWindow {
            id,
            visible: AtomicBool::new(false),
            exposed: AtomicBool::new(false),
            handle: AtomicBool::new(false),
            size: Mutex::new(SurfaceSize::new(width, height)),
            renderer: AtomicBool::new(false),
            persistent_sg: AtomicBool::new(false),
            persistent_gl: AtomicBool::new(false),
            scene_value: AtomicU8::new(0),
            synced_value: AtomicU8::new(0),
            fb_register: self.fb_register.clone(),
            log: self.log.clone(),
        })
    }

    pub fn count(&self, pred: impl Fn(&HostEvent) -> bool) -> usize {
        count_events(&self.log, pred)
    }
}

impl HostHooks for MockHost {
    fn create_gpu_context(
        &self,
        _format: SurfaceFormat,
    ) -> Result<Box<dyn GpuContext>, ContextError> {
        if self.fail_gpu.load(Ordering::Acquire) {
            return Err(ContextError::NoBackend);
        }
        self.log.lock().unwrap().push(HostEvent::CreateGpuContext);
        Ok(Box::new(MockGpu {
            log: self.log.clone(),
            fb_register: self.fb_register.clone(),
            swap_delay: Duration::from_millis(1),
            fail_make_current: self.fail_make_current.load(Ordering::Acquire),
        }))
    }

    fn create_offscreen_surface(
        &self,
        _format: SurfaceFormat,
        size: SurfaceSize,
    ) -> Box<dyn RenderSurface> {
        Box::new(MockOffscreen { size })
    }

    fn create_scene_graph_context(&self) -> Arc<dyn SceneGraphContext> {
        self.sg.clone()
    }

    fn create_animation_driver(&self) -> Arc<dyn AnimationDriver> {
        self.driver.clone()
    }

    fn refresh_rate(&self) -> f64 {
        *self.refresh_rate.lock().unwrap()
    }

    fn waker(&self) -> Arc<dyn EventLoopWaker> {
        self.waker.clone()
    }
}
