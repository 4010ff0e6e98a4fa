//! Boundary specialised for a hardware-accelerated rendering surface
//!
//! On top of the generic [`Boundary`] behaviour, a [`SurfaceBoundary`]
//! listens to the surface's context-lost signal and faults as soon as it is
//! seen. Faults are sub-classified as rendering failures, and the fallback
//! offers a second way out: switching to the non-accelerated presentation path
//! the host supplied.

use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::fallback::{FallbackAction, FallbackDescriptor, FallbackLevel};
use super::supervisor::{Boundary, FaultClassification, Rendered};
use crate::error::{AppError, RawFailure};
use crate::logging::ErrorLogger;

/// Events emitted by a rendering surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    ContextLost { reason: Option<String> },
    ContextRestored,
}

/// Sender side of a surface's fault signal
#[derive(Debug, Clone)]
pub struct SurfaceSignal {
    sender: broadcast::Sender<SurfaceEvent>,
}

impl Default for SurfaceSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.sender.subscribe()
    }

    pub fn context_lost(&self, reason: Option<&str>) {
        let _ = self.sender.send(SurfaceEvent::ContextLost {
            reason: reason.map(str::to_string),
        });
    }

    pub fn context_restored(&self) {
        let _ = self.sender.send(SurfaceEvent::ContextRestored);
    }
}

pub type FallbackViewHook = Box<dyn FnMut() + Send>;

pub struct SurfaceBoundary {
    boundary: Boundary,
    events: Option<broadcast::Receiver<SurfaceEvent>>,
    fallback_view: Option<FallbackViewHook>,
    accelerated: bool,
    context_restored: bool,
}

impl fmt::Debug for SurfaceBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceBoundary")
            .field("boundary", &self.boundary)
            .field("subscribed", &self.events.is_some())
            .field("accelerated", &self.accelerated)
            .finish()
    }
}

impl SurfaceBoundary {
    pub fn new(name: impl Into<String>, level: FallbackLevel, logger: Arc<ErrorLogger>) -> Self {
        let boundary = Boundary::new(name, level, logger)
            .with_classification(FaultClassification::Rendering)
            .with_secondary_action(FallbackAction::UseNonAcceleratedView);
        Self {
            boundary,
            events: None,
            fallback_view: None,
            accelerated: true,
            context_restored: false,
        }
    }

    /// Listen to the surface's context-lost signal
    pub fn subscribe(mut self, events: broadcast::Receiver<SurfaceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Callback that switches the host to its non-accelerated presentation
    pub fn with_fallback_view(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.fallback_view = Some(Box::new(hook));
        self
    }

    /// Apply pending surface events, then render like a [`Boundary`]
    pub fn render<V>(&mut self, children: impl FnOnce() -> V) -> Rendered<V> {
        self.poll_events();
        self.boundary.render(children)
    }

    pub fn try_render<V, E>(&mut self, children: impl FnOnce() -> Result<V, E>) -> Rendered<V>
    where
        E: Into<RawFailure>,
    {
        self.poll_events();
        self.boundary.try_render(children)
    }

    /// Fault with a context-lost error. While already faulted the current
    /// fallback stays in place.
    pub fn notify_context_lost(&mut self, reason: Option<&str>) -> FallbackDescriptor {
        self.context_restored = false;
        if let Some(fault) = self.boundary.current_fault() {
            debug!(boundary = %self.boundary.name(), reason, "Context lost while faulted");
            return fault.descriptor.clone();
        }
        warn!(boundary = %self.boundary.name(), reason, "Rendering context lost");
        let error = AppError::context_lost(self.boundary.name(), reason);
        self.boundary.fault(error)
    }

    /// Fault with an error raised by the surface
    pub fn fault(&mut self, raw: impl Into<RawFailure>) -> FallbackDescriptor {
        self.boundary.fault(raw)
    }

    /// Switch to the non-accelerated path and mount the children again.
    /// Returns `false` when the host supplied no fallback view.
    pub fn use_fallback_view(&mut self) -> bool {
        let Some(hook) = self.fallback_view.as_mut() else {
            debug!(boundary = %self.boundary.name(), "No fallback view configured");
            return false;
        };
        hook();
        self.accelerated = false;
        self.boundary.reset();
        true
    }

    /// Retry the accelerated path
    pub fn reset(&mut self) -> bool {
        self.context_restored = false;
        self.boundary.reset()
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerated
    }

    /// The surface reported its context back since the last fault
    pub fn context_restored(&self) -> bool {
        self.context_restored
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    fn poll_events(&mut self) {
        loop {
            let Some(events) = self.events.as_mut() else {
                return;
            };
            match events.try_recv() {
                Ok(SurfaceEvent::ContextLost { reason }) => {
                    self.notify_context_lost(reason.as_deref());
                }
                Ok(SurfaceEvent::ContextRestored) => {
                    debug!(boundary = %self.boundary.name(), "Rendering context restored");
                    self.context_restored = true;
                }
                Err(broadcast::error::TryRecvError::Empty) => return,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(boundary = %self.boundary.name(), skipped, "Surface events lagged");
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.events = None;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn surface() -> (SurfaceBoundary, SurfaceSignal, Arc<ErrorLogger>) {
        let logger = Arc::new(ErrorLogger::in_memory());
        let signal = SurfaceSignal::new();
        let boundary = SurfaceBoundary::new("viewport", FallbackLevel::Section, logger.clone())
            .subscribe(signal.subscribe());
        (boundary, signal, logger)
    }

    #[test]
    fn test_context_lost_signal_forces_fault() {
        let (mut surface, signal, logger) = surface();
        assert_eq!(surface.render(|| 1), Rendered::Children(1));

        signal.context_lost(Some("GPU reset"));
        let rendered = surface.render(|| 2);

        let descriptor = rendered.fallback().unwrap();
        assert_eq!(descriptor.code, ErrorCode::RenderContextLost);
        assert_eq!(descriptor.secondary_action, Some(FallbackAction::UseNonAcceleratedView));
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_repeated_context_loss_is_one_fault() {
        let (mut surface, signal, logger) = surface();

        signal.context_lost(Some("GPU reset"));
        signal.context_lost(Some("GPU reset again"));
        let rendered = surface.render(|| 1u32);

        assert!(rendered.is_fallback());
        assert_eq!(surface.boundary().fault_count(), 1);
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_surface_failures_are_sub_classified() {
        let cases = [
            ("WebGL not supported by this browser", ErrorCode::RenderUnsupported),
            ("shader compile failed: line 4", ErrorCode::RenderShaderCompile),
            ("out of memory allocating vertex buffer", ErrorCode::RenderOutOfMemory),
            ("device lost during draw", ErrorCode::RenderContextLost),
            ("something odd happened", ErrorCode::RenderFailed),
        ];

        for (message, expected) in cases {
            let (mut surface, _, _) = surface();
            let rendered = surface.render(|| -> u32 { panic!("{}", message) });
            assert_eq!(rendered.fallback().unwrap().code, expected, "{}", message);
        }
    }

    #[test]
    fn test_fallback_view_switches_path_and_remounts() {
        let switched = Arc::new(AtomicBool::new(false));
        let switched_clone = switched.clone();
        let (surface, signal, _) = surface();
        let mut surface = surface.with_fallback_view(move || switched_clone.store(true, Ordering::SeqCst));

        signal.context_lost(None);
        assert!(surface.render(|| ()).is_fallback());

        assert!(surface.use_fallback_view());
        assert!(switched.load(Ordering::SeqCst));
        assert!(!surface.is_accelerated());
        assert_eq!(surface.render(|| "2d"), Rendered::Children("2d"));
    }

    #[test]
    fn test_restored_context_is_reported_but_does_not_reset() {
        let (mut surface, signal, _) = surface();
        signal.context_lost(None);
        signal.context_restored();

        assert!(surface.render(|| ()).is_fallback());
        assert!(surface.context_restored());
        assert!(surface.reset());
        assert!(!surface.render(|| ()).is_fallback());
    }

    #[test]
    fn test_without_fallback_view() {
        let (mut surface, _, _) = surface();
        surface.notify_context_lost(None);
        assert!(!surface.use_fallback_view());
        assert!(surface.boundary().is_faulted());
    }
}
