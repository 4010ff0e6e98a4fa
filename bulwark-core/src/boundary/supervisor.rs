//! Generic containment boundary
//!
//! A [`Boundary`] supervises a synchronous unit of work (a render or update
//! pass). A panic or an `Err` raised inside that pass moves the boundary to
//! `Faulted`, where it keeps returning the same fallback until it is reset
//! explicitly or its reset keys change. Failures raised later by async work
//! the pass started are not seen here; report those through the logger.
//!
//! Boundaries nest naturally: an inner boundary rendered inside an outer
//! boundary's pass contains its own faults, and only what escapes it reaches
//! the outer one.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::fallback::{FallbackAction, FallbackDescriptor, FallbackLevel};
use crate::error::{AppError, ContextMap, RawFailure};
use crate::logging::global::contain;
use crate::logging::ErrorLogger;

pub type FaultHook = Box<dyn Fn(&AppError, &FallbackDescriptor) + Send + Sync>;
pub type ResetHook = Box<dyn Fn() + Send + Sync>;

/// How faults raised inside the boundary are classified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultClassification {
    #[default]
    General,
    /// Sub-classify as a rendering failure
    Rendering,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub error: AppError,
    pub descriptor: FallbackDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryState {
    Healthy,
    Faulted(Fault),
}

/// Output of a render pass
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered<V> {
    Children(V),
    Fallback(FallbackDescriptor),
}

impl<V> Rendered<V> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Rendered::Fallback(_))
    }

    pub fn children(self) -> Option<V> {
        match self {
            Rendered::Children(value) => Some(value),
            Rendered::Fallback(_) => None,
        }
    }

    pub fn fallback(&self) -> Option<&FallbackDescriptor> {
        match self {
            Rendered::Fallback(descriptor) => Some(descriptor),
            Rendered::Children(_) => None,
        }
    }
}

pub struct Boundary {
    name: String,
    level: FallbackLevel,
    classification: FaultClassification,
    secondary_action: Option<FallbackAction>,
    state: BoundaryState,
    reset_fingerprint: Option<u64>,
    fault_count: u64,
    logger: Arc<ErrorLogger>,
    on_fault: Option<FaultHook>,
    on_reset: Option<ResetHook>,
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boundary")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("state", &self.state)
            .field("fault_count", &self.fault_count)
            .finish_non_exhaustive()
    }
}

impl Boundary {
    pub fn new(name: impl Into<String>, level: FallbackLevel, logger: Arc<ErrorLogger>) -> Self {
        Self {
            name: name.into(),
            level,
            classification: FaultClassification::General,
            secondary_action: None,
            state: BoundaryState::Healthy,
            reset_fingerprint: None,
            fault_count: 0,
            logger,
            on_fault: None,
            on_reset: None,
        }
    }

    pub fn with_classification(mut self, classification: FaultClassification) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_secondary_action(mut self, action: FallbackAction) -> Self {
        self.secondary_action = Some(action);
        self
    }

    pub fn on_fault(
        mut self,
        hook: impl Fn(&AppError, &FallbackDescriptor) + Send + Sync + 'static,
    ) -> Self {
        self.on_fault = Some(Box::new(hook));
        self
    }

    pub fn on_reset(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reset = Some(Box::new(hook));
        self
    }

    /// Run `children` unless the boundary is faulted. A panic inside
    /// `children` faults the boundary.
    pub fn render<V>(&mut self, children: impl FnOnce() -> V) -> Rendered<V> {
        self.try_render(|| Ok::<V, AppError>(children()))
    }

    /// Like [`render`](Self::render), but an `Err` returned by `children`
    /// faults the boundary too.
    pub fn try_render<V, E>(&mut self, children: impl FnOnce() -> Result<V, E>) -> Rendered<V>
    where
        E: Into<RawFailure>,
    {
        if let BoundaryState::Faulted(fault) = &self.state {
            return Rendered::Fallback(fault.descriptor.clone());
        }

        match contain(|| catch_unwind(AssertUnwindSafe(children))) {
            Ok(Ok(value)) => Rendered::Children(value),
            Ok(Err(raw)) => Rendered::Fallback(self.fault(raw)),
            Err(payload) => {
                Rendered::Fallback(self.fault(RawFailure::from_panic_payload(payload.as_ref())))
            }
        }
    }

    /// Render with reset keys. When the boundary is faulted and the keys
    /// differ from the ones seen on the previous pass, it resets first.
    pub fn render_with_keys<K, V>(
        &mut self,
        keys: &K,
        children: impl FnOnce() -> V,
    ) -> Rendered<V>
    where
        K: Hash + ?Sized,
    {
        self.observe_keys(keys);
        self.render(children)
    }

    pub fn try_render_with_keys<K, V, E>(
        &mut self,
        keys: &K,
        children: impl FnOnce() -> Result<V, E>,
    ) -> Rendered<V>
    where
        K: Hash + ?Sized,
        E: Into<RawFailure>,
    {
        self.observe_keys(keys);
        self.try_render(children)
    }

    /// Record a fault raised inside this boundary's scope and return the
    /// fallback to show. A boundary that is already faulted keeps its
    /// current fault until reset.
    pub fn fault(&mut self, raw: impl Into<RawFailure>) -> FallbackDescriptor {
        if let BoundaryState::Faulted(fault) = &self.state {
            debug!(boundary = %self.name, "Already faulted, ignoring fault");
            return fault.descriptor.clone();
        }

        let classifier = self.logger.classifier();
        let error = match self.classification {
            FaultClassification::General => classifier.classify(raw),
            FaultClassification::Rendering => classifier.classify_rendering(raw),
        };

        let error_id = Uuid::new_v4();
        let descriptor =
            FallbackDescriptor::new(self.level, error_id, &error, self.logger.is_debug())
                .with_secondary_action(self.secondary_action);

        self.fault_count += 1;
        info!(
            boundary = %self.name,
            level = self.level.name(),
            code = %error.code(),
            error_id = %error_id,
            fault_count = self.fault_count,
            "Boundary faulted"
        );

        let mut metadata = ContextMap::new();
        metadata.insert("boundary".into(), self.name.clone().into());
        metadata.insert("level".into(), self.level.name().into());
        metadata.insert("error_id".into(), error_id.to_string().into());
        self.logger.log(error.clone(), metadata);

        if let Some(hook) = &self.on_fault {
            hook(&error, &descriptor);
        }

        self.state = BoundaryState::Faulted(Fault {
            error,
            descriptor: descriptor.clone(),
        });
        descriptor
    }

    /// Return to `Healthy` so the next pass mounts the children again.
    /// Returns `false` if the boundary was already healthy.
    pub fn reset(&mut self) -> bool {
        if matches!(self.state, BoundaryState::Healthy) {
            return false;
        }
        self.state = BoundaryState::Healthy;
        debug!(boundary = %self.name, "Boundary reset");
        if let Some(hook) = &self.on_reset {
            hook();
        }
        true
    }

    pub fn state(&self) -> &BoundaryState {
        &self.state
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.state, BoundaryState::Faulted(_))
    }

    pub fn current_fault(&self) -> Option<&Fault> {
        match &self.state {
            BoundaryState::Faulted(fault) => Some(fault),
            BoundaryState::Healthy => None,
        }
    }

    pub fn fault_count(&self) -> u64 {
        self.fault_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> FallbackLevel {
        self.level
    }

    fn observe_keys<K: Hash + ?Sized>(&mut self, keys: &K) {
        let mut hasher = DefaultHasher::new();
        keys.hash(&mut hasher);
        let fingerprint = hasher.finish();

        let changed = self
            .reset_fingerprint
            .map(|previous| previous != fingerprint)
            .unwrap_or(false);
        self.reset_fingerprint = Some(fingerprint);

        if changed && self.is_faulted() {
            debug!(boundary = %self.name, "Reset keys changed");
            self.reset();
        }
    }
}
