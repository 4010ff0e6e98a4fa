use bulwark_core::boundary::{FallbackAction, FallbackLevel, Rendered, SurfaceSignal};
use bulwark_core::config::LoggerSection;
use bulwark_core::error::ErrorCode;
use bulwark_core::{BulwarkConfig, ResilienceContext};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[test]
fn faulted_boundary_keeps_fallback_until_keys_change() {
    let ctx = ResilienceContext::default();
    let mut boundary = ctx.boundary("profile", FallbackLevel::Section);
    let renders = AtomicU32::new(0);

    let first = boundary.render_with_keys("user-1", || -> u32 {
        renders.fetch_add(1, Ordering::SeqCst);
        panic!("TypeError: Cannot read properties of undefined");
    });
    let descriptor = first.fallback().cloned().unwrap();
    assert_eq!(descriptor.primary_action, Some(FallbackAction::Retry));

    // Same keys: children are not run again and the same fallback comes back
    let second = boundary.render_with_keys("user-1", || {
        renders.fetch_add(1, Ordering::SeqCst);
        7
    });
    assert_eq!(second, Rendered::Fallback(descriptor));
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let third = boundary.render_with_keys("user-2", || {
        renders.fetch_add(1, Ordering::SeqCst);
        7
    });
    assert_eq!(third, Rendered::Children(7));
    assert_eq!(boundary.fault_count(), 1);
    assert_eq!(ctx.logger().len(), 1);
}

#[test]
fn inner_boundary_contains_its_own_fault() {
    let ctx = ResilienceContext::default();
    let mut outer = ctx.boundary("page", FallbackLevel::Global);
    let mut inner = ctx.boundary("chart", FallbackLevel::Component);

    let rendered = outer.render(|| {
        let chart = inner.try_render(|| Err::<(), _>("Unexpected token in JSON"));
        chart.is_fallback()
    });

    assert_eq!(rendered, Rendered::Children(true));
    assert!(inner.is_faulted());
    assert!(!outer.is_faulted());

    let entries = ctx.logger().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].error.code(), ErrorCode::DataParseFailed);
    assert_eq!(entries[0].metadata["boundary"], "chart");
    assert_eq!(entries[0].metadata["level"], "component");
}

#[test]
fn fault_hook_sees_error_and_descriptor() {
    let ctx = ResilienceContext::default();
    let seen = Arc::new(AtomicU32::new(0));
    let seen_clone = seen.clone();

    let mut boundary = ctx
        .boundary("editor", FallbackLevel::Global)
        .on_fault(move |error, descriptor| {
            assert_eq!(error.code(), descriptor.code);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

    let descriptor = boundary.fault("database is locked");
    assert_eq!(descriptor.code, ErrorCode::DatabaseUnavailable);
    assert_eq!(descriptor.primary_action, Some(FallbackAction::Reload));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn details_only_in_debug_mode() {
    let quiet = ResilienceContext::default();
    let debug = ResilienceContext::builder()
        .config(BulwarkConfig {
            logger: LoggerSection {
                debug: Some(true),
                ..Default::default()
            },
            ..Default::default()
        })
        .build();

    let plain = quiet
        .boundary("panel", FallbackLevel::Section)
        .fault("socket closed by peer");
    let detailed = debug
        .boundary("panel", FallbackLevel::Section)
        .fault("socket closed by peer");

    assert_eq!(plain.details, None);
    assert!(detailed.details.unwrap().contains("socket closed by peer"));
    assert_eq!(plain.message, detailed.message);
}

#[test]
fn surface_boundary_falls_back_to_non_accelerated_view() {
    let ctx = ResilienceContext::default();
    let signal = SurfaceSignal::new();
    let switched = Arc::new(AtomicU32::new(0));
    let switched_clone = switched.clone();

    let mut surface = ctx
        .surface_boundary("globe", FallbackLevel::Section)
        .subscribe(signal.subscribe())
        .with_fallback_view(move || {
            switched_clone.fetch_add(1, Ordering::SeqCst);
        });

    assert_eq!(surface.render(|| "3d"), Rendered::Children("3d"));

    signal.context_lost(Some("GPU process crashed"));
    let rendered = surface.render(|| "3d");
    let descriptor = rendered.fallback().unwrap();
    assert_eq!(descriptor.code, ErrorCode::RenderContextLost);
    assert_eq!(
        descriptor.secondary_action,
        Some(FallbackAction::UseNonAcceleratedView)
    );

    assert!(surface.use_fallback_view());
    assert_eq!(switched.load(Ordering::SeqCst), 1);
    assert_eq!(surface.render(|| "2d"), Rendered::Children("2d"));
    assert!(!surface.is_accelerated());
}
