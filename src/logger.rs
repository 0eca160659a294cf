use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

static INIT: AtomicBool = AtomicBool::new(false);

/// Initializes the logger once, honoring `RUST_LOG`.
///
/// The crate only emits through the `log` facade; binaries and tests call
/// this to attach the `env_logger` backend. Repeated calls are no-ops.
#[cfg(any(test, feature = "env_logger"))]
pub fn init_logger() {
    if !INIT.swap(true, Ordering::SeqCst) {
        let _ = env_logger::builder().is_test(cfg!(test)).try_init();
    }
}

/// Fallback initializer when no logger backend feature is enabled: the
/// facade stays silent but `log::max_level` is still configured so callers
/// can probe it.
#[cfg(not(any(test, feature = "env_logger")))]
pub fn init_logger() {
    if !INIT.swap(true, Ordering::SeqCst) {
        log::set_max_level(log::LevelFilter::Off);
    }
}
