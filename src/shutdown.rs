use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;

/// Global shutdown flag
///
/// Set when SIGINT/SIGTERM arrives. The cycle loop checks it before every
/// poll and stops admitting new work once it is set.
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Which signal triggered shutdown: 0 = none, 1 = SIGINT, 2 = SIGTERM
pub static SIGNAL_TYPE: AtomicU8 = AtomicU8::new(0);

pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Request shutdown recording the signal type for later logging
///
/// Only touches atomics; logging happens on the main thread.
pub fn request_shutdown_with_signal(signal_type: u8) {
    SIGNAL_TYPE.store(signal_type, Ordering::SeqCst);
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Signal name that triggered shutdown, if any
pub fn signal_name() -> Option<&'static str> {
    match SIGNAL_TYPE.load(Ordering::SeqCst) {
        1 => Some("SIGINT"),
        2 => Some("SIGTERM"),
        _ => None,
    }
}

/// Spawns a thread that turns SIGINT/SIGTERM into a shutdown request
pub fn install_signal_handlers() -> io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                let signal_type = if sig == SIGTERM { 2 } else { 1 };
                request_shutdown_with_signal(signal_type);
            }
        })?;
    Ok(())
}

#[cfg(test)]
pub fn reset_shutdown_for_tests() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    SIGNAL_TYPE.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_shutdown_with_signal() {
        reset_shutdown_for_tests();
        assert!(!is_shutdown_requested());
        assert_eq!(signal_name(), None);

        request_shutdown_with_signal(2);
        assert!(is_shutdown_requested());
        assert_eq!(signal_name(), Some("SIGTERM"));

        reset_shutdown_for_tests();
    }
}
