/// Blocks the calling thread servicing the main run loop, where accessibility
/// observer sources are scheduled. Never returns on platforms without one.
pub fn run_main() {
    #[cfg(target_os = "macos")]
    {
        objc2_core_foundation::CFRunLoop::run();
    }
    #[cfg(not(target_os = "macos"))]
    loop {
        std::thread::park();
    }
}
