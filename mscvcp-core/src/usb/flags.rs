use portable_atomic::{AtomicBool, AtomicI32, Ordering};

/// Word-sized flags shared between the USB interrupt path and the polling task.
///
/// Interrupt hooks only ever set or clear these; the BOT state machine owns
/// everything else.
pub struct SessionFlags {
    /// Bus attached and not reset/suspended. Cancels in-flight transfers when cleared
    connected: AtomicBool,
    /// Bulk-OUT received data while no command was active
    cbw_pending: AtomicBool,
    /// Bus reset or Bulk-Only reset asked the state machine to start over
    reset_requested: AtomicBool,
    /// Host finished the initial TEST UNIT READY flurry
    msc_connected: AtomicBool,
    /// Host configured the virtual COM port line coding
    vcp_connected: AtomicBool,
    /// Data bus enumerated
    data_bus_connected: AtomicBool,
    /// Host ejected the medium with START STOP UNIT
    media_removed: AtomicBool,
    /// Remaining TEST UNIT READY polls before `msc_connected` is raised
    connect_check: AtomicI32,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFlags {
    pub const fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            cbw_pending: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            msc_connected: AtomicBool::new(false),
            vcp_connected: AtomicBool::new(false),
            data_bus_connected: AtomicBool::new(false),
            media_removed: AtomicBool::new(false),
            connect_check: AtomicI32::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Called by the HAL on attach/configure and on detach/suspend
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn cbw_pending(&self) -> bool {
        self.cbw_pending.load(Ordering::Acquire)
    }

    pub fn set_cbw_pending(&self) {
        self.cbw_pending.store(true, Ordering::Release);
    }

    pub fn clear_cbw_pending(&self) {
        self.cbw_pending.store(false, Ordering::Release);
    }

    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    /// Consume a pending reset request
    pub fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }

    pub fn msc_connected(&self) -> bool {
        self.msc_connected.load(Ordering::Acquire)
    }

    pub fn set_msc_connected(&self, connected: bool) {
        self.msc_connected.store(connected, Ordering::Release);
    }

    pub fn vcp_connected(&self) -> bool {
        self.vcp_connected.load(Ordering::Acquire)
    }

    pub fn set_vcp_connected(&self, connected: bool) {
        self.vcp_connected.store(connected, Ordering::Release);
    }

    pub fn data_bus_connected(&self) -> bool {
        self.data_bus_connected.load(Ordering::Acquire)
    }

    pub fn set_data_bus_connected(&self, connected: bool) {
        self.data_bus_connected.store(connected, Ordering::Release);
    }

    pub fn media_removed(&self) -> bool {
        self.media_removed.load(Ordering::Acquire)
    }

    pub fn set_media_removed(&self, removed: bool) {
        self.media_removed.store(removed, Ordering::Release);
    }

    pub fn connect_check(&self) -> i32 {
        self.connect_check.load(Ordering::Acquire)
    }

    pub fn seed_connect_check(&self, polls: i32) {
        self.connect_check.store(polls, Ordering::Release);
    }

    /// Count down one TEST UNIT READY poll, raising `msc_connected` once exhausted
    pub fn tick_connect_check(&self) {
        if self.connect_check.load(Ordering::Acquire) > 0 {
            self.connect_check.fetch_sub(1, Ordering::AcqRel);
        } else {
            self.set_msc_connected(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_check_debounce() {
        let flags = SessionFlags::new();
        flags.seed_connect_check(2);

        flags.tick_connect_check();
        flags.tick_connect_check();
        assert!(!flags.msc_connected());
        assert_eq!(flags.connect_check(), 0);

        flags.tick_connect_check();
        assert!(flags.msc_connected());
    }

    #[test]
    fn test_take_reset_request_consumes() {
        let flags = SessionFlags::new();
        assert!(!flags.take_reset_request());
        flags.request_reset();
        assert!(flags.take_reset_request());
        assert!(!flags.take_reset_request());
    }
}
