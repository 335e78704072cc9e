pub mod ms {
    pub const POLLING_INTERVAL: u64 = 500;
    pub const WATCHDOG_TICK: u64 = 1000;
    pub const STORE_WATCH_INTERVAL: u64 = 200;
}

pub mod secs {
    pub const REQUEST: u64 = 5;
    pub const REQUEST_MIN: u64 = 1;
    pub const REQUEST_MAX: u64 = 30;
    pub const RECORD_DURATION: u64 = 30;
}
