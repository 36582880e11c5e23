//! Embedded status-badge assets

/// Badge shown for an available mirror
pub const STATUS_UP: &[u8] = include_bytes!("../../assets/status-up.svg");

/// Badge shown for an unavailable mirror
pub const STATUS_DOWN: &[u8] = include_bytes!("../../assets/status-down.svg");

/// Badge shown for hosts the catalog does not know
pub const STATUS_UNKNOWN: &[u8] = include_bytes!("../../assets/status-unknown.svg");
