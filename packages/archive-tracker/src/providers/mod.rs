//! Provider client implementations.

pub mod archive_today;
pub mod wayback;

pub use archive_today::ArchiveTodayClient;
pub use wayback::WaybackClient;
