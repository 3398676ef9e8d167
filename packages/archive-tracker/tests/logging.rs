//! Global subscriber installation. Kept in its own test binary so the
//! subscriber never leaks into the library's unit tests.

use archive_tracker::logging;

#[test]
fn test_second_init_is_harmless() {
    logging::init();
    logging::init();
    assert!(logging::try_init().is_err());
}
