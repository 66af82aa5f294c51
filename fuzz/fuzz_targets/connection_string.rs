#![no_main]

use libfuzzer_sys::fuzz_target;
use reservoir_sql::ConnectionString;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(cs) = ConnectionString::parse(s) {
        let size = cs.pool_size();
        assert!(size > 0);
        assert!(cs.min_pool_size() <= size);
        let _ = cs.redacted();
    }
});
