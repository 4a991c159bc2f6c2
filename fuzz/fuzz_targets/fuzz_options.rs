#![no_main]
use chemdex::{IndexOptions, SearchOptions};
use libfuzzer_sys::fuzz_target;

// Option strings come straight from callers; parsing must fail cleanly
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(options) = IndexOptions::parse(text) {
        assert!(options.validate().is_ok());
        assert!(options.min_mmf_size <= options.max_mmf_size);
    }

    if let Ok(options) = SearchOptions::parse(text) {
        let partition = options.partition();
        assert!(partition.part >= 1 && partition.part <= partition.count);
    }
});
