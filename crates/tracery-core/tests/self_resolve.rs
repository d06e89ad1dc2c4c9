//! Resolve an address inside the running test executable
#![cfg(target_os = "linux")]

use tracery_core::config::{CacheMode, ResolverConfig};
use tracery_core::trace::{ImageMap, ObjectLocator, RawTrace, Symbolizer};
use tracery_core::types::Address;

#[inline(never)]
fn marker() -> u32
{
    std::hint::black_box(7)
}

#[test]
fn test_resolve_own_function()
{
    let images = ImageMap::current_process().expect("read /proc/self/maps");
    let address = Address::new((marker as fn() -> u32) as usize as u64);
    assert_eq!(marker(), 7);

    let located = images.locate(address).expect("marker lies in a mapped object");
    let exe = std::env::current_exe().expect("current exe");
    assert_eq!(
        located.object_path.canonicalize().ok(),
        exe.canonicalize().ok(),
        "marker should be attributed to the test executable"
    );

    for mode in [CacheMode::PrioritizeSpeed, CacheMode::PrioritizeMemory] {
        let config = ResolverConfig::default().with_cache_mode(mode).with_absorb_errors(false);
        let mut symbolizer: Symbolizer = Symbolizer::new(config);
        let trace = RawTrace::new(vec![address]).resolve(&images, &mut symbolizer).unwrap();
        let frame = trace.frames()[0].last().expect("at least one frame");
        assert!(frame.symbol.contains("marker"), "{mode}: unexpected symbol {}", frame.symbol);
        assert!(frame.filename.ends_with("self_resolve.rs"), "{mode}: unexpected file {}", frame.filename);
        assert!(frame.line.is_some());
    }
}
