//! Injects the kernel linker script for bare-metal builds. Host builds
//! (unit tests, coverage) use the default linkage.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=linker.ld");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "none" {
        let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg=-T{}/linker.ld", manifest_dir);
    }
}
