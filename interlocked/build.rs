// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;

/// Reads a `CARGO_CFG_*` variable; multi-valued cfgs come comma separated.
fn target_cfg(name: &str) -> Vec<String> {
    env::var(format!("CARGO_CFG_{name}"))
        .map(|value| value.split(',').map(str::to_owned).collect())
        .unwrap_or_default()
}

fn feature_enabled(name: &str) -> bool {
    env::var_os(format!("CARGO_FEATURE_{name}")).is_some()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-check-cfg=cfg(interlocked_native)");
    println!("cargo:rustc-check-cfg=cfg(interlocked_emulate_64)");
    println!("cargo:rustc-check-cfg=cfg(interlocked_cas16)");

    let arch = target_cfg("TARGET_ARCH");
    let pointer_width = target_cfg("TARGET_POINTER_WIDTH");
    let has_atomic = target_cfg("TARGET_HAS_ATOMIC");

    let is_x86 = arch.iter().any(|a| a == "x86" || a == "x86_64");
    let is_x86_64 = arch.iter().any(|a| a == "x86_64");

    if feature_enabled("NATIVE_INTERLOCKED") {
        if is_x86 {
            println!("cargo:rustc-cfg=interlocked_native");
        } else {
            println!(
                "cargo:warning=`native-interlocked` only has an x86 backend; using compiler builtins on {}",
                arch.join(",")
            );
        }
    }

    // 32-bit targets with a 64-bit CAS still lack native 64-bit exchange and
    // fetch-ops, so that width goes through the retry emulation.
    if pointer_width.iter().any(|w| w == "32") && has_atomic.iter().any(|w| w == "64") {
        println!("cargo:rustc-cfg=interlocked_emulate_64");
    }

    if feature_enabled("CAS16") {
        if is_x86_64 {
            println!("cargo:rustc-cfg=interlocked_cas16");
        } else {
            println!(
                "cargo:warning=`cas16` requires x86_64; 16-byte atomics stay unavailable on {}",
                arch.join(",")
            );
        }
    }
}
