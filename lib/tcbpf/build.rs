use std::env;
use std::fs;
use std::path::PathBuf;

/// The mode bitmask of the program variant being built.
const COMPILE_FLAGS_VAR: &str = "TCBPF_COMPILE_FLAGS";

fn parse_flags(raw: &str) -> Result<u32, std::num::ParseIntError> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed={COMPILE_FLAGS_VAR}");
    println!("cargo::rustc-check-cfg=cfg(usdt_stable_asm)");
    println!("cargo::rustc-check-cfg=cfg(usdt_stable_asm_sym)");

    if version_check::is_min_version("1.59").unwrap_or(false) {
        println!("cargo:rustc-cfg=usdt_stable_asm");
    }

    #[cfg(target_os = "macos")]
    if version_check::is_min_version("1.66").unwrap_or(false) {
        println!("cargo:rustc-cfg=usdt_stable_asm_sym");
    }

    // Consistency of the mask is not checked here: the engine asserts
    // it during const evaluation so the error names the broken rule.
    let flags = match env::var(COMPILE_FLAGS_VAR) {
        Ok(raw) => match parse_flags(&raw) {
            Ok(flags) => flags,
            Err(e) => panic!("{COMPILE_FLAGS_VAR}={raw:?} is not a u32: {e}"),
        },
        Err(env::VarError::NotPresent) => 0,
        Err(e) => panic!("{COMPILE_FLAGS_VAR}: {e}"),
    };

    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set"));
    fs::write(
        out.join("compile_flags.rs"),
        format!("pub const COMPILE_FLAGS: u32 = {flags:#x};\n"),
    )
    .expect("write compile_flags.rs");
}
