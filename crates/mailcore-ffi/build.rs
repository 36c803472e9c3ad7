extern crate cbindgen;

use std::env;
use std::path::PathBuf;

const HEADER_PREAMBLE: &str = "/* Generated by cbindgen from mailcore-ffi. Strings returned by \
mailcore_* functions must be released with mailcore_free_string. */";

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");

    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let include_dir = crate_dir.join("include");
    std::fs::create_dir_all(&include_dir).unwrap();

    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        include_guard: Some("MAILCORE_H".to_string()),
        header: Some(HEADER_PREAMBLE.to_string()),
        cpp_compat: true,
        documentation: true,
        ..cbindgen::Config::default()
    };

    cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
        .expect("Unable to generate mailcore bindings")
        .write_to_file(include_dir.join("mailcore.h"));
}
