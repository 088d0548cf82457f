fn main() {
    // Record git, compiler and timestamp details for `cli::fmt_build_info`.
    built::write_built_file().expect("Failed to acquire build-time information");

    println!("cargo:rerun-if-changed=build.rs");
}
