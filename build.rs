fn main() {
    // Stamped into the CLI's long version string
    let build_date = chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string();
    println!("cargo:rustc-env=FDMLINK_BUILD_DATE={}", build_date);
    println!("cargo:rerun-if-changed=build.rs");
}
