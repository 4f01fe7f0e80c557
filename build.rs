fn main() {
    // Stamp the build date into the binary
    let build_date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    println!("cargo:rustc-env=BUILD_DATE={build_date}");
}
