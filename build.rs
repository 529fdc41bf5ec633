use std::process::Command;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=RUSTC");
    println!("cargo:rerun-if-changed=build.rs");

    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let version = match Command::new(&rustc).arg("--version").output() {
        // "rustc 1.78.0 (9b00956e5 2024-04-29)"
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .nth(1)
            .map(str::to_string),
        Ok(output) => {
            println!("cargo:warning={} --version exited with {}", rustc, output.status);
            None
        }
        Err(e) => {
            println!("cargo:warning=could not run {} --version: {}", rustc, e);
            None
        }
    };

    if let Some(version) = version {
        println!("cargo:rustc-env=CSV_IMPORTER_RUSTC_VERSION={}", version);
    }
    Ok(())
}
