fn main() {
    println!("cargo:rerun-if-changed=sway-projects/hashlock/src");
    println!("cargo:rerun-if-changed=sway-projects/hashlock/Forc.toml");
    // Only the Fuel backend loads the compiled contract and its ABI.
    if std::env::var_os("CARGO_FEATURE_FUEL").is_some() {
        build_hashlock();
    }
}

fn build_hashlock() {
    const PATH: &str = "sway-projects/hashlock/";
    let output = std::process::Command::new("forc")
        .args(["build", "--release"])
        .current_dir(PATH)
        .output()
        .expect("failed to execute forc");
    if !output.status.success() {
        panic!(
            "forc build failed with status: {}\nstderr: {}\n",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}
