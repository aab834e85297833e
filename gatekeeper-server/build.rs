fn main() {
    println!("cargo:rerun-if-env-changed=GATEKEEPER_GIT_HASH");
    built::write_built_file().expect("Failed to acquire build-time information");
}
