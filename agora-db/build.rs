fn main() {
    println!("cargo::rerun-if-changed=migrations");
    println!("cargo::rerun-if-env-changed=DATABASE_URL");
    println!("cargo::rustc-check-cfg=cfg(database_tests)");

    // The PostgreSQL tests create a scratch database per test through this URL.
    if std::env::var_os("DATABASE_URL").is_some() {
        println!("cargo::rustc-cfg=database_tests");
    }
}
