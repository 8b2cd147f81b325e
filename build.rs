fn main() {
    // Test binaries load template shared objects that resolve the
    // smart_tpl_* callback ABI against the host process, so the linker
    // must put those symbols in the dynamic symbol table.
    if std::env::var_os("CARGO_CFG_UNIX").is_some() {
        println!("cargo:rustc-link-arg-tests=-rdynamic");
    }
}
