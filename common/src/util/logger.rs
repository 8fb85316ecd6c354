use std::io::Write;

/// Initialize the global logger. Safe to call once per process, before any
/// other crate logs.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(buf, "[{:5}] {}", record.level(), record.args())
        })
        .init();
}
