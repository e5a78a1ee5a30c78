use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Installs the process-wide logger.
///
/// `level` is the default; `RUST_LOG` still wins when set. Calling this twice
/// is harmless.
pub fn setup_logging(level: LevelFilter) {
    let mut builder = Builder::new();

    builder
        .target(Target::Stdout)
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                std::thread::current().name().unwrap_or("unnamed"),
                record.args()
            )
        });

    let _ = builder.try_init();
}
