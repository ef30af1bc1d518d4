pub mod account;
pub mod block_info;
pub mod config;
pub mod crypto;
pub mod dht;
pub mod error;
pub mod namespace;
pub mod params;
pub mod push_key;
pub mod push_note;
pub mod repository;
pub mod serializer;
pub mod tracked_repo;
pub mod transaction;
pub mod validator;

pub mod logging {
    //! Ambient logging setup, mirroring the teacher's `fern`-based
    //! initialization in `xelis_common`.
    use fern::colors::{Color, ColoredLevelConfig};

    pub fn init(verbose: bool) -> Result<(), fern::InitError> {
        let colors = ColoredLevelConfig::new()
            .info(Color::Green)
            .warn(Color::Yellow)
            .error(Color::Red)
            .debug(Color::Blue)
            .trace(Color::BrightBlack);

        let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

        fern::Dispatch::new()
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{}] [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    colors.color(record.level()),
                    message
                ))
            })
            .level(level)
            .chain(std::io::stdout())
            .apply()?;
        Ok(())
    }
}
