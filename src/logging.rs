use std::fs::OpenOptions;
use std::io::Write;
use env_logger::{Env, Target};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("open log file {path}: {err}")]
    OpenLogFile {
        err: std::io::Error,
        path: String,
    },

    #[error(transparent)]
    SetLogger(#[from] log::SetLoggerError),
}

/// Writes everything to the console and to a log file.
pub struct Tee<C: Write, F: Write> {
    console: C,
    file: F,
}

impl<C: Write, F: Write> Tee<C, F> {
    pub fn new(console: C, file: F) -> Self {
        Self { console, file }
    }
}

impl<C: Write, F: Write> Write for Tee<C, F> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.console.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.console.flush()?;
        self.file.flush()
    }
}

/// Set up logging to stderr and, if a path is given, append the same lines to that file.
/// Log level defaults to `info` and can be changed with `RUST_LOG`.
pub fn init(log_file: Option<&str>) -> Result<(), Error> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| Error::OpenLogFile {
                err,
                path: path.to_string(),
            })?;
        builder.target(Target::Pipe(Box::new(Tee::new(std::io::stderr(), file))));
    }

    builder.try_init()?;
    Ok(())
}
