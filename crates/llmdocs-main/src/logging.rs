use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Appends to `file_path`, moving it to `<name>.1` once the next write would
/// push it past `max_size_bytes`. Zero disables rotation.
#[derive(Debug)]
struct SizeRotatingFileWriter {
    file_path: PathBuf,
    rotated_path: PathBuf,
    max_size_bytes: u64,
    file: Option<File>,
    written: u64,
}

impl SizeRotatingFileWriter {
    fn new(file_path: PathBuf, max_size_bytes: u64) -> Result<Self, String> {
        let parent = file_path
            .parent()
            .ok_or_else(|| format!("invalid log file path {}", file_path.display()))?;
        fs::create_dir_all(parent).map_err(|error| {
            format!("create log directory {} failed: {error}", parent.display())
        })?;

        let mut rotated_name = file_path
            .file_name()
            .map(|value| value.to_os_string())
            .unwrap_or_else(|| OsString::from("llmdocs.log"));
        rotated_name.push(".1");
        let rotated_path = file_path.with_file_name(rotated_name);
        let written = fs::metadata(&file_path)
            .map(|metadata| metadata.len())
            .unwrap_or(0);

        Ok(Self {
            file_path,
            rotated_path,
            max_size_bytes,
            file: None,
            written,
        })
    }

    fn rotate_if_needed(&mut self, incoming_len: usize) -> io::Result<()> {
        if self.max_size_bytes == 0
            || self.written.saturating_add(incoming_len as u64) <= self.max_size_bytes
        {
            return Ok(());
        }
        self.file = None;
        if self.rotated_path.exists() {
            let _ = fs::remove_file(&self.rotated_path);
        }
        if self.file_path.exists() {
            fs::rename(&self.file_path, &self.rotated_path)?;
        }
        self.written = 0;
        Ok(())
    }

    fn file(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?,
        };
        Ok(self.file.insert(file))
    }
}

impl Write for SizeRotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Rotate only on record boundaries; an oversized record lands whole.
        if self.written > 0 {
            self.rotate_if_needed(buf.len())?;
        }
        self.file()?.write_all(buf)?;
        self.written = self.written.saturating_add(buf.len() as u64);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
/// Failures are reported on stderr and leave logging disabled.
pub fn init_tracing(config: &LogConfig) {
    static TRACE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    let file_writer =
        match SizeRotatingFileWriter::new(config.file_path.clone(), config.rotate_size_bytes) {
            Ok(writer) => writer,
            Err(error) => {
                eprintln!("warning: failed to initialize tracing writer: {error}");
                return;
            }
        };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    let _ = TRACE_GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);
    let init_result = if config.stderr {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init()
    };
    if let Err(error) = init_result {
        eprintln!(
            "warning: failed to initialize tracing subscriber for {}: {error}",
            config.file_path.display()
        );
    }
}
