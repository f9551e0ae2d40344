//! Append-only log file output

use super::config::get_logger_config;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

static FILE_SINK: Lazy<Mutex<Option<FileSink>>> = Lazy::new(|| Mutex::new(None));

/// Open (or reopen) the configured log file
pub fn init_file_logging() {
    let Some(path) = get_logger_config().file_path else {
        *FILE_SINK.lock() = None;
        return;
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = fs::create_dir_all(parent);
        }
    }

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            *FILE_SINK.lock() = Some(FileSink {
                path,
                writer: BufWriter::new(file),
            });
        }
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", path.display(), e);
            *FILE_SINK.lock() = None;
        }
    }
}

pub fn write_to_file(line: &str) {
    let mut sink = FILE_SINK.lock();
    if let Some(sink) = sink.as_mut() {
        if writeln!(sink.writer, "{}", line).is_err() {
            eprintln!("Failed to write log file {}", sink.path.display());
        }
    }
}

pub fn flush_file_logging() {
    if let Some(sink) = FILE_SINK.lock().as_mut() {
        let _ = sink.writer.flush();
    }
}
