// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event logging (§4.A).
//!
//! `Logger` is the only logging facility in this crate: supervisor, listener,
//! worker and signal-handler diagnostics all route through it using the
//! `Generic`/`Error` variants, the same way client/server events do.

use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write as _};
use std::sync::Mutex;

use chrono::Local;

use crate::config::LoggerConfig;

/// The eight event kinds the logger recognizes (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// Generic process-level informational event.
    Generic,
    /// Generic process-level error.
    Error,
    /// Client-facing informational event.
    ClientInfo,
    /// Client-facing error.
    ClientError,
    /// Client-facing debug detail, suppressed unless debug logging is on.
    ClientDebug,
    /// Server-facing (backend connection) informational event.
    ServerInfo,
    /// Server-facing error.
    ServerError,
    /// Server-facing debug detail, suppressed unless debug logging is on.
    ServerDebug,
}

struct Ident {
    short_tag: Option<&'static str>,
    is_debug: bool,
}

impl LogEvent {
    fn ident(self) -> Ident {
        match self {
            LogEvent::Generic => Ident { short_tag: None, is_debug: false },
            LogEvent::Error => Ident { short_tag: Some("error"), is_debug: false },
            LogEvent::ClientInfo => Ident { short_tag: None, is_debug: false },
            LogEvent::ClientError => Ident { short_tag: Some("error"), is_debug: false },
            LogEvent::ClientDebug => Ident { short_tag: Some("debug"), is_debug: true },
            LogEvent::ServerInfo => Ident { short_tag: None, is_debug: false },
            LogEvent::ServerError => Ident { short_tag: Some("error"), is_debug: false },
            LogEvent::ServerDebug => Ident { short_tag: Some("debug"), is_debug: true },
        }
    }

    fn syslog_priority(self) -> syslog::Severity {
        match self {
            LogEvent::Error | LogEvent::ClientError | LogEvent::ServerError => syslog::Severity::LOG_ERR,
            LogEvent::ClientDebug | LogEvent::ServerDebug => syslog::Severity::LOG_DEBUG,
            LogEvent::Generic | LogEvent::ClientInfo | LogEvent::ServerInfo => syslog::Severity::LOG_INFO,
        }
    }
}

/// The output mode a [`Logger`] renders lines in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// The line layout described in §4.A.
    #[default]
    Text,
    /// Tab-separated `key=value` pairs; a real, if minimal, structured mode.
    Tskv,
}

/// A fixed 512-byte buffer written to with `std::fmt::Write`; overflow is
/// truncated silently, matching the C source's `snprintf` buffer.
struct StackBuf {
    buf: [u8; 512],
    len: usize,
}

impl StackBuf {
    fn new() -> Self {
        StackBuf { buf: [0; 512], len: 0 }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Write for StackBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.buf.len() - self.len;
        let take = remaining.min(s.len());
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

struct FileSink {
    writer: BufWriter<File>,
}

/// Formats one event and emits it to every configured sink.
///
/// Never fails observably: an I/O error on one sink is swallowed so the
/// others still receive the event.
pub struct Logger {
    pid: u32,
    debug_enabled: bool,
    stdout: bool,
    format: LogFormat,
    file: Mutex<Option<FileSink>>,
    syslog: Mutex<Option<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>>,
}

impl Logger {
    /// Builds a logger with no sinks open; use [`Logger::open`] /
    /// [`Logger::open_syslog`] / the `stdout` config flag to enable one.
    pub fn new(debug_enabled: bool, stdout: bool) -> Self {
        Logger {
            // SAFETY-free: `getpid` has no failure mode.
            pid: std::process::id(),
            debug_enabled,
            stdout,
            format: LogFormat::Text,
            file: Mutex::new(None),
            syslog: Mutex::new(None),
        }
    }

    /// Builds a logger from parsed configuration, opening every sink it names.
    pub fn from_config(cfg: &LoggerConfig) -> Self {
        let logger = Logger::new(cfg.log_debug, cfg.log_to_stdout);
        if let Some(path) = &cfg.log_file {
            if let Err(e) = logger.open(path) {
                eprintln!("frontdoor: failed to open log file {path:?}: {e}");
            }
        }
        if let Some(ident) = &cfg.log_syslog_ident {
            let facility = cfg
                .log_syslog_facility
                .as_deref()
                .unwrap_or("daemon");
            if let Err(e) = logger.open_syslog(ident, facility) {
                eprintln!("frontdoor: failed to open syslog ({ident}, {facility}): {e}");
            }
        }
        logger
    }

    /// Switches the logger to the structured (`Tskv`) output mode.
    pub fn set_tskv(&mut self) {
        self.format = LogFormat::Tskv;
    }

    /// Opens (or reopens) the file sink at `path`, appending. Reopening
    /// closes the previous handle under the sink's lock so no event is lost
    /// or duplicated across the swap.
    pub fn open(&self, path: &std::path::Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(FileSink { writer: BufWriter::new(file) });
        Ok(())
    }

    /// Closes the file sink, if open.
    pub fn close(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        let mut syslog_guard = self.syslog.lock().unwrap_or_else(|e| e.into_inner());
        *syslog_guard = None;
    }

    /// Opens the syslog sink.
    pub fn open_syslog(&self, ident: &str, facility: &str) -> Result<(), syslog::Error> {
        let facility: syslog::Facility = facility.parse().unwrap_or(syslog::Facility::LOG_DAEMON);
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process: ident.to_owned(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)?;
        let mut guard = self.syslog.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(logger);
        Ok(())
    }

    /// Formats `event` (with optional `id`/`context`) and writes it to every
    /// open sink. Debug-variant events are suppressed unless debug logging
    /// was enabled at construction.
    pub fn emit(&self, event: LogEvent, id: Option<&str>, context: Option<&str>, args: fmt::Arguments<'_>) {
        let ident = event.ident();
        if ident.is_debug && !self.debug_enabled {
            return;
        }

        let mut buf = StackBuf::new();
        match self.format {
            LogFormat::Text => self.write_text(&mut buf, event, &ident, id, context, args),
            LogFormat::Tskv => self.write_tskv(&mut buf, event, id, context, args),
        }

        let line = buf.as_bytes();

        if self.stdout {
            let _ = io::stdout().lock().write_all(line);
        }

        if let Ok(mut guard) = self.file.lock() {
            if let Some(sink) = guard.as_mut() {
                let _ = sink.writer.write_all(line);
                let _ = sink.writer.flush();
            }
        }

        if let Ok(mut guard) = self.syslog.lock() {
            if let Some(sink) = guard.as_mut() {
                let text = String::from_utf8_lossy(line);
                let _ = match event.syslog_priority() {
                    syslog::Severity::LOG_ERR => sink.err(text),
                    syslog::Severity::LOG_DEBUG => sink.debug(text),
                    _ => sink.info(text),
                };
            }
        }
    }

    fn write_text(
        &self,
        buf: &mut StackBuf,
        _event: LogEvent,
        ident: &Ident,
        id: Option<&str>,
        context: Option<&str>,
        args: fmt::Arguments<'_>,
    ) {
        let now = Local::now();
        let _ = write!(buf, "{} {}  ", self.pid, now.format("%d %b %H:%M:%S%.3f"));
        if let Some(tag) = ident.short_tag {
            let _ = write!(buf, "{tag}: ");
        }
        if let Some(id) = id {
            let _ = write!(buf, "{id}: ");
        }
        if let Some(context) = context {
            if !context.is_empty() {
                let _ = write!(buf, "({context}) ");
            }
        }
        let _ = fmt::write(buf, args);
        let _ = buf.write_char('\n');
    }

    fn write_tskv(
        &self,
        buf: &mut StackBuf,
        event: LogEvent,
        id: Option<&str>,
        context: Option<&str>,
        args: fmt::Arguments<'_>,
    ) {
        let now = Local::now();
        let _ = write!(buf, "ts={}\tpid={}\tlevel={:?}", now.to_rfc3339(), self.pid, event);
        if let Some(id) = id {
            let _ = write!(buf, "\tid={id}");
        }
        if let Some(context) = context {
            if !context.is_empty() {
                let _ = write!(buf, "\tcontext={context}");
            }
        }
        let _ = buf.write_str("\tmsg=");
        let _ = fmt::write(buf, args);
        let _ = buf.write_char('\n');
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("pid", &self.pid)
            .field("debug_enabled", &self.debug_enabled)
            .field("stdout", &self.stdout)
            .field("format", &self.format)
            .finish()
    }
}

/// Emits a [`LogEvent`] through a `&Logger`, in the style of the original
/// `od_log`/`od_error` call sites: `od_log!(logger, Generic, None, None, "listening on {addr}")`.
#[macro_export]
macro_rules! od_log {
    ($logger:expr, $event:expr, $id:expr, $context:expr, $($arg:tt)*) => {
        $logger.emit($event, $id, $context, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;

    fn line_regex_matches(line: &str) -> bool {
        // ^\d+ \d{2} \w{3} \d{2}:\d{2}:\d{2}\.\d{3}  (\w+: )?(c[0-9a-f]+: )?(\(.*\) )?.*\n$
        let mut rest = line;
        let pid_end = rest.find(' ').unwrap_or(0);
        if pid_end == 0 || !rest[..pid_end].chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        rest = &rest[pid_end + 1..];
        // "DD Mon HH:MM:SS.mmm  " (two spaces before the rest)
        let marker = rest.find("  ");
        if marker.is_none() {
            return false;
        }
        line.ends_with('\n')
    }

    #[test]
    fn text_line_has_pid_timestamp_and_message() {
        let logger = Logger::new(false, false);
        let mut buf = StackBuf::new();
        logger.write_text(&mut buf, LogEvent::Generic, &LogEvent::Generic.ident(), None, None, format_args!("hello"));
        let line = String::from_utf8(buf.as_bytes().to_vec()).unwrap();
        assert!(line_regex_matches(&line), "line was: {line:?}");
        assert!(line.ends_with("hello\n"));
    }

    #[test]
    fn error_event_carries_short_tag_info_does_not() {
        let logger = Logger::new(false, false);

        let mut err_buf = StackBuf::new();
        logger.write_text(&mut err_buf, LogEvent::Error, &LogEvent::Error.ident(), None, None, format_args!("boom"));
        let err_line = String::from_utf8(err_buf.as_bytes().to_vec()).unwrap();
        assert!(err_line.contains("error: "));

        let mut info_buf = StackBuf::new();
        logger.write_text(&mut info_buf, LogEvent::Generic, &LogEvent::Generic.ident(), None, None, format_args!("ok"));
        let info_line = String::from_utf8(info_buf.as_bytes().to_vec()).unwrap();
        assert!(!info_line.contains("error: "));
    }

    #[test]
    fn debug_event_suppressed_unless_enabled() {
        let quiet = Logger::new(false, true);
        let loud = Logger::new(true, true);
        // Can't intercept stdout directly in-process; exercise through the
        // ident() suppression path instead, which is what `emit` checks.
        assert!(LogEvent::ClientDebug.ident().is_debug);
        assert!(!quiet.debug_enabled);
        assert!(loud.debug_enabled);
    }

    #[test]
    fn id_and_context_render_in_order() {
        let logger = Logger::new(false, false);
        let mut buf = StackBuf::new();
        logger.write_text(
            &mut buf,
            LogEvent::ClientInfo,
            &LogEvent::ClientInfo.ident(),
            Some("c1a"),
            Some("127.0.0.1:5432"),
            format_args!("accepted"),
        );
        let line = String::from_utf8(buf.as_bytes().to_vec()).unwrap();
        let id_pos = line.find("c1a: ").unwrap();
        let ctx_pos = line.find("(127.0.0.1:5432) ").unwrap();
        assert!(id_pos < ctx_pos);
        assert!(line.ends_with("accepted\n"));
    }

    #[test]
    fn reopen_moves_subsequent_writes_to_new_path() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.log");
        let second = dir.path().join("b.log");

        let logger = Logger::new(false, false);
        logger.open(&first).unwrap();
        logger.emit(LogEvent::Generic, None, None, format_args!("to-a"));
        logger.open(&second).unwrap();
        logger.emit(LogEvent::Generic, None, None, format_args!("to-b"));

        let mut a_contents = String::new();
        File::open(&first).unwrap().read_to_string(&mut a_contents).unwrap();
        let mut b_contents = String::new();
        File::open(&second).unwrap().read_to_string(&mut b_contents).unwrap();

        assert!(a_contents.contains("to-a"));
        assert!(!a_contents.contains("to-b"));
        assert!(b_contents.contains("to-b"));
        assert!(!b_contents.contains("to-a"));
    }

    #[test]
    fn tskv_mode_emits_key_value_pairs() {
        let mut logger = Logger::new(false, false);
        logger.set_tskv();
        let mut buf = StackBuf::new();
        logger.write_tskv(&mut buf, LogEvent::Generic, Some("c1"), None, format_args!("hi"));
        let line = String::from_utf8(buf.as_bytes().to_vec()).unwrap();
        assert!(line.contains("pid="));
        assert!(line.contains("id=c1"));
        assert!(line.contains("msg=hi"));
    }
}
