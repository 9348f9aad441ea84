use std::io::{self, Stdout, Write};
use std::sync::Mutex;

use colored::Colorize;
use log::debug;
use tokio::sync::mpsc::UnboundedSender;

/// User-visible events emitted while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Info(String),
    Success(String),
    Failure(String),
    Warning(String),
    /// Lightweight keep-alive every few tracks.
    Ping { processed: usize, total: usize },
    Done { url: String },
    Error(String),
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        ProgressEvent::Info(message.into())
    }
}

/// Ordered, write-only channel to whoever started the run.
///
/// Neither method can fail: a sink that cannot deliver drops the event.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);

    /// Terminal signal. Nothing is emitted afterwards.
    fn close(&self);
}

/// Prints progress for the CLI, to stdout unless another writer is given.
/// A failed write (closed pipe, gone terminal) drops the line.
pub struct ConsoleSink<W = Stdout> {
    out: Mutex<W>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn write_event<W: Write>(out: &mut W, event: &ProgressEvent) -> io::Result<()> {
    let written = match event {
        ProgressEvent::Info(message) => writeln!(out, "{}", message),
        ProgressEvent::Success(message) => writeln!(out, "{}", message.green()),
        ProgressEvent::Failure(message) => writeln!(out, "{}", message.red()),
        ProgressEvent::Warning(message) => writeln!(out, "{}", message.yellow().bold()),
        ProgressEvent::Ping { processed, total } => {
            writeln!(out, "{}", format!("Processed {}/{}", processed, total).dimmed())
        }
        ProgressEvent::Done { url } => {
            writeln!(out, "{} {}", "Done!".green().bold(), url.cyan())
        }
        ProgressEvent::Error(message) => {
            writeln!(out, "{} {}", "Error:".red().bold(), message.red())
        }
    };
    written?;
    out.flush()
}

impl<W: Write + Send> ProgressSink for ConsoleSink<W> {
    fn emit(&self, event: ProgressEvent) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = write_event(&mut *out, &event) {
            debug!("Could not print progress, discarding event: {e}");
        }
    }

    fn close(&self) {}
}

/// Renders progress as HTML fragments into a channel feeding a streamed HTTP
/// response. A closed receiver (client went away) is ignored.
pub struct ChannelSink {
    sender: Mutex<Option<UnboundedSender<String>>>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    pub fn send_raw(&self, html: String) {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = guard.as_ref() {
            if sender.send(html).is_err() {
                debug!("Progress receiver dropped, discarding event");
            }
        }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        self.send_raw(render_html(&event));
    }

    fn close(&self) {
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_html(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Info(message) => format!("<p>{}</p>\n", escape_html(message)),
        ProgressEvent::Success(message) => {
            format!("<p style=\"color:green;\">{}</p>\n", escape_html(message))
        }
        ProgressEvent::Failure(message) => {
            format!("<p style=\"color:red;\">{}</p>\n", escape_html(message))
        }
        ProgressEvent::Warning(message) => format!(
            "<p style=\"color:red; font-weight:bold;\">{}</p>\n",
            escape_html(message)
        ),
        ProgressEvent::Ping { processed, total } => {
            format!("<script>console.log(\"Processed {processed}/{total}\")</script>\n")
        }
        ProgressEvent::Done { url } => {
            let url = escape_html(url);
            format!("<p>Done! <a href=\"{url}\" target=\"_blank\">Open Sheet</a></p>\n")
        }
        ProgressEvent::Error(message) => format!("<p>Error: {}</p>\n", escape_html(message)),
    }
}
